//! Per-file conversion driver.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tinyq_data::{CalibrationDataset, DEFAULT_NUM_SAMPLES};
use tinyq_edge::staging::{load_plan, save_plan};
use tinyq_edge::{QuantizeOptions, Quantizer};
use tinyq_onnx::OnnxModel;

use crate::discover::{discover, Job};
use crate::rehost::rehost;
use crate::{Result, TQF_EXTENSION};

/// Converter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Calibration samples drawn per file.
    pub num_samples: usize,
    /// Fixed calibration seed; `None` draws fresh entropy per file.
    pub seed: Option<u64>,
    /// Extension of produced artifacts.
    pub extension: String,
    pub options: QuantizeOptions,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            num_samples: DEFAULT_NUM_SAMPLES,
            seed: None,
            extension: TQF_EXTENSION.to_string(),
            options: QuantizeOptions::default(),
        }
    }
}

/// One converted file.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `+`-joined ONNX op types of the source graph.
    pub ops: String,
    /// Artifact size in bytes.
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertReport {
    pub converted: Vec<Conversion>,
}

pub struct Converter {
    config: ConvertConfig,
    quantizer: Quantizer,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Result<Self> {
        let quantizer = Quantizer::new(config.options)?;
        Ok(Self { config, quantizer })
    }

    /// Convert `input` (a file or a directory tree) into `output`.
    pub fn run(&self, input: &Path, output: &Path) -> Result<ConvertReport> {
        let jobs = discover(input, output, &self.config.extension)?;
        if jobs.is_empty() {
            tracing::info!(input = %input.display(), "no .onnx files found, nothing to do");
        }

        let mut report = ConvertReport::default();
        for job in &jobs {
            report.converted.push(self.convert_file(job)?);
        }
        Ok(report)
    }

    /// Convert a single file.
    ///
    /// The staging directory is left behind if anything between staging and
    /// writing the artifact fails.
    pub fn convert_file(&self, job: &Job) -> Result<Conversion> {
        let model = OnnxModel::load(&job.input)?;
        let specs = model.runtime_inputs()?;
        let name = job
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let plan = rehost(&model, &name)?;

        let staging = staging_dir_for(&job.input, Local::now());
        save_plan(&plan, &staging)?;
        let plan = load_plan(&staging)?;

        let dataset = CalibrationDataset::new(specs, self.config.num_samples, self.config.seed);
        let artifact = self.quantizer.quantize(&plan, &dataset)?;

        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = artifact.to_bytes()?;
        fs::write(&job.output, &bytes)?;

        if let Err(err) = fs::remove_dir_all(&staging) {
            tracing::warn!(staging = %staging.display(), error = %err, "failed to remove staging directory");
        }

        let conversion = Conversion {
            input: job.input.clone(),
            output: job.output.clone(),
            ops: model.op_summary(),
            bytes: bytes.len(),
        };
        tracing::info!(
            input = %conversion.input.display(),
            output = %conversion.output.display(),
            ops = %conversion.ops,
            bytes = conversion.bytes,
            "converted"
        );
        Ok(conversion)
    }
}

/// `<input>.<YYYYmmdd-HHMMSS>.plan`, next to the input file.
pub fn staging_dir_for(input: &Path, now: DateTime<Local>) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(format!(".{}.plan", now.format("%Y%m%d-%H%M%S")));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tinyq_core::{DType, Tensor};
    use tinyq_edge::Session;
    use tinyq_fixtures::models::{AddFixture, ConvAddFixture, ConvAddVariant, SimpleLinearFixture, TwoInputsFixture};
    use tinyq_fixtures::{ConvSweep, Fixture, FixtureGenerator, GeneratorConfig};
    use tinyq_onnx::proto::tensor_shape_proto::{dimension, Dimension};
    use tinyq_onnx::proto::{type_proto, ModelProto, ValueInfoProto};
    use tinyq_onnx::OnnxError;

    use crate::ConvertError;

    fn seeded() -> Converter {
        Converter::new(ConvertConfig { seed: Some(7), ..Default::default() }).unwrap()
    }

    fn write_fixture(dir: &Path, fixture: &dyn Fixture) -> PathBuf {
        let path = dir.join(fixture.relative_path());
        fixture.export().unwrap().save(&path).unwrap();
        path
    }

    fn tensor_type(vi: &mut ValueInfoProto) -> &mut type_proto::Tensor {
        match vi.r#type.as_mut().and_then(|t| t.value.as_mut()) {
            Some(type_proto::Value::TensorType(t)) => t,
            None => panic!("'{}' has no tensor type", vi.name),
        }
    }

    fn make_symbolic(vi: &mut ValueInfoProto) {
        tensor_type(vi).shape.as_mut().unwrap().dim[0] = Dimension {
            value: Some(dimension::Value::DimParam("batch".into())),
            denotation: String::new(),
        };
    }

    fn save_proto(proto: ModelProto, path: &Path) -> PathBuf {
        OnnxModel::from(proto).save(path).unwrap();
        path.to_path_buf()
    }

    fn plan_dirs(dir: &Path) -> Vec<PathBuf> {
        let pattern = format!("{}/**/*.plan", dir.display());
        glob::glob(&pattern).unwrap().filter_map(|p| p.ok()).collect()
    }

    #[test]
    fn test_staging_dir_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let dir = staging_dir_for(Path::new("/data/add/add-4.onnx"), now);
        assert_eq!(dir, PathBuf::from("/data/add/add-4.onnx.20240309-140507.plan"));
    }

    #[test]
    fn test_config_defaults() {
        let config: ConvertConfig = serde_json::from_str(r#"{"seed": 3}"#).unwrap();
        assert_eq!(config.num_samples, 100);
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.extension, "tqf");
        assert_eq!(config.options.input_type, DType::I8);
    }

    #[test]
    fn test_convert_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(dir.path(), &TwoInputsFixture::new().unwrap());
        let output = dir.path().join("out/two-inputs.tqf");

        let report = seeded().run(&input, &output).unwrap();
        assert_eq!(report.converted.len(), 1);
        assert_eq!(report.converted[0].ops, "Gemm+Conv+Mul");
        assert!(output.is_file());
        assert!(plan_dirs(dir.path()).is_empty(), "staging directory left behind");

        let session = Session::load(&output).unwrap();
        assert_eq!(session.inputs().len(), 2);
        assert!(session.inputs().iter().all(|io| io.dtype == DType::I8));
        assert!(session.outputs().iter().all(|io| io.dtype == DType::I8));
    }

    #[test]
    fn test_directory_mirrors_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("fixtures");
        let config = GeneratorConfig {
            output_dir: src.clone(),
            alu_vector_sizes: vec![1, 16],
            sweep: ConvSweep {
                input_sizes: vec![6],
                input_channels: vec![1],
                output_channels: vec![2],
                kernel_sizes: vec![3],
                strides: vec![1],
                paddings: vec![0],
            },
            validate: true,
        };
        let generated = FixtureGenerator::new(config).run().unwrap().produced;
        fs::write(src.join("README.txt"), "not a model").unwrap();
        fs::write(src.join("add/notes.json"), "{}").unwrap();

        let out = dir.path().join("converted");
        let report = seeded().run(&src, &out).unwrap();

        assert_eq!(report.converted.len(), generated.len());
        for path in &generated {
            let relative = path.strip_prefix(&src).unwrap();
            assert!(out.join(relative).with_extension("tqf").is_file(), "{}", relative.display());
        }
        assert!(out.join("add/add-16.tqf").is_file());
        assert!(!out.join("README.tqf").exists());
        assert!(plan_dirs(&src).is_empty());
    }

    #[test]
    fn test_empty_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let report = seeded().run(dir.path(), &out).unwrap();
        assert!(report.converted.is_empty());
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let err = seeded().run(&dir.path().join("nope.onnx"), &out);
        assert!(matches!(err, Err(ConvertError::MissingInput(_))));
        assert!(!out.exists());
    }

    #[test]
    fn test_symbolic_dimension_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut proto = SimpleLinearFixture::new().unwrap().export().unwrap().proto().clone();
        make_symbolic(&mut proto.graph.as_mut().unwrap().input[0]);
        let path = save_proto(proto, &dir.path().join("dynamic.onnx"));

        let out = dir.path().join("dynamic.tqf");
        let err = seeded().run(&path, &out);
        assert!(matches!(err, Err(ConvertError::Onnx(OnnxError::UnsupportedDimension { axis: 0, .. }))));
        assert!(!out.exists());
        assert!(plan_dirs(dir.path()).is_empty());
    }

    #[test]
    fn test_dot_prefixed_directory_mirrors_tree() {
        let src = tempfile::tempdir_in(".").unwrap();
        let out = tempfile::tempdir().unwrap();
        write_fixture(src.path(), &AddFixture::new(4));
        write_fixture(src.path(), &SimpleLinearFixture::new().unwrap());

        let report = seeded().run(src.path(), out.path()).unwrap();
        assert_eq!(report.converted.len(), 2);
        assert!(out.path().join("add/add-4.tqf").is_file());
        assert!(out.path().join("simple-models/simple.tqf").is_file());
        assert!(plan_dirs(src.path()).is_empty());
    }

    #[test]
    fn test_symbolic_output_dimension_converts() {
        let dir = tempfile::tempdir().unwrap();
        let mut proto = AddFixture::new(4).export().unwrap().proto().clone();
        make_symbolic(&mut proto.graph.as_mut().unwrap().output[0]);
        let path = save_proto(proto, &dir.path().join("add-4.onnx"));

        let out = dir.path().join("add-4.tqf");
        seeded().run(&path, &out).unwrap();
        let session = Session::load(&out).unwrap();
        assert_eq!(session.outputs()[0].shape, vec![1, 4]);
        assert!(plan_dirs(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_output_shape_converts() {
        let dir = tempfile::tempdir().unwrap();
        let mut proto = AddFixture::new(4).export().unwrap().proto().clone();
        tensor_type(&mut proto.graph.as_mut().unwrap().output[0]).shape = None;
        let path = save_proto(proto, &dir.path().join("add-4.onnx"));

        let out = dir.path().join("add-4.tqf");
        seeded().run(&path, &out).unwrap();
        assert_eq!(Session::load(&out).unwrap().outputs()[0].shape, vec![1, 4]);
    }

    #[test]
    fn test_quantized_output_tracks_float() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = ConvAddFixture::new(ConvAddVariant::Parallel);
        let input = write_fixture(dir.path(), &fixture);
        let output = dir.path().join("v2.tqf");
        seeded().run(&input, &output).unwrap();

        let session = Session::load(&output).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let x = Tensor::randn_with(&[1, 1, 7, 7], &mut rng);
        let expected = fixture.forward(std::slice::from_ref(&x)).unwrap();
        let got = session.run_f32(&[("input_0".to_string(), x)]).unwrap();

        // within a tenth of the calibrated output range
        let tolerance = 0.1 * 255.0 * session.outputs()[0].quant.scale;
        let diff = (got[0].as_f32_slice()[0] - expected.as_f32_slice()[0]).abs();
        assert!(diff <= tolerance, "diff {diff} > {tolerance}");
    }
}
