//! Fixture generation pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{
    AddFixture, ConvAddFixture, ConvAddVariant, ConvFixture, Fixture, LaplaceConvFixture, SimpleLinearFixture,
    TwoInputsFixture,
};
use crate::params::ConvSweep;
use crate::{FixtureError, Result, DEFAULT_ALU_VECTOR_SIZES};

/// What to generate and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub output_dir: PathBuf,
    pub alu_vector_sizes: Vec<usize>,
    pub sweep: ConvSweep,
    /// Evaluate each fixture on its sample data before export.
    pub validate: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            alu_vector_sizes: DEFAULT_ALU_VECTOR_SIZES.to_vec(),
            sweep: ConvSweep::default(),
            validate: true,
        }
    }
}

/// Outcome of one generator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Written files, in generation order.
    pub produced: Vec<PathBuf>,
    /// Sweep tuples rejected by the feasibility rule.
    pub skipped: usize,
}

pub struct FixtureGenerator {
    config: GeneratorConfig,
}

impl FixtureGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate every fixture: add vectors, the conv sweep, then the
    /// composite and hand-weighted graphs.
    pub fn run(&self) -> Result<GenerationReport> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let mut report = GenerationReport::default();

        for &len in &self.config.alu_vector_sizes {
            report.produced.push(self.write(&AddFixture::new(len))?);
        }

        for params in self.config.sweep.tuples() {
            if !params.is_feasible() {
                tracing::trace!(%params, "skipping infeasible conv tuple");
                report.skipped += 1;
                continue;
            }
            report.produced.push(self.write(&ConvFixture::new(params)?)?);
        }

        report.produced.push(self.write(&ConvAddFixture::new(ConvAddVariant::Chained))?);
        report.produced.push(self.write(&ConvAddFixture::new(ConvAddVariant::Parallel))?);
        report.produced.push(self.write(&SimpleLinearFixture::new()?)?);
        report.produced.push(self.write(&LaplaceConvFixture::new()?)?);
        report.produced.push(self.write(&TwoInputsFixture::new()?)?);

        tracing::info!(
            produced = report.produced.len(),
            skipped = report.skipped,
            dir = %self.config.output_dir.display(),
            "fixture generation complete"
        );
        Ok(report)
    }

    /// Optionally evaluate `fixture`, then export it below the output root.
    pub fn write(&self, fixture: &dyn Fixture) -> Result<PathBuf> {
        let path = self.config.output_dir.join(fixture.relative_path());
        let expected = fixture.output_shape();

        if self.config.validate {
            let y = fixture.forward(&fixture.sample_inputs())?;
            if y.dims() != expected.as_slice() {
                return Err(FixtureError::OutputShape {
                    fixture: fixture.name(),
                    expected,
                    got: y.dims().to_vec(),
                });
            }
            tracing::debug!(fixture = %fixture.name(), output = ?summarize(y.as_f32_slice()), "evaluated");
        }

        let model = fixture.export()?;
        model.save(&path)?;
        tracing::info!(
            path = %display_relative(&path, &self.config.output_dir),
            ops = %model.op_summary(),
            output_shape = ?expected,
            "wrote fixture"
        );
        Ok(path)
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// First few values, enough to eyeball a log line.
fn summarize(values: &[f32]) -> Vec<f32> {
    values.iter().copied().take(8).collect()
}
