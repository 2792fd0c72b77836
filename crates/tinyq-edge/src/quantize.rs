//! Post-training int8 quantization.
//!
//! - Activations: asymmetric per-tensor int8 from calibrated min/max
//! - Weights: symmetric per-output-channel int8
//! - Biases: int32 at `input_scale * weight_scale[c]`

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tinyq_core::{DType, Tensor};
use tinyq_data::RepresentativeDataset;

use crate::format::{IoSpec, TqfBuilder, TqfModel};
use crate::plan::{ExecutionPlan, PlanOp};
use crate::{EdgeError, Result};

/// Optimization policy applied during conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    /// Calibrated full-integer quantization.
    #[default]
    Default,
}

/// Operator set the artifact may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpSet {
    /// Built-in ops with int8 kernels only.
    #[default]
    BuiltinsInt8,
}

/// Converter options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeOptions {
    pub optimization: Optimization,
    pub op_set: OpSet,
    pub input_type: DType,
    pub output_type: DType,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            optimization: Optimization::Default,
            op_set: OpSet::BuiltinsInt8,
            input_type: DType::I8,
            output_type: DType::I8,
        }
    }
}

/// Affine int8 parameters: `real = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    /// Asymmetric parameters covering `[min, max]` widened to include 0.
    ///
    /// A degenerate range gets scale 1.
    pub fn from_range(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let span = max - min;
        let scale = if span > f32::EPSILON && span.is_finite() { span / 255.0 } else { 1.0 };
        let zero_point = (-128.0 - min / scale).round().clamp(-128.0, 127.0) as i32;
        Self { scale, zero_point }
    }

    /// Parameters covering every value of `t`.
    pub fn from_tensor(t: &Tensor) -> Self {
        let (min, max) = t.min_max().unwrap_or((0.0, 0.0));
        Self::from_range(min, max)
    }

    pub fn quantize(&self, x: f32) -> i8 {
        ((x / self.scale).round() + self.zero_point as f32).clamp(-128.0, 127.0) as i8
    }

    pub fn dequantize(&self, q: i8) -> f32 {
        (q as i32 - self.zero_point) as f32 * self.scale
    }

    pub fn quantize_slice(&self, xs: &[f32]) -> Vec<i8> {
        xs.iter().map(|&x| self.quantize(x)).collect()
    }

    pub fn dequantize_slice(&self, qs: &[i8]) -> Vec<f32> {
        qs.iter().map(|&q| self.dequantize(q)).collect()
    }

    /// Round-trip through int8.
    pub fn fake_quant(&self, t: &Tensor) -> Tensor {
        t.map(|x| self.dequantize(self.quantize(x)))
    }
}

/// Running min/max of every value seen during calibration.
#[derive(Debug, Default)]
pub struct RangeObserver {
    ranges: BTreeMap<String, (f32, f32)>,
    samples: usize,
}

impl RangeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample's values into the running ranges.
    pub fn observe(&mut self, values: &BTreeMap<String, Tensor>) {
        for (name, t) in values {
            let Some((lo, hi)) = t.min_max() else { continue };
            self.ranges
                .entry(name.clone())
                .and_modify(|r| {
                    r.0 = r.0.min(lo);
                    r.1 = r.1.max(hi);
                })
                .or_insert((lo, hi));
        }
        self.samples += 1;
    }

    pub fn num_samples(&self) -> usize {
        self.samples
    }

    pub fn range(&self, name: &str) -> Option<(f32, f32)> {
        self.ranges.get(name).copied()
    }

    pub fn params(&self) -> BTreeMap<String, QuantParams> {
        self.ranges
            .iter()
            .map(|(name, &(lo, hi))| (name.clone(), QuantParams::from_range(lo, hi)))
            .collect()
    }
}

/// Symmetric per-output-channel int8 (axis 0). Returns `(values, scales)`.
pub fn quantize_per_channel(weight: &Tensor) -> (Vec<i8>, Vec<f32>) {
    let channels = weight.dims().first().copied().unwrap_or(1).max(1);
    let per_channel = weight.numel() / channels;
    let data = weight.as_f32_slice();

    let mut values = Vec::with_capacity(data.len());
    let mut scales = Vec::with_capacity(channels);
    for row in data.chunks(per_channel.max(1)) {
        let abs_max = row.iter().fold(0.0f32, |m, w| m.max(w.abs()));
        let scale = if abs_max < 1e-12 { 1.0 } else { abs_max / 127.0 };
        values.extend(row.iter().map(|&w| (w / scale).round().clamp(-127.0, 127.0) as i8));
        scales.push(scale);
    }
    (values, scales)
}

/// int32 bias at `input_scale * weight_scales[c]`.
pub fn quantize_bias(bias: &Tensor, input_scale: f32, weight_scales: &[f32]) -> Vec<i32> {
    bias.as_f32_slice()
        .iter()
        .zip(weight_scales)
        .map(|(&b, &ws)| {
            let q = (b / (input_scale * ws)).round();
            q.clamp(i32::MIN as f32, i32::MAX as f32) as i32
        })
        .collect()
}

/// Calibrates a plan and lowers it to a `.tqf` model.
pub struct Quantizer {
    options: QuantizeOptions,
}

impl Quantizer {
    pub fn new(options: QuantizeOptions) -> Result<Self> {
        if options.input_type != DType::I8 {
            return Err(EdgeError::UnsupportedOption(format!("input type {}", options.input_type)));
        }
        if options.output_type != DType::I8 {
            return Err(EdgeError::UnsupportedOption(format!("output type {}", options.output_type)));
        }
        Ok(Self { options })
    }

    /// Run every calibration sample through the f32 plan and collect ranges.
    pub fn calibrate(&self, plan: &ExecutionPlan, dataset: &dyn RepresentativeDataset) -> Result<RangeObserver> {
        let mut observer = RangeObserver::new();
        for sample in dataset.samples() {
            let values = plan.execute(&sample.inputs)?;
            observer.observe(&values);
        }
        if observer.num_samples() == 0 {
            return Err(EdgeError::EmptyCalibration);
        }
        tracing::debug!(samples = observer.num_samples(), plan = %plan.name, "calibrated");
        Ok(observer)
    }

    pub fn quantize(&self, plan: &ExecutionPlan, dataset: &dyn RepresentativeDataset) -> Result<TqfModel> {
        plan.validate()?;
        let mut quant = self.calibrate(plan, dataset)?.params();

        let mut builder = TqfBuilder::new(&plan.name, self.options.optimization, self.options.op_set);
        for spec in &plan.inputs {
            builder.add_input(io_spec(&spec.name, &spec.shape, self.options.input_type, &quant)?);
        }
        for spec in &plan.outputs {
            builder.add_output(io_spec(&spec.name, &spec.shape, self.options.output_type, &quant)?);
        }

        let mut emitted: HashSet<&str> = HashSet::new();
        for op in &plan.ops {
            let params = op.parameters();

            // Constants in activation positions are stored like activations.
            for operand in op.operands() {
                if params.contains(&operand) || emitted.contains(operand) {
                    continue;
                }
                if let Some(t) = plan.constants.get(operand) {
                    let q = QuantParams::from_tensor(t);
                    builder.add_i8(operand, t.dims(), &q.quantize_slice(t.as_f32_slice()));
                    quant.insert(operand.to_string(), q);
                    emitted.insert(operand);
                }
            }

            if let PlanOp::Conv2d { input, weight, bias, .. } | PlanOp::FullyConnected { input, weight, bias, .. } = op {
                let w = plan
                    .constants
                    .get(weight)
                    .ok_or_else(|| EdgeError::MissingConstant(weight.clone()))?;
                let (w_q, w_scales) = quantize_per_channel(w);
                if emitted.insert(weight.as_str()) {
                    builder.add_i8(weight, w.dims(), &w_q);
                    builder.add_f32(&format!("{weight}.scales"), &[w_scales.len()], &w_scales);
                }
                if let Some(bias) = bias {
                    let b = plan
                        .constants
                        .get(bias)
                        .ok_or_else(|| EdgeError::MissingConstant(bias.clone()))?;
                    let in_scale = quant
                        .get(input)
                        .ok_or_else(|| EdgeError::MissingQuantParams(input.clone()))?
                        .scale;
                    if emitted.insert(bias.as_str()) {
                        builder.add_i32(bias, b.dims(), &quantize_bias(b, in_scale, &w_scales));
                    }
                }
            }

            if !quant.contains_key(op.output()) {
                return Err(EdgeError::MissingQuantParams(op.output().to_string()));
            }
            builder.add_op(op.clone());
        }

        for (name, q) in &quant {
            builder.set_value_quant(name, *q);
        }

        let model = builder.build();
        tracing::debug!(
            plan = %plan.name,
            ops = model.header.ops.len(),
            tensors = model.header.tensors.len(),
            weight_bytes = model.weights.len(),
            "quantized"
        );
        Ok(model)
    }
}

fn io_spec(name: &str, shape: &[usize], dtype: DType, quant: &BTreeMap<String, QuantParams>) -> Result<IoSpec> {
    let q = quant.get(name).ok_or_else(|| EdgeError::MissingQuantParams(name.to_string()))?;
    Ok(IoSpec {
        name: name.to_string(),
        shape: shape.to_vec(),
        dtype,
        quant: *q,
    })
}
