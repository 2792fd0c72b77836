//! Inference session: loads a .tqf model and runs it with int8 I/O.
//!
//! Weights are dequantized once at load. Every op runs in f32 and its output
//! is requantized with that value's calibrated parameters.

use std::collections::BTreeMap;
use std::path::Path;

use tinyq_core::Tensor;

use crate::format::{IoSpec, TqfModel};
use crate::plan::{eval_op, PlanOp};
use crate::quantize::QuantParams;
use crate::{EdgeError, Result};

/// An int8 tensor with its affine parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<i8>,
    pub quant: QuantParams,
}

impl QuantizedTensor {
    pub fn dequantize(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(self.quant.dequantize_slice(&self.data), &self.shape)?)
    }
}

/// Inference session for a loaded .tqf model.
pub struct Session {
    model: TqfModel,
    constants: BTreeMap<String, Tensor>,
}

impl Session {
    /// Create a new inference session from a loaded model.
    pub fn new(model: TqfModel) -> Result<Self> {
        let constants = dequantize_constants(&model)?;
        Ok(Self { model, constants })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(TqfModel::load(path)?)
    }

    pub fn model(&self) -> &TqfModel {
        &self.model
    }

    pub fn inputs(&self) -> &[IoSpec] {
        &self.model.header.inputs
    }

    pub fn outputs(&self) -> &[IoSpec] {
        &self.model.header.outputs
    }

    /// Run on int8 inputs quantized with each input's declared parameters.
    pub fn run(&self, feeds: &[(&str, &[i8])]) -> Result<Vec<QuantizedTensor>> {
        let mut values = BTreeMap::new();
        for io in self.inputs() {
            let data = feeds
                .iter()
                .find(|(n, _)| *n == io.name)
                .map(|(_, d)| *d)
                .ok_or_else(|| EdgeError::MissingFeed(io.name.clone()))?;
            let numel: usize = io.shape.iter().product();
            if data.len() != numel {
                return Err(EdgeError::FeedShape {
                    name: io.name.clone(),
                    expected: io.shape.clone(),
                    got: vec![data.len()],
                });
            }
            values.insert(io.name.clone(), Tensor::from_vec(io.quant.dequantize_slice(data), &io.shape)?);
        }

        for op in &self.model.header.ops {
            let out = eval_op(op, &values, &self.constants)?;
            let q = self.value_quant(op.output())?;
            values.insert(op.output().to_string(), q.fake_quant(&out));
        }

        self.outputs()
            .iter()
            .map(|io| {
                let t = values.get(&io.name).ok_or_else(|| EdgeError::UnknownValue(io.name.clone()))?;
                Ok(QuantizedTensor {
                    name: io.name.clone(),
                    shape: t.dims().to_vec(),
                    data: io.quant.quantize_slice(t.as_f32_slice()),
                    quant: io.quant,
                })
            })
            .collect()
    }

    /// Quantize f32 feeds, run, and dequantize the outputs.
    pub fn run_f32(&self, feeds: &[(String, Tensor)]) -> Result<Vec<Tensor>> {
        let mut quantized = Vec::with_capacity(feeds.len());
        for io in self.inputs() {
            let t = feeds
                .iter()
                .find(|(n, _)| n == &io.name)
                .map(|(_, t)| t)
                .ok_or_else(|| EdgeError::MissingFeed(io.name.clone()))?;
            quantized.push((io.name.as_str(), io.quant.quantize_slice(t.as_f32_slice())));
        }
        let refs: Vec<(&str, &[i8])> = quantized.iter().map(|(n, d)| (*n, d.as_slice())).collect();
        self.run(&refs)?.iter().map(QuantizedTensor::dequantize).collect()
    }

    fn value_quant(&self, name: &str) -> Result<QuantParams> {
        self.model
            .header
            .values
            .get(name)
            .copied()
            .ok_or_else(|| EdgeError::MissingQuantParams(name.to_string()))
    }
}

fn dequantize_constants(model: &TqfModel) -> Result<BTreeMap<String, Tensor>> {
    let header = &model.header;
    let mut out = BTreeMap::new();

    for op in &header.ops {
        let params = op.parameters();
        for operand in op.operands() {
            if params.contains(&operand) || out.contains_key(operand) || !header.tensors.contains_key(operand) {
                continue;
            }
            let q = header
                .values
                .get(operand)
                .ok_or_else(|| EdgeError::MissingQuantParams(operand.to_string()))?;
            let data = i8_tensor(model, operand)?;
            out.insert(operand.to_string(), Tensor::from_vec(q.dequantize_slice(data), shape_of(model, operand)?)?);
        }

        if let PlanOp::Conv2d { input, weight, bias, .. } | PlanOp::FullyConnected { input, weight, bias, .. } = op {
            let scales = model
                .tensor_scales(weight)
                .ok_or_else(|| EdgeError::MissingConstant(format!("{weight}.scales")))?;
            let w = i8_tensor(model, weight)?;
            let per_channel = w.len() / scales.len().max(1);
            let w_f32: Vec<f32> = w
                .iter()
                .enumerate()
                .map(|(i, &q)| q as f32 * scales[i / per_channel.max(1)])
                .collect();
            out.insert(weight.clone(), Tensor::from_vec(w_f32, shape_of(model, weight)?)?);

            if let Some(bias) = bias {
                let in_scale = header
                    .values
                    .get(input)
                    .ok_or_else(|| EdgeError::MissingQuantParams(input.clone()))?
                    .scale;
                let b = model.tensor_i32(bias).ok_or_else(|| wrong_dtype(model, bias))?;
                let b_f32: Vec<f32> = b
                    .iter()
                    .zip(&scales)
                    .map(|(&q, &ws)| q as f32 * in_scale * ws)
                    .collect();
                out.insert(bias.clone(), Tensor::from_vec(b_f32, shape_of(model, bias)?)?);
            }
        }
    }
    Ok(out)
}

fn shape_of<'a>(model: &'a TqfModel, name: &str) -> Result<&'a [usize]> {
    model.tensor_shape(name).ok_or_else(|| EdgeError::MissingConstant(name.to_string()))
}

fn i8_tensor<'a>(model: &'a TqfModel, name: &str) -> Result<&'a [i8]> {
    model.tensor_i8(name).ok_or_else(|| wrong_dtype(model, name))
}

fn wrong_dtype(model: &TqfModel, name: &str) -> EdgeError {
    match model.header.tensors.get(name) {
        Some(entry) => EdgeError::UnsupportedTensorDType {
            name: name.to_string(),
            dtype: entry.dtype,
        },
        None => EdgeError::MissingConstant(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tests::two_input_plan;
    use crate::quantize::{QuantizeOptions, Quantizer};
    use tinyq_data::CalibrationDataset;

    fn quantized_two_inputs() -> (crate::ExecutionPlan, TqfModel) {
        let plan = two_input_plan();
        let ds = CalibrationDataset::new(plan.inputs.clone(), 100, Some(3));
        let model = Quantizer::new(QuantizeOptions::default()).unwrap().quantize(&plan, &ds).unwrap();
        (plan, model)
    }

    #[test]
    fn test_session_tracks_float_plan() {
        let (plan, model) = quantized_two_inputs();
        let session = Session::new(model).unwrap();

        let feeds = vec![
            ("input_0".to_string(), Tensor::from_f32(&[0.5, -0.25], &[1, 2])),
            ("input_1".to_string(), Tensor::from_f32(&[0.1; 16], &[1, 1, 4, 4])),
        ];
        let expected = plan.run(&feeds).unwrap();
        let got = session.run_f32(&feeds).unwrap();

        let out_scale = session.outputs()[0].quant.scale;
        for (e, g) in expected[0].as_f32_slice().iter().zip(got[0].as_f32_slice()) {
            assert!((e - g).abs() <= 4.0 * out_scale + 0.05, "expected {e}, got {g}");
        }
    }

    #[test]
    fn test_session_int8_io() {
        let (_, model) = quantized_two_inputs();
        let bytes = model.to_bytes().unwrap();
        let session = Session::new(TqfModel::from_bytes(&bytes).unwrap()).unwrap();

        let x = [0i8; 2];
        let y = [0i8; 16];
        let out = session.run(&[("input_0", &x[..]), ("input_1", &y[..])]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "output_0");
        assert_eq!(out[0].shape, vec![1, 1, 4, 4]);
        assert_eq!(out[0].data.len(), 16);
    }

    #[test]
    fn test_session_rejects_short_feed() {
        let (_, model) = quantized_two_inputs();
        let session = Session::new(model).unwrap();
        let x = [0i8; 1];
        let y = [0i8; 16];
        assert!(matches!(
            session.run(&[("input_0", &x[..]), ("input_1", &y[..])]),
            Err(EdgeError::FeedShape { .. })
        ));
    }
}
