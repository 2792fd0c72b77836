//! Execution plan: the staging representation of a graph.
//!
//! A plan is a topologically ordered op list over named values. Values are
//! either runtime inputs, constants (weights, biases, literal operands) or op
//! outputs. Every op produces exactly one value.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tinyq_core::ops::{conv2d, Conv2dGeometry};
use tinyq_core::{Tensor, TensorSpec};

use crate::{EdgeError, Result};

/// A single operation in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOp {
    /// NCHW convolution, square kernel, symmetric padding.
    Conv2d {
        input: String,
        weight: String,
        bias: Option<String>,
        output: String,
        stride: usize,
        padding: usize,
    },
    /// y = x @ W^T + b with W stored `[out_features, in_features]`.
    FullyConnected {
        input: String,
        weight: String,
        bias: Option<String>,
        output: String,
    },
    Add { lhs: String, rhs: String, output: String },
    Mul { lhs: String, rhs: String, output: String },
    Relu { input: String, output: String },
}

impl PlanOp {
    /// Short op name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlanOp::Conv2d { .. } => "conv2d",
            PlanOp::FullyConnected { .. } => "fully_connected",
            PlanOp::Add { .. } => "add",
            PlanOp::Mul { .. } => "mul",
            PlanOp::Relu { .. } => "relu",
        }
    }

    /// Every value this op reads, weights included.
    pub fn operands(&self) -> Vec<&str> {
        match self {
            PlanOp::Conv2d { input, weight, bias, .. } | PlanOp::FullyConnected { input, weight, bias, .. } => {
                let mut v = vec![input.as_str(), weight.as_str()];
                if let Some(b) = bias {
                    v.push(b.as_str());
                }
                v
            }
            PlanOp::Add { lhs, rhs, .. } | PlanOp::Mul { lhs, rhs, .. } => vec![lhs.as_str(), rhs.as_str()],
            PlanOp::Relu { input, .. } => vec![input.as_str()],
        }
    }

    /// Operands that must be constants.
    pub fn parameters(&self) -> Vec<&str> {
        match self {
            PlanOp::Conv2d { weight, bias, .. } | PlanOp::FullyConnected { weight, bias, .. } => {
                let mut v = vec![weight.as_str()];
                if let Some(b) = bias {
                    v.push(b.as_str());
                }
                v
            }
            _ => Vec::new(),
        }
    }

    pub fn output(&self) -> &str {
        match self {
            PlanOp::Conv2d { output, .. }
            | PlanOp::FullyConnected { output, .. }
            | PlanOp::Add { output, .. }
            | PlanOp::Mul { output, .. }
            | PlanOp::Relu { output, .. } => output,
        }
    }
}

/// Ordered ops plus the f32 constants they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub ops: Vec<PlanOp>,
    /// Stored separately (safetensors) when staged.
    #[serde(skip)]
    pub constants: BTreeMap<String, Tensor>,
}

impl ExecutionPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            ops: Vec::new(),
            constants: BTreeMap::new(),
        }
    }

    /// Check that every operand is defined before use, that weights are
    /// constants and that every output is produced.
    pub fn validate(&self) -> Result<()> {
        let mut known: HashSet<&str> = self.inputs.iter().map(|s| s.name.as_str()).collect();
        known.extend(self.constants.keys().map(String::as_str));

        for op in &self.ops {
            for param in op.parameters() {
                if !self.constants.contains_key(param) {
                    return Err(EdgeError::MissingConstant(param.to_string()));
                }
            }
            for operand in op.operands() {
                if !known.contains(operand) {
                    return Err(EdgeError::UnknownValue(operand.to_string()));
                }
            }
            known.insert(op.output());
        }

        for out in &self.outputs {
            if !known.contains(out.name.as_str()) {
                return Err(EdgeError::UnknownValue(out.name.clone()));
            }
        }
        Ok(())
    }

    /// Run the plan in f32, returning every input and produced value.
    pub fn execute(&self, feeds: &[(String, Tensor)]) -> Result<BTreeMap<String, Tensor>> {
        let mut values = BTreeMap::new();
        for spec in &self.inputs {
            let tensor = feeds
                .iter()
                .find(|(n, _)| n == &spec.name)
                .map(|(_, t)| t)
                .ok_or_else(|| EdgeError::MissingFeed(spec.name.clone()))?;
            if tensor.dims() != spec.shape.as_slice() {
                return Err(EdgeError::FeedShape {
                    name: spec.name.clone(),
                    expected: spec.shape.clone(),
                    got: tensor.dims().to_vec(),
                });
            }
            values.insert(spec.name.clone(), tensor.clone());
        }

        for op in &self.ops {
            let out = eval_op(op, &values, &self.constants)?;
            values.insert(op.output().to_string(), out);
        }
        Ok(values)
    }

    /// Set every output shape from one run on zero-valued feeds.
    pub fn infer_output_shapes(&mut self) -> Result<()> {
        let feeds: Vec<(String, Tensor)> = self
            .inputs
            .iter()
            .map(|spec| (spec.name.clone(), Tensor::zeros(&spec.shape)))
            .collect();
        let produced = self.run(&feeds)?;
        for (spec, tensor) in self.outputs.iter_mut().zip(produced) {
            spec.shape = tensor.dims().to_vec();
        }
        Ok(())
    }

    /// Run the plan and return only the declared outputs.
    pub fn run(&self, feeds: &[(String, Tensor)]) -> Result<Vec<Tensor>> {
        let mut values = self.execute(feeds)?;
        self.outputs
            .iter()
            .map(|o| values.remove(&o.name).ok_or_else(|| EdgeError::UnknownValue(o.name.clone())))
            .collect()
    }
}

fn lookup<'a>(
    name: &str,
    values: &'a BTreeMap<String, Tensor>,
    constants: &'a BTreeMap<String, Tensor>,
) -> Result<&'a Tensor> {
    values
        .get(name)
        .or_else(|| constants.get(name))
        .ok_or_else(|| EdgeError::UnknownValue(name.to_string()))
}

/// Evaluate one op in f32 against already-computed values and constants.
pub(crate) fn eval_op(
    op: &PlanOp,
    values: &BTreeMap<String, Tensor>,
    constants: &BTreeMap<String, Tensor>,
) -> Result<Tensor> {
    let get = |name: &str| lookup(name, values, constants);
    let out = match op {
        PlanOp::Conv2d { input, weight, bias, stride, padding, .. } => {
            let bias = bias.as_deref().map(get).transpose()?;
            conv2d(get(input)?, get(weight)?, bias, Conv2dGeometry::new(*stride, *padding))?
        }
        PlanOp::FullyConnected { input, weight, bias, .. } => {
            let y = get(input)?.matmul(&get(weight)?.transpose_2d()?)?;
            match bias {
                Some(b) => y.add(get(b)?)?,
                None => y,
            }
        }
        PlanOp::Add { lhs, rhs, .. } => get(lhs)?.add(get(rhs)?)?,
        PlanOp::Mul { lhs, rhs, .. } => get(lhs)?.mul(get(rhs)?)?,
        PlanOp::Relu { input, .. } => get(input)?.relu(),
    };
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// x:[1,2] -> fc(2->1, w=[3,4], b=1) ; y:[1,1,4,4] -> conv3x3 cross ; out = conv * fc
    pub(crate) fn two_input_plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("two-inputs");
        plan.inputs = vec![TensorSpec::new("input_0", &[1, 2]), TensorSpec::new("input_1", &[1, 1, 4, 4])];
        plan.outputs = vec![TensorSpec::new("output_0", &[1, 1, 4, 4])];
        plan.constants.insert("fc.weight".into(), Tensor::from_f32(&[3.0, 4.0], &[1, 2]));
        plan.constants.insert("fc.bias".into(), Tensor::from_f32(&[1.0], &[1]));
        plan.constants.insert(
            "conv.weight".into(),
            Tensor::from_f32(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0], &[1, 1, 3, 3]),
        );
        plan.constants.insert("conv.bias".into(), Tensor::zeros(&[1]));
        plan.ops = vec![
            PlanOp::FullyConnected {
                input: "input_0".into(),
                weight: "fc.weight".into(),
                bias: Some("fc.bias".into()),
                output: "fc_out".into(),
            },
            PlanOp::Conv2d {
                input: "input_1".into(),
                weight: "conv.weight".into(),
                bias: Some("conv.bias".into()),
                output: "conv_out".into(),
                stride: 1,
                padding: 1,
            },
            PlanOp::Mul { lhs: "conv_out".into(), rhs: "fc_out".into(), output: "output_0".into() },
        ];
        plan
    }

    #[test]
    fn test_validate_ok() {
        two_input_plan().validate().unwrap();
    }

    #[test]
    fn test_validate_unknown_operand() {
        let mut plan = two_input_plan();
        plan.ops.swap(1, 2);
        assert!(matches!(plan.validate(), Err(EdgeError::UnknownValue(v)) if v == "conv_out"));
    }

    #[test]
    fn test_validate_weight_must_be_constant() {
        let mut plan = two_input_plan();
        plan.constants.remove("fc.weight");
        assert!(matches!(plan.validate(), Err(EdgeError::MissingConstant(_))));
    }

    #[test]
    fn test_execute_two_inputs() {
        let plan = two_input_plan();
        let feeds = vec![
            ("input_0".to_string(), Tensor::from_f32(&[1.0, 1.0], &[1, 2])),
            ("input_1".to_string(), Tensor::ones(&[1, 1, 4, 4])),
        ];
        let out = plan.run(&feeds).unwrap();
        assert_eq!(out.len(), 1);
        let y = out[0].as_f32_slice();
        // fc = 3 + 4 + 1 = 8; corner sees 2 neighbours, interior sees 4
        assert_eq!(y[0], 16.0);
        assert_eq!(y[5], 32.0);
    }

    #[test]
    fn test_execute_reports_all_values() {
        let plan = two_input_plan();
        let feeds = vec![
            ("input_0".to_string(), Tensor::zeros(&[1, 2])),
            ("input_1".to_string(), Tensor::zeros(&[1, 1, 4, 4])),
        ];
        let values = plan.execute(&feeds).unwrap();
        for name in ["input_0", "input_1", "fc_out", "conv_out", "output_0"] {
            assert!(values.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_infer_output_shapes() {
        let mut plan = two_input_plan();
        plan.outputs[0].shape.clear();
        plan.infer_output_shapes().unwrap();
        assert_eq!(plan.outputs[0].shape, vec![1, 1, 4, 4]);
    }

    #[test]
    fn test_execute_rejects_bad_feed() {
        let plan = two_input_plan();
        let feeds = vec![("input_0".to_string(), Tensor::zeros(&[1, 3]))];
        assert!(matches!(plan.execute(&feeds), Err(EdgeError::FeedShape { .. })));
        assert!(matches!(plan.execute(&[]), Err(EdgeError::MissingFeed(_))));
    }

    #[test]
    fn test_plan_json_skips_constants() {
        let plan = two_input_plan();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"op\":\"fully_connected\""));
        let back: ExecutionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ops, plan.ops);
        assert!(back.constants.is_empty());
    }
}
