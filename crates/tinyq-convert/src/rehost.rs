//! ONNX graph → `ExecutionPlan` lowering.
//!
//! Supported nodes: `Conv` (square kernel, symmetric padding, no dilation or
//! grouping), `Gemm`, `MatMul` with a constant right operand, `Add`, `Mul`
//! and `Relu`. `Gemm`/`MatMul` weights are rewritten to `[out, in]` and any
//! `alpha`/`beta` factors are folded into the constants.

use std::collections::BTreeMap;

use tinyq_core::{Tensor, TensorSpec};
use tinyq_edge::{ExecutionPlan, PlanOp};
use tinyq_onnx::proto::NodeProto;
use tinyq_onnx::OnnxModel;

use crate::{ConvertError, Result};

/// Lower `model` into a plan named `name`.
///
/// Fails with `UnsupportedDimension` before anything else if a runtime input
/// has a symbolic shape. Output shapes come from one run on zero feeds, so
/// outputs may be declared symbolic or without a shape; a concrete declared
/// shape must match.
pub fn rehost(model: &OnnxModel, name: &str) -> Result<ExecutionPlan> {
    let mut plan = ExecutionPlan::new(name);
    plan.inputs = model.runtime_inputs()?;
    let declared = model.outputs()?;
    plan.outputs = declared.iter().map(|out| TensorSpec::new(out.name.clone(), &[])).collect();
    plan.constants = model.initializers()?;

    for node in model.nodes()? {
        let op = lower_node(node, &mut plan.constants)?;
        plan.ops.push(op);
    }
    plan.validate()?;
    plan.infer_output_shapes()?;

    for (spec, out) in plan.outputs.iter().zip(&declared) {
        match &out.shape {
            Some(shape) if shape != &spec.shape => {
                return Err(ConvertError::OutputShape {
                    name: spec.name.clone(),
                    declared: shape.clone(),
                    inferred: spec.shape.clone(),
                })
            }
            _ => {}
        }
    }
    Ok(plan)
}

fn unsupported(node: &NodeProto, reason: impl Into<String>) -> ConvertError {
    ConvertError::UnsupportedOp {
        op: node.op_type.clone(),
        node: node.name.clone(),
        reason: reason.into(),
    }
}

fn input<'a>(node: &'a NodeProto, index: usize) -> Result<&'a str> {
    node.input
        .get(index)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| unsupported(node, format!("missing input {index}")))
}

fn optional_input(node: &NodeProto, index: usize) -> Option<String> {
    node.input.get(index).filter(|s| !s.is_empty()).cloned()
}

fn output(node: &NodeProto) -> Result<String> {
    node.output
        .first()
        .cloned()
        .ok_or_else(|| unsupported(node, "no output"))
}

fn constant<'a>(node: &NodeProto, constants: &'a BTreeMap<String, Tensor>, name: &str) -> Result<&'a Tensor> {
    constants
        .get(name)
        .ok_or_else(|| unsupported(node, format!("'{name}' must be an initializer")))
}

fn lower_node(node: &NodeProto, constants: &mut BTreeMap<String, Tensor>) -> Result<PlanOp> {
    match node.op_type.as_str() {
        "Conv" => lower_conv(node, constants),
        "Gemm" => lower_gemm(node, constants),
        "MatMul" => lower_matmul(node, constants),
        "Add" => Ok(PlanOp::Add {
            lhs: input(node, 0)?.to_string(),
            rhs: input(node, 1)?.to_string(),
            output: output(node)?,
        }),
        "Mul" => Ok(PlanOp::Mul {
            lhs: input(node, 0)?.to_string(),
            rhs: input(node, 1)?.to_string(),
            output: output(node)?,
        }),
        "Relu" => Ok(PlanOp::Relu {
            input: input(node, 0)?.to_string(),
            output: output(node)?,
        }),
        _ => Err(unsupported(node, "no int8 lowering")),
    }
}

fn lower_conv(node: &NodeProto, constants: &BTreeMap<String, Tensor>) -> Result<PlanOp> {
    let weight = input(node, 1)?;
    let w = constant(node, constants, weight)?;
    let dims = w.dims();
    if dims.len() != 4 || dims[2] != dims[3] {
        return Err(unsupported(node, format!("kernel {dims:?} is not square 2-D")));
    }

    if node.attr_int("group").unwrap_or(1) != 1 {
        return Err(unsupported(node, "grouped convolution"));
    }
    if let Some(auto_pad) = node.attr("auto_pad") {
        if !auto_pad.s.is_empty() && auto_pad.s != b"NOTSET" {
            return Err(unsupported(node, "auto_pad"));
        }
    }
    if node.attr_ints("dilations").is_some_and(|d| d.iter().any(|&v| v != 1)) {
        return Err(unsupported(node, "dilation"));
    }

    let stride = match node.attr_ints("strides") {
        None | Some([]) => 1,
        Some([s, rest @ ..]) if rest.iter().all(|r| r == s) && *s > 0 => *s as usize,
        Some(s) => return Err(unsupported(node, format!("non-uniform strides {s:?}"))),
    };
    let padding = match node.attr_ints("pads") {
        None | Some([]) => 0,
        Some([p, rest @ ..]) if rest.iter().all(|r| r == p) && *p >= 0 => *p as usize,
        Some(p) => return Err(unsupported(node, format!("asymmetric pads {p:?}"))),
    };

    let bias = optional_input(node, 2);
    if let Some(ref b) = bias {
        constant(node, constants, b)?;
    }

    Ok(PlanOp::Conv2d {
        input: input(node, 0)?.to_string(),
        weight: weight.to_string(),
        bias,
        output: output(node)?,
        stride,
        padding,
    })
}

fn lower_gemm(node: &NodeProto, constants: &mut BTreeMap<String, Tensor>) -> Result<PlanOp> {
    if node.attr_int("transA").unwrap_or(0) != 0 {
        return Err(unsupported(node, "transA"));
    }
    let alpha = node.attr_float("alpha").unwrap_or(1.0);
    let beta = node.attr_float("beta").unwrap_or(1.0);
    let trans_b = node.attr_int("transB").unwrap_or(0) != 0;

    let b_name = input(node, 1)?;
    let b = constant(node, constants, b_name)?;
    if b.ndim() != 2 {
        return Err(unsupported(node, "weight is not 2-D"));
    }

    // FullyConnected wants [out, in].
    let mut weight_name = b_name.to_string();
    let mut w = if trans_b { b.clone() } else { b.transpose_2d()? };
    if !trans_b || alpha != 1.0 {
        if alpha != 1.0 {
            w = w.mul_scalar(alpha);
        }
        weight_name = format!("{b_name}/fc_weight");
        constants.insert(weight_name.clone(), w.clone());
    }
    let out_features = w.dims()[0];

    let bias = match optional_input(node, 2) {
        None => None,
        Some(c_name) => {
            let c = constant(node, constants, &c_name)?;
            if c.numel() != out_features {
                return Err(unsupported(node, format!("bias shape {:?} is not per-output", c.dims())));
            }
            if c.ndim() == 1 && beta == 1.0 {
                Some(c_name)
            } else {
                let folded = c.reshape(&[out_features as isize])?.mul_scalar(beta);
                let folded_name = format!("{c_name}/fc_bias");
                constants.insert(folded_name.clone(), folded);
                Some(folded_name)
            }
        }
    };

    Ok(PlanOp::FullyConnected {
        input: input(node, 0)?.to_string(),
        weight: weight_name,
        bias,
        output: output(node)?,
    })
}

fn lower_matmul(node: &NodeProto, constants: &mut BTreeMap<String, Tensor>) -> Result<PlanOp> {
    let b_name = input(node, 1)?;
    let b = constant(node, constants, b_name)?;
    if b.ndim() != 2 {
        return Err(unsupported(node, "right operand is not a 2-D initializer"));
    }
    let weight_name = format!("{b_name}/fc_weight");
    let w = b.transpose_2d()?;
    constants.insert(weight_name.clone(), w);

    Ok(PlanOp::FullyConnected {
        input: input(node, 0)?.to_string(),
        weight: weight_name,
        bias: None,
        output: output(node)?,
    })
}
