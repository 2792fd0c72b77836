//! Incremental construction of a single-graph ONNX model.

use std::collections::BTreeMap;

use tinyq_core::Tensor;

use crate::proto::{
    tensor_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorProto, ValueInfoProto,
};
use crate::{OnnxError, Result, IR_VERSION, OPSET_VERSION};

/// Builds a `ModelProto` node by node.
///
/// Intermediate values get generated names (`/Conv_0_output_0`); graph inputs
/// and outputs get their declared names (`input_0`, `output_0`).
pub struct GraphBuilder {
    name: String,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    initializers: Vec<TensorProto>,
    nodes: Vec<NodeProto>,
    op_counts: BTreeMap<String, usize>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            initializers: Vec::new(),
            nodes: Vec::new(),
            op_counts: BTreeMap::new(),
        }
    }

    /// Declare the next graph input (`input_{n}`) and return its name.
    pub fn add_input(&mut self, shape: &[usize]) -> String {
        let name = format!("input_{}", self.inputs.len());
        self.inputs.push(ValueInfoProto::float_tensor(&name, shape));
        name
    }

    /// Store a constant as a graph initializer.
    pub fn add_initializer(&mut self, name: &str, tensor: &Tensor) -> String {
        self.initializers.push(tensor_to_proto(name, tensor));
        name.to_string()
    }

    /// Append a node with a single output and return that output's name.
    pub fn add_node(&mut self, op_type: &str, inputs: &[&str], attributes: Vec<AttributeProto>) -> String {
        let index = self.op_counts.entry(op_type.to_string()).or_insert(0);
        let node_name = format!("/{op_type}_{index}");
        *index += 1;
        let output = format!("{node_name}_output_0");
        self.nodes.push(NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.clone()],
            name: node_name,
            op_type: op_type.to_string(),
            attribute: attributes,
            ..Default::default()
        });
        output
    }

    /// Declare `value` as the next graph output (`output_{n}`).
    ///
    /// The producing node's output and every later reference are renamed.
    pub fn add_output(&mut self, value: &str, shape: &[usize]) -> Result<String> {
        let name = format!("output_{}", self.outputs.len());
        let producer = self
            .nodes
            .iter()
            .position(|n| n.output.iter().any(|o| o == value))
            .ok_or_else(|| OnnxError::UnknownValue(value.to_string()))?;
        for node in &mut self.nodes[producer..] {
            for slot in node.output.iter_mut().chain(node.input.iter_mut()) {
                if slot == value {
                    *slot = name.clone();
                }
            }
        }
        self.outputs.push(ValueInfoProto::float_tensor(&name, shape));
        Ok(name)
    }

    pub fn finish(self) -> ModelProto {
        ModelProto {
            ir_version: IR_VERSION,
            producer_name: "tinyq".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(GraphProto {
                node: self.nodes,
                name: self.name,
                initializer: self.initializers,
                input: self.inputs,
                output: self.outputs,
                ..Default::default()
            }),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
            ..Default::default()
        }
    }
}

/// Encode an f32 tensor as a `TensorProto` with little-endian `raw_data`.
pub fn tensor_to_proto(name: &str, tensor: &Tensor) -> TensorProto {
    TensorProto {
        dims: tensor.dims().iter().map(|&d| d as i64).collect(),
        data_type: tensor_proto::DataType::Float as i32,
        name: name.to_string(),
        raw_data: tensor.as_bytes().to_vec(),
        ..Default::default()
    }
}

/// Decode a `TensorProto` into an f32 tensor.
///
/// Float payloads come from `raw_data` or `float_data`; integer payloads are
/// widened to f32.
pub fn tensor_from_proto(proto: &TensorProto) -> Result<Tensor> {
    let dims = proto
        .dims
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| OnnxError::UnsupportedDataType {
            name: proto.name.clone(),
            data_type: proto.data_type,
        })?;
    let expected: usize = dims.iter().product();
    let unsupported = || OnnxError::UnsupportedDataType {
        name: proto.name.clone(),
        data_type: proto.data_type,
    };
    let data_type = tensor_proto::DataType::try_from(proto.data_type).map_err(|_| unsupported())?;

    let raw = &proto.raw_data;
    let data: Vec<f32> = match data_type {
        tensor_proto::DataType::Float if !raw.is_empty() => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        tensor_proto::DataType::Float => proto.float_data.clone(),
        tensor_proto::DataType::Int64 if !raw.is_empty() => raw
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
        tensor_proto::DataType::Int64 => proto.int64_data.iter().map(|&v| v as f32).collect(),
        tensor_proto::DataType::Int32 if !raw.is_empty() => raw
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
            .collect(),
        tensor_proto::DataType::Int32 => proto.int32_data.iter().map(|&v| v as f32).collect(),
        _ => return Err(unsupported()),
    };

    if data.len() != expected {
        return Err(OnnxError::TensorPayload {
            name: proto.name.clone(),
            expected,
            got: data.len(),
        });
    }
    Ok(Tensor::from_vec(data, &dims)?)
}
