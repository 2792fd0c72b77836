use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use prost::Message;
use tinyq_core::{Tensor, TensorSpec};

use crate::builder::tensor_from_proto;
use crate::proto::{tensor_shape_proto::dimension, GraphProto, ModelProto, NodeProto, ValueInfoProto};
use crate::{OnnxError, Result};

/// A declared graph output. `shape` is `None` unless the declaration gives a
/// concrete `dim_value` on every axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphOutput {
    pub name: String,
    pub shape: Option<Vec<usize>>,
}

/// A loaded (or freshly built) ONNX model.
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxModel {
    proto: ModelProto,
}

impl From<ModelProto> for OnnxModel {
    fn from(proto: ModelProto) -> Self {
        Self { proto }
    }
}

impl OnnxModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let model = Self::from_bytes(&fs::read(path)?)?;
        tracing::debug!(path = %path.display(), ops = %model.op_summary(), "loaded onnx model");
        Ok(model)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let proto = ModelProto::decode(bytes)?;
        Ok(Self { proto })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.proto.encode_to_vec()
    }

    /// Write the model, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn proto(&self) -> &ModelProto {
        &self.proto
    }

    pub fn graph(&self) -> Result<&GraphProto> {
        self.proto.graph.as_ref().ok_or(OnnxError::MissingGraph)
    }

    pub fn nodes(&self) -> Result<&[NodeProto]> {
        Ok(&self.graph()?.node)
    }

    /// Op types in graph order, joined with `+` (e.g. `Conv+Conv+Add`).
    pub fn op_summary(&self) -> String {
        match self.graph() {
            Ok(g) => g.node.iter().map(|n| n.op_type.as_str()).collect::<Vec<_>>().join("+"),
            Err(_) => String::new(),
        }
    }

    pub fn initializer_names(&self) -> Result<HashSet<&str>> {
        Ok(self.graph()?.initializer.iter().map(|t| t.name.as_str()).collect())
    }

    /// Inputs that must be fed at runtime: declared inputs that are not also
    /// initializers, in declaration order.
    ///
    /// Every dimension must be a concrete `dim_value`.
    pub fn runtime_inputs(&self) -> Result<Vec<TensorSpec>> {
        let constants = self.initializer_names()?;
        self.graph()?
            .input
            .iter()
            .filter(|vi| !constants.contains(vi.name.as_str()))
            .map(concrete_spec)
            .collect()
    }

    /// Declared graph outputs. Symbolic or missing shapes are allowed.
    pub fn outputs(&self) -> Result<Vec<GraphOutput>> {
        let outputs = self.graph()?.output.iter().map(|vi| GraphOutput {
            name: vi.name.clone(),
            shape: concrete_spec(vi).ok().map(|spec| spec.shape),
        });
        Ok(outputs.collect())
    }

    /// All initializers decoded to f32 tensors, keyed by name.
    pub fn initializers(&self) -> Result<BTreeMap<String, Tensor>> {
        self.graph()?
            .initializer
            .iter()
            .map(|t| Ok((t.name.clone(), tensor_from_proto(t)?)))
            .collect()
    }
}

fn concrete_spec(vi: &ValueInfoProto) -> Result<TensorSpec> {
    let tensor = vi.tensor_type().ok_or_else(|| OnnxError::MissingType(vi.name.clone()))?;
    let shape = tensor.shape.as_ref().ok_or(OnnxError::UnsupportedDimension {
        value: vi.name.clone(),
        axis: 0,
    })?;

    let mut dims = Vec::with_capacity(shape.dim.len());
    for (axis, d) in shape.dim.iter().enumerate() {
        match d.value {
            Some(dimension::Value::DimValue(v)) if v > 0 => dims.push(v as usize),
            _ => {
                return Err(OnnxError::UnsupportedDimension {
                    value: vi.name.clone(),
                    axis,
                })
            }
        }
    }
    Ok(TensorSpec::new(vi.name.clone(), &dims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::export::Export;
    use crate::proto::tensor_shape_proto::Dimension;
    use crate::proto::type_proto;
    use tinyq_nn::{Conv2d, Initializer};

    fn conv_model() -> OnnxModel {
        let conv = Conv2d::new(1, 4, 3, 1, 0, true, &Initializer::default());
        let mut g = GraphBuilder::new("conv");
        let x = g.add_input(&[1, 1, 10, 10]);
        let y = conv.export(&mut g, "conv", &x);
        g.add_output(&y, &[1, 4, 8, 8]).unwrap();
        OnnxModel::from(g.finish())
    }

    #[test]
    fn test_runtime_inputs_skip_initializers() {
        let mut model = conv_model();
        // Older exporters also list initializers as graph inputs.
        let graph = model.proto.graph.as_mut().unwrap();
        graph.input.push(ValueInfoProto::float_tensor("conv.weight", &[4, 1, 3, 3]));

        let inputs = model.runtime_inputs().unwrap();
        assert_eq!(inputs, vec![TensorSpec::new("input_0", &[1, 1, 10, 10])]);
    }

    fn tensor_type(vi: &mut ValueInfoProto) -> &mut type_proto::Tensor {
        match vi.r#type.as_mut().and_then(|t| t.value.as_mut()) {
            Some(type_proto::Value::TensorType(t)) => t,
            None => panic!("'{}' has no tensor type", vi.name),
        }
    }

    fn make_symbolic(vi: &mut ValueInfoProto, axis: usize) {
        tensor_type(vi).shape.as_mut().unwrap().dim[axis] = Dimension {
            value: Some(dimension::Value::DimParam("batch".into())),
            denotation: String::new(),
        };
    }

    #[test]
    fn test_symbolic_dimension_rejected() {
        let mut model = conv_model();
        make_symbolic(&mut model.proto.graph.as_mut().unwrap().input[0], 0);

        match model.runtime_inputs() {
            Err(OnnxError::UnsupportedDimension { value, axis }) => {
                assert_eq!(value, "input_0");
                assert_eq!(axis, 0);
            }
            other => panic!("expected UnsupportedDimension, got {other:?}"),
        }
    }

    #[test]
    fn test_outputs_allow_symbolic_and_missing_shapes() {
        let mut model = conv_model();
        let graph = model.proto.graph.as_mut().unwrap();
        make_symbolic(&mut graph.output[0], 0);
        let symbolic = graph.output[0].clone();
        let mut shapeless = symbolic.clone();
        shapeless.name = "shapeless".into();
        tensor_type(&mut shapeless).shape = None;
        graph.output.push(shapeless);

        let outputs = model.outputs().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].name, symbolic.name);
        assert_eq!(outputs[0].shape, None);
        assert_eq!(outputs[1].shape, None);
        assert!(model.runtime_inputs().is_ok());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/conv.onnx");
        let model = conv_model();
        model.save(&path).unwrap();

        let loaded = OnnxModel::load(&path).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.op_summary(), "Conv");
        assert_eq!(loaded.outputs().unwrap()[0].shape, Some(vec![1, 4, 8, 8]));
        let inits = loaded.initializers().unwrap();
        assert_eq!(inits["conv.weight"].dims(), &[4, 1, 3, 3]);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(OnnxModel::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
