//! Layer → ONNX node export.

use tinyq_nn::{Conv2d, Linear, Module};

use crate::builder::GraphBuilder;
use crate::proto::AttributeProto;

/// A layer that can emit itself into a `GraphBuilder`.
pub trait Export {
    /// Add this layer's initializers (named `{prefix}.weight` / `{prefix}.bias`)
    /// and nodes, consuming `input`. Returns the produced value's name.
    fn export(&self, graph: &mut GraphBuilder, prefix: &str, input: &str) -> String;
}

/// Register a layer's parameters as `{prefix}.{name}` initializers, weight first.
fn add_parameters(graph: &mut GraphBuilder, layer: &dyn Module, prefix: &str) -> Vec<String> {
    layer
        .named_parameters()
        .into_iter()
        .map(|(name, t)| graph.add_initializer(&format!("{prefix}.{name}"), t))
        .collect()
}

impl Export for Conv2d {
    fn export(&self, graph: &mut GraphBuilder, prefix: &str, input: &str) -> String {
        let mut inputs = vec![input.to_string()];
        inputs.extend(add_parameters(graph, self, prefix));

        let k = self.kernel_size() as i64;
        let s = self.stride() as i64;
        let p = self.padding() as i64;
        let attributes = vec![
            AttributeProto::ints("dilations", &[1, 1]),
            AttributeProto::int("group", 1),
            AttributeProto::ints("kernel_shape", &[k, k]),
            AttributeProto::ints("pads", &[p, p, p, p]),
            AttributeProto::ints("strides", &[s, s]),
        ];
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        graph.add_node("Conv", &refs, attributes)
    }
}

impl Export for Linear {
    fn export(&self, graph: &mut GraphBuilder, prefix: &str, input: &str) -> String {
        let mut inputs = vec![input.to_string()];
        inputs.extend(add_parameters(graph, self, prefix));
        let attributes = vec![
            AttributeProto::float("alpha", 1.0),
            AttributeProto::float("beta", 1.0),
            AttributeProto::int("transB", 1),
        ];
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        graph.add_node("Gemm", &refs, attributes)
    }
}
