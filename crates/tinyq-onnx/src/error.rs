use tinyq_core::TinyError;

/// Errors raised while building, reading or decoding ONNX models.
#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("model has no graph")]
    MissingGraph,

    #[error("value '{value}' has a non-concrete dimension at axis {axis}")]
    UnsupportedDimension { value: String, axis: usize },

    #[error("value '{0}' has no tensor type")]
    MissingType(String),

    #[error("tensor '{name}' has unsupported data type {data_type}")]
    UnsupportedDataType { name: String, data_type: i32 },

    #[error("tensor '{name}' payload holds {got} elements, dims say {expected}")]
    TensorPayload { name: String, expected: usize, got: usize },

    #[error("unknown value '{0}'")]
    UnknownValue(String),

    #[error(transparent)]
    Core(#[from] TinyError),
}
