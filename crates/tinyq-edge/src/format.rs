//! `.tqf` model format: single-file int8 model container.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────────┐
//! │ Magic: "TQFL" (4 bytes)          │
//! │ Version: u32 LE                  │
//! │ Header size: u32 LE              │
//! ├──────────────────────────────────┤
//! │ Header JSON (I/O, quant, ops,    │
//! │ tensor index)                    │
//! ├──────────────────────────────────┤
//! │ Padding to 64-byte alignment     │
//! ├──────────────────────────────────┤
//! │ Weight blob (64-byte aligned     │
//! │ tensors)                         │
//! └──────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tinyq_core::DType;

use crate::plan::PlanOp;
use crate::quantize::{OpSet, Optimization, QuantParams};

/// Magic bytes identifying a .tqf file.
pub const MAGIC: &[u8; 4] = b"TQFL";

/// Current format version.
pub const VERSION: u32 = 1;

/// Alignment for the weight blob and every tensor inside it.
const BLOB_ALIGNMENT: usize = 64;

const PREAMBLE: usize = 12;

/// Index entry for a single tensor in the weight blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub nbytes: usize,
}

impl TensorEntry {
    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A graph input or output as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub quant: QuantParams,
}

/// Header metadata for a .tqf model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TqfHeader {
    pub name: String,
    pub optimization: Optimization,
    pub op_set: OpSet,
    pub inputs: Vec<IoSpec>,
    pub outputs: Vec<IoSpec>,
    /// Activation (and literal operand) quantization, keyed by value name.
    pub values: BTreeMap<String, QuantParams>,
    pub ops: Vec<PlanOp>,
    pub tensors: BTreeMap<String, TensorEntry>,
}

/// A loaded .tqf model: header + weight data.
#[derive(Debug, Clone, PartialEq)]
pub struct TqfModel {
    pub header: TqfHeader,
    pub weights: Vec<u8>,
}

impl TqfModel {
    /// Load a .tqf model from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < PREAMBLE {
            return Err(FormatError::TooSmall);
        }

        if &data[0..4] != MAGIC {
            return Err(FormatError::BadMagic);
        }

        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let header_size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if data.len() < PREAMBLE + header_size {
            return Err(FormatError::TooSmall);
        }

        let header: TqfHeader = serde_json::from_slice(&data[PREAMBLE..PREAMBLE + header_size])
            .map_err(|e| FormatError::InvalidHeader(e.to_string()))?;

        // Weight blob starts at next 64-byte aligned offset
        let blob_start = align_up(PREAMBLE + header_size, BLOB_ALIGNMENT);
        if data.len() < blob_start {
            return Err(FormatError::TooSmall);
        }
        let weights = data[blob_start..].to_vec();

        for (name, entry) in &header.tensors {
            let end = entry.offset.checked_add(entry.nbytes);
            if end.map_or(true, |end| end > weights.len()) {
                return Err(FormatError::TensorOutOfBounds(name.clone()));
            }
            if entry.nbytes != entry.dtype.storage_bytes(entry.numel()) {
                return Err(FormatError::InvalidHeader(format!(
                    "tensor '{name}' holds {} bytes for shape {:?}",
                    entry.nbytes, entry.shape
                )));
            }
        }

        Ok(TqfModel { header, weights })
    }

    /// Serialize this model to .tqf bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let header_json =
            serde_json::to_vec(&self.header).map_err(|e| FormatError::InvalidHeader(e.to_string()))?;
        let header_size = header_json.len();
        let header_size_u32 = u32::try_from(header_size)
            .map_err(|_| FormatError::InvalidHeader(format!("header too large: {header_size} bytes")))?;

        let blob_start = align_up(PREAMBLE + header_size, BLOB_ALIGNMENT);
        let padding = blob_start - (PREAMBLE + header_size);

        let mut buf = Vec::with_capacity(blob_start + self.weights.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&header_size_u32.to_le_bytes());
        buf.extend_from_slice(&header_json);
        buf.extend(std::iter::repeat(0u8).take(padding));
        buf.extend_from_slice(&self.weights);
        Ok(buf)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let data = std::fs::read(path.as_ref()).map_err(|e| FormatError::IoError(e.to_string()))?;
        Self::from_bytes(&data)
    }

    /// Write the model with a single `fs::write`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), bytes).map_err(|e| FormatError::IoError(e.to_string()))
    }

    /// Get raw bytes for a named tensor.
    pub fn tensor_data(&self, name: &str) -> Option<&[u8]> {
        let entry = self.header.tensors.get(name)?;
        self.weights.get(entry.offset..entry.offset + entry.nbytes)
    }

    fn typed_data(&self, name: &str, dtype: DType) -> Option<&[u8]> {
        if self.header.tensors.get(name)?.dtype != dtype {
            return None;
        }
        self.tensor_data(name)
    }

    /// Get tensor data as i8 (only valid for I8 tensors).
    pub fn tensor_i8(&self, name: &str) -> Option<&[i8]> {
        self.typed_data(name, DType::I8).map(bytemuck::cast_slice::<u8, i8>)
    }

    /// Decode an I32 tensor.
    pub fn tensor_i32(&self, name: &str) -> Option<Vec<i32>> {
        let data = self.typed_data(name, DType::I32)?;
        Some(data.chunks_exact(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
    }

    /// Decode an F32 tensor.
    pub fn tensor_f32(&self, name: &str) -> Option<Vec<f32>> {
        let data = self.typed_data(name, DType::F32)?;
        Some(data.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
    }

    /// Get per-channel scales for a quantized weight (stored as "{name}.scales").
    pub fn tensor_scales(&self, name: &str) -> Option<Vec<f32>> {
        self.tensor_f32(&format!("{name}.scales"))
    }

    pub fn tensor_shape(&self, name: &str) -> Option<&[usize]> {
        self.header.tensors.get(name).map(|e| e.shape.as_slice())
    }
}

/// Errors from .tqf parsing.
#[derive(Debug)]
pub enum FormatError {
    TooSmall,
    BadMagic,
    UnsupportedVersion(u32),
    InvalidHeader(String),
    TensorOutOfBounds(String),
    IoError(String),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::TooSmall => write!(f, "file too small for .tqf format"),
            FormatError::BadMagic => write!(f, "invalid magic bytes (expected TQFL)"),
            FormatError::UnsupportedVersion(v) => write!(f, "unsupported version: {}", v),
            FormatError::InvalidHeader(e) => write!(f, "invalid header: {}", e),
            FormatError::TensorOutOfBounds(name) => write!(f, "tensor '{}' extends past the weight blob", name),
            FormatError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FormatError {}

/// Round `n` up to the next multiple of `align`.
fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Builder for creating .tqf models programmatically.
pub struct TqfBuilder {
    header: TqfHeader,
    weight_buf: Vec<u8>,
}

impl TqfBuilder {
    pub fn new(name: &str, optimization: Optimization, op_set: OpSet) -> Self {
        Self {
            header: TqfHeader {
                name: name.to_string(),
                optimization,
                op_set,
                inputs: Vec::new(),
                outputs: Vec::new(),
                values: BTreeMap::new(),
                ops: Vec::new(),
                tensors: BTreeMap::new(),
            },
            weight_buf: Vec::new(),
        }
    }

    pub fn add_input(&mut self, spec: IoSpec) {
        self.header.inputs.push(spec);
    }

    pub fn add_output(&mut self, spec: IoSpec) {
        self.header.outputs.push(spec);
    }

    pub fn set_value_quant(&mut self, name: &str, params: QuantParams) {
        self.header.values.insert(name.to_string(), params);
    }

    /// Add a tensor (raw bytes) to the model.
    pub fn add_tensor(&mut self, name: &str, dtype: DType, shape: &[usize], data: &[u8]) {
        let offset = align_up(self.weight_buf.len(), BLOB_ALIGNMENT);
        self.weight_buf.resize(offset, 0);

        let entry = TensorEntry {
            dtype,
            shape: shape.to_vec(),
            offset,
            nbytes: data.len(),
        };
        self.header.tensors.insert(name.to_string(), entry);
        self.weight_buf.extend_from_slice(data);
    }

    pub fn add_i8(&mut self, name: &str, shape: &[usize], data: &[i8]) {
        self.add_tensor(name, DType::I8, shape, bytemuck::cast_slice(data));
    }

    pub fn add_i32(&mut self, name: &str, shape: &[usize], data: &[i32]) {
        self.add_tensor(name, DType::I32, shape, bytemuck::cast_slice(data));
    }

    pub fn add_f32(&mut self, name: &str, shape: &[usize], data: &[f32]) {
        self.add_tensor(name, DType::F32, shape, bytemuck::cast_slice(data));
    }

    /// Add an operation to the graph.
    pub fn add_op(&mut self, op: PlanOp) {
        self.header.ops.push(op);
    }

    /// Build the final TqfModel.
    pub fn build(self) -> TqfModel {
        TqfModel {
            header: self.header,
            weights: self.weight_buf,
        }
    }
}
