//! Staging directory: a plan saved as `plan.json` + `variables.safetensors`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use safetensors::tensor::{serialize, TensorView};
use safetensors::SafeTensors;
use tinyq_core::Tensor;

use crate::plan::ExecutionPlan;
use crate::{EdgeError, Result};

pub const PLAN_FILE: &str = "plan.json";
pub const VARIABLES_FILE: &str = "variables.safetensors";

/// Write `plan` into `dir`, creating it if needed.
pub fn save_plan(plan: &ExecutionPlan, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(PLAN_FILE), serde_json::to_vec_pretty(plan)?)?;
    fs::write(dir.join(VARIABLES_FILE), serialize_constants(&plan.constants)?)?;
    tracing::debug!(dir = %dir.display(), constants = plan.constants.len(), "staged plan");
    Ok(())
}

/// Read a plan previously written by `save_plan`.
pub fn load_plan(dir: &Path) -> Result<ExecutionPlan> {
    let mut plan: ExecutionPlan = serde_json::from_slice(&fs::read(dir.join(PLAN_FILE))?)?;
    plan.constants = deserialize_constants(&fs::read(dir.join(VARIABLES_FILE))?)?;
    plan.validate()?;
    Ok(plan)
}

fn serialize_constants(constants: &BTreeMap<String, Tensor>) -> Result<Vec<u8>> {
    let views = constants
        .iter()
        .map(|(name, t)| {
            let view = TensorView::new(safetensors::Dtype::F32, t.dims().to_vec(), t.as_bytes())?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serialize(views, &None)?)
}

fn deserialize_constants(data: &[u8]) -> Result<BTreeMap<String, Tensor>> {
    let tensors = SafeTensors::deserialize(data)?;
    let mut out = BTreeMap::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != safetensors::Dtype::F32 {
            return Err(EdgeError::StagedDType {
                name,
                dtype: format!("{:?}", view.dtype()),
            });
        }
        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        out.insert(name, Tensor::from_vec(values, view.shape())?);
    }
    Ok(out)
}
