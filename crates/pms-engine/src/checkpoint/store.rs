use super::{decode_checkpoint_json, encode_checkpoint_json, ExecutionCheckpoint};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported checkpoint schema `{schema}`")]
    Schema { schema: String },
}

pub fn save_checkpoint_to_path(
    path: impl AsRef<Path>,
    checkpoint: &ExecutionCheckpoint,
) -> Result<(), CheckpointStoreError> {
    let encoded = encode_checkpoint_json(checkpoint)?;
    std::fs::write(path, encoded)?;
    Ok(())
}

pub fn load_checkpoint_from_path(path: impl AsRef<Path>) -> Result<ExecutionCheckpoint, CheckpointStoreError> {
    let content = std::fs::read_to_string(path)?;
    let checkpoint = decode_checkpoint_json(&content)?;
    if checkpoint.schema != super::CHECKPOINT_SCHEMA_0_0_1 {
        return Err(CheckpointStoreError::Schema {
            schema: checkpoint.schema,
        });
    }
    Ok(checkpoint)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
