mod restore;
mod store;
mod types;

pub use store::{load_checkpoint_from_path, save_checkpoint_to_path, CheckpointStoreError};
pub use types::{
    decode_checkpoint_json, encode_checkpoint_json, ExecutionCheckpoint, CHECKPOINT_SCHEMA_0_0_1,
};
