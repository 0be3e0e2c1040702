use crate::plan::Plan;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over the canonical json encoding; maps inside plans are ordered, so equal plans hash equally.
pub fn stable_hash_hex(value: &impl Serialize) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(bytes);
    Ok(format!("{digest:x}"))
}

pub fn plan_hash(plan: &Plan) -> serde_json::Result<String> {
    stable_hash_hex(plan)
}

#[cfg(test)]
#[path = "hash_test.rs"]
mod tests;
