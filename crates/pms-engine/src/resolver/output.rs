use super::scope::{prepare_level_runtime_id_indices, scope_key, OutputScope};
use crate::repository::{OutputRepository, RepositoryError};
use crate::timeout::Clock;
use pms_core::{Ambiance, RefObject, RefType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInstance {
    pub uuid: String,
    pub plan_execution_id: String,
    pub ref_type: RefType,
    pub name: String,
    pub level_runtime_id_idx: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("output `{name}` is already published in scope `{scope}`")]
    Duplicate { name: String, scope: OutputScope },
    #[error("no output named `{name}` is visible from the current level")]
    NotFound { name: String },
    #[error("scope {scope} does not enclose the current level")]
    ScopeUnavailable { scope: OutputScope },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub trait Resolver: Send + Sync {
    fn ref_type(&self) -> RefType;

    /// Nearest-scope lookup; `Ok(None)` when nothing is visible under `name`.
    fn find(&self, ambiance: &Ambiance, name: &str) -> Result<Option<Value>, ResolverError>;

    fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<Value, ResolverError> {
        self.find(ambiance, &ref_object.key)?
            .ok_or_else(|| ResolverError::NotFound {
                name: ref_object.key.clone(),
            })
    }

    /// Publishes a value. A name already taken in the same scope is rejected.
    fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: &OutputScope,
    ) -> Result<OutputInstance, ResolverError>;

    /// Publishes a value, replacing any earlier value under the same name and scope.
    fn overwrite(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: &OutputScope,
    ) -> Result<OutputInstance, ResolverError>;
}

/// Resolver over an output repository, partitioned by ref type.
pub struct ScopedOutputResolver {
    ref_type: RefType,
    outputs: Arc<dyn OutputRepository>,
    clock: Arc<dyn Clock>,
}

impl ScopedOutputResolver {
    pub fn new(ref_type: RefType, outputs: Arc<dyn OutputRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ref_type,
            outputs,
            clock,
        }
    }

    fn instance(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: &OutputScope,
    ) -> Result<OutputInstance, ResolverError> {
        let level_runtime_id_idx = scope_key(ambiance, scope)
            .ok_or_else(|| ResolverError::ScopeUnavailable { scope: scope.clone() })?;
        Ok(OutputInstance {
            uuid: uuid::Uuid::new_v4().to_string(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            ref_type: self.ref_type,
            name: name.to_string(),
            level_runtime_id_idx,
            value,
            producer_id: ambiance.current_runtime_id().map(str::to_string),
            created_at: self.clock.now_ms(),
        })
    }
}

impl Resolver for ScopedOutputResolver {
    fn ref_type(&self) -> RefType {
        self.ref_type
    }

    fn find(&self, ambiance: &Ambiance, name: &str) -> Result<Option<Value>, ResolverError> {
        for idx in prepare_level_runtime_id_indices(ambiance).iter().rev() {
            if let Some(output) =
                self.outputs
                    .find(&ambiance.plan_execution_id, self.ref_type, idx, name)?
            {
                return Ok(Some(output.value));
            }
        }
        Ok(None)
    }

    fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: &OutputScope,
    ) -> Result<OutputInstance, ResolverError> {
        let instance = self.instance(ambiance, name, value, scope)?;
        self.outputs.insert(instance).map_err(|error| match error {
            RepositoryError::AlreadyExists { .. } => ResolverError::Duplicate {
                name: name.to_string(),
                scope: scope.clone(),
            },
            other => other.into(),
        })
    }

    fn overwrite(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: &OutputScope,
    ) -> Result<OutputInstance, ResolverError> {
        let instance = self.instance(ambiance, name, value, scope)?;
        Ok(self.outputs.overwrite(instance)?)
    }
}

#[cfg(test)]
#[path = "output_test.rs"]
mod tests;
