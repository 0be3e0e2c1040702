use super::instance::{TimeoutCallback, TimeoutInstance};
use super::tracker::{StatusUpdateTimeoutEvent, TimeoutTracker};
use crate::registry::{Registry, RegistryError};
use crate::repository::{cas_update, RepositoryError, TimeoutInstanceRepository};
use pms_core::Status;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("no timeout tracker is registered for dimension `{dimension}`")]
    UnknownDimension { dimension: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Registers, advances and fires timeout instances stored in a repository.
pub struct TimeoutEngine {
    trackers: Arc<Registry<dyn TimeoutTracker>>,
    repository: Arc<dyn TimeoutInstanceRepository>,
    retry_limit: usize,
}

impl TimeoutEngine {
    pub fn new(
        trackers: Arc<Registry<dyn TimeoutTracker>>,
        repository: Arc<dyn TimeoutInstanceRepository>,
        retry_limit: usize,
    ) -> Self {
        Self {
            trackers,
            repository,
            retry_limit,
        }
    }

    fn tracker(&self, dimension: &str) -> Result<Arc<dyn TimeoutTracker>, TimeoutError> {
        self.trackers.obtain(dimension).map_err(|error| match error {
            RegistryError::UnregisteredKeyAccess { key, .. } | RegistryError::DuplicateRegistry { key, .. } => {
                TimeoutError::UnknownDimension { dimension: key }
            }
        })
    }

    pub fn register(
        &self,
        plan_execution_id: &str,
        dimension: &str,
        timeout_ms: u64,
        callback: TimeoutCallback,
        now_ms: i64,
    ) -> Result<TimeoutInstance, TimeoutError> {
        let tracker = self.tracker(dimension)?;
        let instance = TimeoutInstance {
            uuid: uuid::Uuid::new_v4().to_string(),
            plan_execution_id: plan_execution_id.to_string(),
            node_execution_id: callback.node_execution_id().to_string(),
            dimension: dimension.to_string(),
            tracker: tracker.start(timeout_ms, now_ms),
            callback,
            created_at: now_ms,
            version: 0,
        };
        Ok(self.repository.save(instance)?)
    }

    /// Feeds a node status change to every tracker attached to the node.
    pub fn on_status_update(
        &self,
        node_execution_id: &str,
        status: Status,
        now_ms: i64,
    ) -> Result<(), TimeoutError> {
        let event = StatusUpdateTimeoutEvent {
            status,
            ts_ms: now_ms,
        };
        for instance in self.repository.find_by_node_execution(node_execution_id)? {
            let tracker = self.tracker(&instance.dimension)?;
            let updated = cas_update(
                "timeout_instance",
                &instance.uuid,
                self.retry_limit,
                |id| self.repository.find_by_id(id),
                |instance| self.repository.compare_and_swap(instance),
                |instance| {
                    let before = instance.tracker.clone();
                    tracker.on_event(&mut instance.tracker, &event);
                    (instance.tracker != before).then_some(())
                },
            );
            match updated {
                Ok(_) => {}
                // Fired and deleted by a concurrent poll.
                Err(RepositoryError::NotFound { .. }) => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    pub fn delete_for_node(&self, node_execution_id: &str) -> Result<usize, TimeoutError> {
        let mut deleted = 0;
        for instance in self.repository.find_by_node_execution(node_execution_id)? {
            if self.repository.delete(&instance.uuid)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn delete_for_plan_execution(&self, plan_execution_id: &str) -> Result<usize, TimeoutError> {
        let mut deleted = 0;
        for instance in self.repository.find_all()? {
            if instance.plan_execution_id == plan_execution_id && self.repository.delete(&instance.uuid)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Removes and returns every expired instance, oldest expiry first. An instance is
    /// returned to exactly one caller even when several pollers race.
    pub fn poll_expired(&self, now_ms: i64) -> Result<Vec<TimeoutInstance>, TimeoutError> {
        let mut expired = self
            .repository
            .find_all()?
            .into_iter()
            .filter(|instance| instance.tracker.is_expired(now_ms))
            .collect::<Vec<_>>();
        expired.sort_by_key(|instance| (instance.tracker.expires_at_ms(), instance.created_at));
        let mut fired = Vec::with_capacity(expired.len());
        for instance in expired {
            if self.repository.delete(&instance.uuid)? {
                debug!(
                    timeout_instance_id = %instance.uuid,
                    node_execution_id = %instance.node_execution_id,
                    dimension = %instance.dimension,
                    "timeout fired"
                );
                fired.push(instance);
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
