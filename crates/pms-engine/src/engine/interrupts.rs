use super::error::{EngineError, InterruptError};
use super::orchestration::OrchestrationEngine;
use super::signal::EngineSignal;
use crate::adviser::AdviserResponse;
use crate::events::{OrchestrationEvent, OrchestrationEventType};
use crate::execution::{Interrupt, InterruptEffect, InterruptType, NodeExecution};
use crate::repository::{active_node_executions, find_descendants, update_interrupt};
use pms_core::{FailureInfo, Status};
use serde_json::Value;
use std::cmp::Reverse;
use tracing::{debug, info};

impl OrchestrationEngine {
    /// Validates and stores an interrupt, then queues it for processing. Without a
    /// node id the interrupt targets the whole execution.
    pub fn register_interrupt(
        &self,
        interrupt_type: InterruptType,
        plan_execution_id: &str,
        node_execution_id: Option<&str>,
        metadata: Value,
    ) -> Result<Interrupt, EngineError> {
        let execution = self.plan_execution(plan_execution_id)?;
        if execution.status.is_terminal() {
            return Err(InterruptError::PlanExecutionFinished {
                plan_execution_id: plan_execution_id.to_string(),
            }
            .into());
        }
        let not_applicable = |reason: String| -> EngineError {
            InterruptError::NotApplicable {
                interrupt_type,
                reason,
            }
            .into()
        };

        match node_execution_id {
            Some(node_execution_id) => {
                let node = self
                    .repositories
                    .node_executions
                    .find_by_id(node_execution_id)?
                    .filter(|node| node.plan_execution_id == plan_execution_id)
                    .ok_or_else(|| InterruptError::NodeNotInExecution {
                        plan_execution_id: plan_execution_id.to_string(),
                        node_execution_id: node_execution_id.to_string(),
                    })?;
                if node.status.is_terminal() {
                    return Err(not_applicable(format!(
                        "node `{}` already ended {}",
                        node.identifier, node.status
                    )));
                }
                if interrupt_type.requires_intervention() && node.status != Status::InterventionWaiting {
                    return Err(not_applicable(format!(
                        "node `{}` is {}, not INTERVENTION_WAITING",
                        node.identifier, node.status
                    )));
                }
                if interrupt_type == InterruptType::Resume && node.status != Status::Paused {
                    return Err(not_applicable(format!("node `{}` is not paused", node.identifier)));
                }
            }
            None if interrupt_type.requires_intervention() => {
                return Err(not_applicable("a node execution id is required".to_string()));
            }
            None if interrupt_type == InterruptType::Resume && execution.status != Status::Paused => {
                return Err(not_applicable("the execution is not paused".to_string()));
            }
            None => {}
        }

        let duplicate = self
            .repositories
            .interrupts
            .find_by_plan_execution(plan_execution_id)?
            .iter()
            .any(|existing| {
                !existing.processed
                    && existing.interrupt_type == interrupt_type
                    && existing.node_execution_id.as_deref() == node_execution_id
            });
        if duplicate {
            return Err(InterruptError::Duplicate { interrupt_type }.into());
        }

        let interrupt = self.repositories.interrupts.save(Interrupt {
            uuid: uuid::Uuid::new_v4().to_string(),
            interrupt_type,
            plan_execution_id: plan_execution_id.to_string(),
            node_execution_id: node_execution_id.map(str::to_string),
            metadata,
            created_at: self.now(),
            processed: false,
            effects: Vec::new(),
            version: 0,
        })?;
        info!(
            plan_execution_id,
            interrupt_id = %interrupt.uuid,
            interrupt_type = %interrupt_type,
            node_execution_id = node_execution_id.unwrap_or_default(),
            "interrupt registered"
        );
        let mut event = OrchestrationEvent::new(OrchestrationEventType::InterruptRegistered)
            .with("interrupt_id", &interrupt.uuid)
            .with("interrupt_type", interrupt_type);
        if let Some(node_execution_id) = node_execution_id {
            event = event.for_node(node_execution_id);
        }
        self.publish(plan_execution_id, event);
        self.queue.push(EngineSignal::Interrupt {
            interrupt_id: interrupt.uuid.clone(),
        });
        Ok(interrupt)
    }

    pub(super) fn handle_interrupt(&self, interrupt_id: &str) -> Result<(), EngineError> {
        let Some(interrupt) = self.repositories.interrupts.find_by_id(interrupt_id)? else {
            debug!(interrupt_id, "unknown interrupt dropped");
            return Ok(());
        };
        if interrupt.processed {
            return Ok(());
        }
        let execution = self.plan_execution(&interrupt.plan_execution_id)?;
        let effects = if execution.status.is_terminal() {
            Vec::new()
        } else {
            match (interrupt.interrupt_type, interrupt.node_execution_id.as_deref()) {
                (InterruptType::Abort, None) => self.discontinue_plan(&interrupt, Status::Aborted)?,
                (InterruptType::Abort, Some(node_id)) => self.abort_node(&interrupt, node_id)?,
                (InterruptType::Expire, None) => self.discontinue_plan(&interrupt, Status::Expired)?,
                (InterruptType::Expire, Some(node_id)) => self.expire_node(&interrupt, node_id)?,
                (InterruptType::Pause, target) => self.pause(&interrupt, target)?,
                (InterruptType::Resume, target) => self.resume(&interrupt, target)?,
                (InterruptType::Retry, Some(node_id)) => self.intervene_retry(&interrupt, node_id)?,
                (InterruptType::Ignore, Some(node_id)) => {
                    self.intervene(&interrupt, node_id, Status::IgnoreFailed)?
                }
                (InterruptType::MarkSuccess, Some(node_id)) => {
                    self.intervene(&interrupt, node_id, Status::Succeeded)?
                }
                (InterruptType::MarkFailed, Some(node_id)) => {
                    self.intervene(&interrupt, node_id, Status::Failed)?
                }
                (InterruptType::Retry | InterruptType::Ignore | InterruptType::MarkSuccess | InterruptType::MarkFailed, None) => {
                    Vec::new()
                }
            }
        };

        update_interrupt(
            self.repositories.interrupts.as_ref(),
            interrupt_id,
            self.config.cas_retry_limit,
            |stored| {
                if stored.processed {
                    return None;
                }
                stored.processed = true;
                stored.effects = effects.clone();
                Some(())
            },
        )?;
        info!(
            plan_execution_id = %interrupt.plan_execution_id,
            interrupt_id,
            interrupt_type = %interrupt.interrupt_type,
            effects = effects.len(),
            "interrupt processed"
        );
        let mut event = OrchestrationEvent::new(OrchestrationEventType::InterruptProcessed)
            .with("interrupt_id", interrupt_id)
            .with("interrupt_type", interrupt.interrupt_type)
            .with("effects", &effects);
        if let Some(node_execution_id) = &interrupt.node_execution_id {
            event = event.for_node(node_execution_id);
        }
        self.publish(&interrupt.plan_execution_id, event);
        Ok(())
    }

    /// Ends every active node deepest first, then the execution.
    fn discontinue_plan(&self, interrupt: &Interrupt, status: Status) -> Result<Vec<InterruptEffect>, EngineError> {
        let mut active = active_node_executions(
            self.repositories.node_executions.as_ref(),
            &interrupt.plan_execution_id,
        )?;
        active.sort_by_key(|node| Reverse(node.ambiance.depth()));
        let mut effects = Vec::new();
        for node in active {
            if let Some((_, effect)) = self.discontinue_node(interrupt, &node.uuid, status)? {
                effects.push(effect);
            }
        }
        let failure_info = (status == Status::Expired)
            .then(|| FailureInfo::timeout("plan execution expired"));
        self.finish_plan(&interrupt.plan_execution_id, status, failure_info)?;
        Ok(effects)
    }

    fn abort_node(&self, interrupt: &Interrupt, node_execution_id: &str) -> Result<Vec<InterruptEffect>, EngineError> {
        let mut effects = self.discontinue_descendants(interrupt, node_execution_id, Status::Aborted)?;
        if let Some((ended, effect)) = self.discontinue_node(interrupt, node_execution_id, Status::Aborted)? {
            effects.push(effect);
            self.chain_ended(&ended)?;
        }
        Ok(effects)
    }

    /// Descendants expire silently; the target goes through its advisers so a retry
    /// policy can still pick it up.
    fn expire_node(&self, interrupt: &Interrupt, node_execution_id: &str) -> Result<Vec<InterruptEffect>, EngineError> {
        let mut effects = self.discontinue_descendants(interrupt, node_execution_id, Status::Expired)?;
        let node = self.load_node(node_execution_id)?;
        if node.status.is_terminal() {
            return Ok(effects);
        }
        let failure_info = FailureInfo::timeout(format!("`{}` timed out", node.identifier));
        self.advise(&node, Status::Expired, Some(failure_info))?;
        let effect = self.effect(interrupt, Some(&node), Some(Status::Expired));
        self.record_effect(&effect)?;
        effects.push(effect);
        Ok(effects)
    }

    fn discontinue_descendants(
        &self,
        interrupt: &Interrupt,
        node_execution_id: &str,
        status: Status,
    ) -> Result<Vec<InterruptEffect>, EngineError> {
        let mut descendants = find_descendants(
            self.repositories.node_executions.as_ref(),
            &interrupt.plan_execution_id,
            node_execution_id,
        )?;
        descendants.retain(NodeExecution::is_active);
        descendants.sort_by_key(|node| Reverse(node.ambiance.depth()));
        let mut effects = Vec::new();
        for node in descendants {
            if let Some((_, effect)) = self.discontinue_node(interrupt, &node.uuid, status)? {
                effects.push(effect);
            }
        }
        Ok(effects)
    }

    /// Ends one node as ABORTED or EXPIRED without advising it or telling its parent.
    fn discontinue_node(
        &self,
        interrupt: &Interrupt,
        node_execution_id: &str,
        status: Status,
    ) -> Result<Option<(NodeExecution, InterruptEffect)>, EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status.is_terminal() {
            return Ok(None);
        }
        let failure_info = (status == Status::Expired)
            .then(|| FailureInfo::timeout(format!("`{}` expired with its parent", node.identifier)));
        let Some(ended) = self.finish_node(&node.uuid, status, failure_info, false)? else {
            return Ok(None);
        };
        let effect = InterruptEffect {
            from_status: Some(node.status),
            ..self.effect(interrupt, Some(&ended), Some(status))
        };
        self.record_effect(&effect)?;
        Ok(Some((ended, effect)))
    }

    fn pause(&self, interrupt: &Interrupt, target: Option<&str>) -> Result<Vec<InterruptEffect>, EngineError> {
        let nodes = match target {
            None => {
                let paused = self.update_plan(&interrupt.plan_execution_id, |execution| {
                    if execution.status.is_terminal() || execution.status == Status::Paused {
                        return None;
                    }
                    execution.status = Status::Paused;
                    Some(())
                })?;
                if paused.is_none() {
                    return Ok(Vec::new());
                }
                active_node_executions(
                    self.repositories.node_executions.as_ref(),
                    &interrupt.plan_execution_id,
                )?
            }
            Some(node_execution_id) => self.subtree(interrupt, node_execution_id)?,
        };

        let mut effects = Vec::new();
        for node in nodes {
            // Queued nodes have nothing to park; their begin is deferred instead.
            let paused = self.update_node(&node.uuid, |node| {
                if node.status == Status::Queued || !node.status.can_transition_to(Status::Paused) {
                    return None;
                }
                node.paused_from = Some(node.status);
                node.status = Status::Paused;
                Some(())
            })?;
            if let Some((paused, ())) = paused {
                let effect = InterruptEffect {
                    from_status: node.status.into(),
                    ..self.effect(interrupt, Some(&paused), Some(Status::Paused))
                };
                self.record_effect(&effect)?;
                effects.push(effect);
            }
        }
        if target.is_some() {
            self.refresh_plan_status(&interrupt.plan_execution_id)?;
        }
        Ok(effects)
    }

    fn resume(&self, interrupt: &Interrupt, target: Option<&str>) -> Result<Vec<InterruptEffect>, EngineError> {
        let plan_execution_id = interrupt.plan_execution_id.as_str();
        let deferred = self.update_plan(plan_execution_id, |execution| {
            if execution.status.is_terminal() {
                return None;
            }
            if target.is_none() {
                if execution.status != Status::Paused {
                    return None;
                }
                execution.status = Status::Running;
            }
            Some(std::mem::take(&mut execution.deferred_signals))
        })?;
        let Some((_, deferred)) = deferred else {
            return Ok(Vec::new());
        };

        let nodes = match target {
            None => active_node_executions(self.repositories.node_executions.as_ref(), plan_execution_id)?,
            Some(node_execution_id) => self.subtree(interrupt, node_execution_id)?,
        };
        let mut effects = Vec::new();
        let mut resumed = Vec::new();
        for node in nodes {
            let restored = self.update_node(&node.uuid, |node| {
                if node.status != Status::Paused {
                    return None;
                }
                node.status = node.paused_from.take().unwrap_or(Status::Running);
                Some(())
            })?;
            if let Some((restored, ())) = restored {
                let effect = InterruptEffect {
                    from_status: Some(Status::Paused),
                    ..self.effect(interrupt, Some(&restored), Some(restored.status))
                };
                self.record_effect(&effect)?;
                effects.push(effect);
                resumed.push(restored.uuid);
            }
        }
        // Statuses are restored before anything moves so that parents are RUNNING again
        // by the time their children report back.
        for node_execution_id in &resumed {
            self.settle_resumed(node_execution_id)?;
        }
        self.refresh_plan_status(plan_execution_id)?;
        for signal in deferred {
            self.queue.push(signal);
        }
        Ok(effects)
    }

    /// Picks up whatever arrived for a node while it was paused.
    fn settle_resumed(&self, node_execution_id: &str) -> Result<(), EngineError> {
        let held = self.update_node(node_execution_id, |node| node.pending_response.take())?;
        if let Some((_, response)) = held {
            return self.process_step_response(node_execution_id, response);
        }
        let node = self.load_node(node_execution_id)?;
        let wait_complete = node.waiting.as_ref().is_some_and(|waiting| waiting.is_complete());
        match node.status {
            Status::AsyncWaiting | Status::TaskWaiting if wait_complete => self.continue_waiting(node_execution_id),
            Status::Running if node.children.as_ref().is_some_and(|children| children.pending == 0) => {
                self.finish_children(node_execution_id)
            }
            _ => Ok(()),
        }
    }

    fn intervene_retry(&self, interrupt: &Interrupt, node_execution_id: &str) -> Result<Vec<InterruptEffect>, EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status != Status::InterventionWaiting {
            return Ok(Vec::new());
        }
        let status = node.pending_status.unwrap_or(Status::Failed);
        let effect = self.effect(interrupt, Some(&node), Some(status));
        self.record_effect(&effect)?;
        let response = AdviserResponse::Retry {
            wait_ms: 0,
            attempt: node.retry_count() as u32 + 1,
        };
        if self.record_advice(&node, InterruptType::Retry.as_str(), status, &response)? {
            self.apply_adviser_response(&node, status, node.failure_info.clone(), response)?;
        }
        Ok(vec![effect])
    }

    /// Re-advises an intervention-waiting node as if its step had ended with `status`.
    fn intervene(
        &self,
        interrupt: &Interrupt,
        node_execution_id: &str,
        status: Status,
    ) -> Result<Vec<InterruptEffect>, EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status != Status::InterventionWaiting {
            return Ok(Vec::new());
        }
        let effect = self.effect(interrupt, Some(&node), Some(status));
        self.record_effect(&effect)?;
        let failure_info = if status.is_positive() && status != Status::IgnoreFailed {
            None
        } else {
            node.failure_info.clone()
        };
        self.advise(&node, status, failure_info)?;
        Ok(vec![effect])
    }

    /// The target and its active descendants.
    fn subtree(&self, interrupt: &Interrupt, node_execution_id: &str) -> Result<Vec<NodeExecution>, EngineError> {
        let mut nodes = vec![self.load_node(node_execution_id)?];
        nodes.extend(
            find_descendants(
                self.repositories.node_executions.as_ref(),
                &interrupt.plan_execution_id,
                node_execution_id,
            )?
            .into_iter()
            .filter(NodeExecution::is_active),
        );
        Ok(nodes)
    }

    fn effect(&self, interrupt: &Interrupt, node: Option<&NodeExecution>, to_status: Option<Status>) -> InterruptEffect {
        InterruptEffect {
            interrupt_id: interrupt.uuid.clone(),
            interrupt_type: interrupt.interrupt_type,
            node_execution_id: node.map(|node| node.uuid.clone()),
            from_status: node.map(|node| node.status),
            to_status,
            ts: self.now(),
        }
    }

    fn record_effect(&self, effect: &InterruptEffect) -> Result<(), EngineError> {
        let Some(node_execution_id) = &effect.node_execution_id else {
            return Ok(());
        };
        self.update_node(node_execution_id, |node| {
            node.interrupt_history.push(effect.clone());
            Some(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "interrupts_test.rs"]
mod tests;
