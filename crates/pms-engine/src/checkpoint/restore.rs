use super::ExecutionCheckpoint;
use crate::engine::{EngineError, EngineSignal, OrchestrationEngine};
use crate::execution::PlanExecution;
use crate::timeout::TimeoutCallback;
use pms_core::{plan_hash, Status};
use std::collections::BTreeSet;
use tracing::info;

impl OrchestrationEngine {
    /// Captures one execution. Taken while the signal queue is drained, the checkpoint
    /// holds everything needed to continue.
    pub fn checkpoint(&self, plan_execution_id: &str) -> Result<ExecutionCheckpoint, EngineError> {
        let repositories = self.repositories();
        let execution = self.plan_execution(plan_execution_id)?;
        let plan = repositories
            .plans
            .find_plan(&execution.plan_id)?
            .ok_or_else(|| EngineError::PlanNotFound {
                plan_id: execution.plan_id.clone(),
            })?;
        let mut checkpoint = ExecutionCheckpoint::new(plan.as_ref().clone(), execution);
        checkpoint.node_executions = self.node_executions(plan_execution_id)?;
        checkpoint.interrupts = repositories.interrupts.find_by_plan_execution(plan_execution_id)?;
        checkpoint.outputs = repositories.outputs.find_by_plan_execution(plan_execution_id)?;
        checkpoint.timeout_instances = repositories
            .timeouts
            .find_all()?
            .into_iter()
            .filter(|instance| instance.plan_execution_id == plan_execution_id)
            .collect();
        checkpoint.next_event_seq = self.events().next_seq(plan_execution_id);
        checkpoint.normalize();
        Ok(checkpoint)
    }

    /// Loads a checkpoint into this engine's repositories and queues whatever work was
    /// in flight. The engine must not already hold the execution.
    pub fn restore_checkpoint(&self, checkpoint: ExecutionCheckpoint) -> Result<PlanExecution, EngineError> {
        let actual = plan_hash(&checkpoint.plan)?;
        for expected in [&checkpoint.plan_hash, &checkpoint.plan_execution.plan_hash] {
            if *expected != actual {
                return Err(EngineError::PlanHashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let repositories = self.repositories();
        repositories.plans.save_plan(checkpoint.plan)?;
        let execution = repositories.plan_executions.save(checkpoint.plan_execution)?;
        // Queued nodes behind a retry delay or initial wait start from their timer.
        let scheduled = checkpoint
            .timeout_instances
            .iter()
            .filter(|instance| {
                matches!(
                    instance.callback,
                    TimeoutCallback::BeginNode { .. } | TimeoutCallback::RunNode { .. }
                )
            })
            .map(|instance| instance.node_execution_id.clone())
            .collect::<BTreeSet<_>>();
        let mut resume = Vec::new();
        for node in checkpoint.node_executions {
            if node.status == Status::Queued
                && execution.status != Status::Paused
                && !scheduled.contains(&node.uuid)
            {
                resume.push(match node.mode {
                    None => EngineSignal::BeginNode {
                        node_execution_id: node.uuid.clone(),
                    },
                    Some(_) => EngineSignal::RunNode {
                        node_execution_id: node.uuid.clone(),
                    },
                });
            }
            repositories.node_executions.save(node)?;
        }
        for interrupt in checkpoint.interrupts {
            if !interrupt.processed {
                resume.push(EngineSignal::Interrupt {
                    interrupt_id: interrupt.uuid.clone(),
                });
            }
            repositories.interrupts.save(interrupt)?;
        }
        for output in checkpoint.outputs {
            repositories.outputs.insert(output)?;
        }
        for instance in checkpoint.timeout_instances {
            repositories.timeouts.save(instance)?;
        }
        self.events().set_next_seq(
            &execution.uuid,
            checkpoint.next_event_seq,
            execution.status.is_terminal(),
        );

        info!(
            plan_execution_id = %execution.uuid,
            status = %execution.status,
            resumed_signals = resume.len(),
            "checkpoint restored"
        );
        for signal in resume {
            self.queue().push(signal);
        }
        Ok(execution)
    }
}

#[cfg(test)]
#[path = "restore_test.rs"]
mod tests;
