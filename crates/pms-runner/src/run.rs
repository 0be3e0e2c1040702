use crate::cli::{InspectCommand, OutputFormat, RunCommand, ValidateCommand};
use crate::config::{load_runner_config, RunnerConfig, RunnerConfigError};
use crate::logging::init_logging;
use crate::steps::{EchoStep, FailStep, LocalTaskExecutor, ShellStep, ECHO, FAIL, SHELL};
use pms_core::{parse_plan_document, DocumentFormat, Plan, PlanIssue};
use pms_engine::{
    encode_event_jsonl_line, load_checkpoint_from_path, save_checkpoint_to_path, signal_channel,
    ChannelListener, CheckpointStoreError, Dispatcher, EngineError, ExecutionSummary, InterruptType,
    OrchestrationEngine, OrchestrationEventRecord, OrchestrationEventType,
};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{info, warn};

const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("read file failed `{path}`: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("plan is invalid:\n{0}")]
    PlanInvalid(String),
    #[error("inputs parse failed: {0}")]
    InputsParse(String),
    #[error("runner config load failed: {0}")]
    Config(#[from] RunnerConfigError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("checkpoint load failed `{path}`: {source}")]
    CheckpointLoad {
        path: String,
        #[source]
        source: CheckpointStoreError,
    },
    #[error("checkpoint save failed `{path}`: {source}")]
    CheckpointSave {
        path: String,
        #[source]
        source: CheckpointStoreError,
    },
    #[error("write events JSONL failed: {0}")]
    EventsIo(String),
    #[error("runtime start failed: {0}")]
    Runtime(std::io::Error),
    #[error("event stream closed before plan execution `{plan_execution_id}` ended")]
    EventStreamClosed { plan_execution_id: String },
    #[error("json encode failed: {0}")]
    JsonEncode(#[from] serde_json::Error),
}

pub fn execute_validate(command: &ValidateCommand) -> Result<String, RunnerError> {
    let text = read_file(&command.plan)?;
    let issues = match parse_plan_document(&text, document_format(&command.plan)) {
        Ok(document) => document.validate(),
        Err(issues) => issues,
    };
    let valid = !issues.iter().any(PlanIssue::is_error);
    let rendered = match command.format {
        OutputFormat::Json => serde_json::to_string_pretty(&json!({"valid": valid, "issues": issues}))?,
        OutputFormat::Text if issues.is_empty() => "plan is valid".to_string(),
        OutputFormat::Text => render_issue_lines(&issues),
    };
    if valid {
        Ok(rendered)
    } else {
        Err(RunnerError::PlanInvalid(rendered))
    }
}

pub fn execute_run(command: &RunCommand) -> Result<String, RunnerError> {
    let config = match &command.config {
        Some(path) => load_runner_config(path)?,
        None => RunnerConfig::default(),
    };
    init_logging(&config.logging);
    let plan = load_plan(&command.plan)?;
    let inputs = match &command.inputs {
        Some(path) => load_inputs(path)?,
        None => json!({}),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunnerError::Runtime)?;
    let summary = runtime.block_on(run_plan(plan, inputs, &config, command))?;
    render_summary(&summary, &command.format)
}

pub fn execute_inspect(command: &InspectCommand) -> Result<String, RunnerError> {
    let checkpoint =
        load_checkpoint_from_path(&command.checkpoint).map_err(|source| RunnerError::CheckpointLoad {
            path: command.checkpoint.display().to_string(),
            source,
        })?;
    let summary = ExecutionSummary::from_parts(&checkpoint.plan_execution, &checkpoint.node_executions);
    render_summary(&summary, &command.format)
}

async fn run_plan(
    plan: Plan,
    inputs: Value,
    config: &RunnerConfig,
    command: &RunCommand,
) -> Result<ExecutionSummary, RunnerError> {
    let (queue, receiver) = signal_channel();
    let queue = Arc::new(queue);
    let executor = Arc::new(LocalTaskExecutor::new(
        queue.clone(),
        tokio::runtime::Handle::current(),
        config.tasks.clone(),
    ));
    let engine = Arc::new(
        OrchestrationEngine::builder()
            .config(config.engine.engine.clone())
            .queue(queue)
            .task_executor(executor)
            .redact(config.events.redact_options())
            .step(ECHO, Arc::new(EchoStep))
            .step(FAIL, Arc::new(FailStep))
            .step(SHELL, Arc::new(ShellStep))
            .build()?,
    );
    let (sender, mut events) = unbounded_channel();
    engine.events().subscribe(Arc::new(ChannelListener::new(sender)));
    let mut sink = open_event_sink(command.events_jsonl.as_deref())?;

    let dispatcher = Dispatcher::spawn(engine.clone(), receiver, config.engine.dispatcher_options());
    let execution = engine.start_execution(plan, inputs)?;
    info!(plan_execution_id = %execution.uuid, plan_id = %execution.plan_id, "plan execution started");

    let run_timeout = Duration::from_millis(config.engine.run_timeout_ms);
    let outcome = match tokio::time::timeout(
        run_timeout,
        follow_events(&mut events, &execution.uuid, sink.as_mut()),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                plan_execution_id = %execution.uuid,
                timeout_ms = config.engine.run_timeout_ms,
                "run timed out, aborting plan execution"
            );
            engine.register_interrupt(
                InterruptType::Abort,
                &execution.uuid,
                None,
                json!({"reason": "run timeout"}),
            )?;
            tokio::time::timeout(
                ABORT_GRACE,
                follow_events(&mut events, &execution.uuid, sink.as_mut()),
            )
            .await
            .unwrap_or(Ok(()))
        }
    };
    dispatcher.shutdown().await;
    outcome?;
    if let Some(sink) = sink.as_mut() {
        sink.flush().map_err(|error| RunnerError::EventsIo(error.to_string()))?;
    }

    if let Some(path) = &command.checkpoint {
        let checkpoint = engine.checkpoint(&execution.uuid)?;
        save_checkpoint_to_path(path, &checkpoint).map_err(|source| RunnerError::CheckpointSave {
            path: path.display().to_string(),
            source,
        })?;
    }
    let summary = engine.execution_summary(&execution.uuid)?;
    info!(plan_execution_id = %execution.uuid, status = %summary.status, "plan execution finished");
    Ok(summary)
}

/// Writes records to the sink until the execution publishes ORCHESTRATION_END.
async fn follow_events(
    events: &mut UnboundedReceiver<OrchestrationEventRecord>,
    plan_execution_id: &str,
    mut sink: Option<&mut Box<dyn Write + Send>>,
) -> Result<(), RunnerError> {
    while let Some(record) = events.recv().await {
        if let Some(sink) = sink.as_mut() {
            let line = encode_event_jsonl_line(&record)?;
            sink.write_all(line.as_bytes())
                .map_err(|error| RunnerError::EventsIo(error.to_string()))?;
        }
        if record.plan_execution_id == plan_execution_id
            && record.event.event_type == OrchestrationEventType::OrchestrationEnd
        {
            return Ok(());
        }
    }
    Err(RunnerError::EventStreamClosed {
        plan_execution_id: plan_execution_id.to_string(),
    })
}

fn open_event_sink(target: Option<&str>) -> Result<Option<Box<dyn Write + Send>>, RunnerError> {
    match target {
        None => Ok(None),
        Some("-") => Ok(Some(Box::new(std::io::stdout()))),
        Some(path) => fs::File::create(path)
            .map(|file| Some(Box::new(std::io::BufWriter::new(file)) as Box<dyn Write + Send>))
            .map_err(|error| RunnerError::EventsIo(format!("create `{path}`: {error}"))),
    }
}

fn load_plan(path: &Path) -> Result<Plan, RunnerError> {
    let text = read_file(path)?;
    parse_plan_document(&text, document_format(path))
        .and_then(|document| document.into_plan())
        .map_err(|issues| RunnerError::PlanInvalid(render_issue_lines(&issues)))
}

fn load_inputs(path: &Path) -> Result<Value, RunnerError> {
    let text = read_file(path)?;
    let value = match document_format(path) {
        DocumentFormat::Json => serde_json::from_str::<Value>(&text)
            .map_err(|error| RunnerError::InputsParse(error.to_string()))?,
        _ => serde_yaml::from_str::<Value>(&text)
            .map_err(|error| RunnerError::InputsParse(error.to_string()))?,
    };
    if !value.is_object() {
        return Err(RunnerError::InputsParse(
            "inputs document must be an object".to_string(),
        ));
    }
    Ok(value)
}

fn read_file(path: &Path) -> Result<String, RunnerError> {
    fs::read_to_string(path).map_err(|source| RunnerError::ReadFile {
        path: path.display().to_string(),
        source,
    })
}

fn document_format(path: &Path) -> DocumentFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => DocumentFormat::Json,
        Some("yaml") | Some("yml") => DocumentFormat::Yaml,
        _ => DocumentFormat::Auto,
    }
}

fn render_issue_lines(issues: &[PlanIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_summary(summary: &ExecutionSummary, format: &OutputFormat) -> Result<String, RunnerError> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(summary)?,
        OutputFormat::Text => summary.render_text().trim_end().to_string(),
    })
}

#[cfg(test)]
#[path = "run_test.rs"]
mod tests;
