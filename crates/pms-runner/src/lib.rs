mod cli;
mod config;
mod logging;
mod run;
mod steps;

pub use cli::{Cli, Commands, InspectCommand, OutputFormat, RunCommand, ValidateCommand};
pub use config::{
    load_runner_config, validate_runner_config, EventsConfig, LocalTaskConfig, LoggingConfig,
    RunnerConfig, RunnerConfigError, RunnerEngineConfig, RUNNER_CONFIG_SCHEMA_0_0_1,
};
pub use logging::init_logging;
pub use run::{execute_inspect, execute_run, execute_validate, RunnerError};
pub use steps::{EchoStep, FailStep, LocalTaskExecutor, ShellStep, ECHO, FAIL, SHELL, SHELL_TASK};
