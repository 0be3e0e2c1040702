use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "pms-runner")]
#[command(about = "Pipeline orchestration runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Check a plan document without running it.
    Validate(ValidateCommand),
    /// Run a plan to completion with the built-in demo steps.
    Run(RunCommand),
    /// Summarize a saved checkpoint.
    Inspect(InspectCommand),
}

#[derive(Debug, Clone, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ValidateCommand {
    #[arg(long)]
    pub plan: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunCommand {
    #[arg(long)]
    pub plan: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// JSON or YAML document bound to `inputs.*` references.
    #[arg(long)]
    pub inputs: Option<PathBuf>,
    /// Event JSONL destination; `-` writes to stdout.
    #[arg(long)]
    pub events_jsonl: Option<String>,
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, clap::Args)]
pub struct InspectCommand {
    #[arg(long)]
    pub checkpoint: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
