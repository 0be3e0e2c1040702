use clap::Parser;
use pms_runner::{execute_inspect, execute_run, execute_validate, Cli, Commands};

fn main() {
    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Validate(command) => execute_validate(command),
        Commands::Run(command) => execute_run(command),
        Commands::Inspect(command) => execute_inspect(command),
    };

    match result {
        Ok(output) => {
            println!("{output}");
        }
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}
