pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use autostream_core::config::LoadOptions;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "autostream",
    about = "AutoStream sales assistant CLI",
    long_about = "Chat with the AutoStream sales assistant, inspect session analytics, configuration, and readiness.",
    after_help = "Examples:\n  autostream chat\n  autostream stats --json\n  autostream doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to an autostream.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive conversation with the assistant")]
    Chat,
    #[command(about = "Print the conversation analytics report from the session log")]
    Stats {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and knowledge base loading")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config, ..LoadOptions::default() };

    let result = match cli.command {
        Command::Chat => commands::chat::run(options),
        Command::Stats { json } => commands::stats::run(options, json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Migrate => commands::migrate::run(options),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
