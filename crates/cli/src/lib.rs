pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "helmsman",
    about = "Helmsman platform assistant CLI",
    long_about = "Inspect configuration, check provider readiness, and run conversational turns against the configured model.",
    after_help = "Examples:\n  helmsman doctor --json\n  helmsman config\n  helmsman ask \"Create a storage account in eastus\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider credentials, and tokenizer readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Send one message through the assistant and print the structured reply")]
    Ask {
        #[arg(help = "Message to send")]
        message: String,
        #[arg(long, help = "Conversation id to label the turn with")]
        conversation: Option<String>,
        #[arg(long, help = "Emit the full response as JSON")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Ask { message, conversation, json } => {
            commands::ask::run(&message, conversation.as_deref(), json)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
