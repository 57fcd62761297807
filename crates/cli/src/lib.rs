pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::conversations::ConversationQuery;

#[derive(Debug, Parser)]
#[command(
    name = "leadbot",
    about = "Leadbot operator CLI",
    long_about = "Operate the lead bot: migrations, config inspection, readiness checks and conversation lookup.",
    after_help = "Examples:\n  leadbot doctor --json\n  leadbot config\n  leadbot conversations show 5213312345678"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, integration settings and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Inspect persisted conversations")]
    Conversations(ConversationCommand),
}

#[derive(Debug, Subcommand)]
enum ConversationCommand {
    #[command(about = "List conversations by most recent activity")]
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    #[command(about = "Show one conversation's lead, mode and CRM sync attempts")]
    Show { user_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Conversations(ConversationCommand::Recent { limit }) => {
            commands::conversations::run(ConversationQuery::Recent { limit })
        }
        Command::Conversations(ConversationCommand::Show { user_id }) => {
            commands::conversations::run(ConversationQuery::Show { user_id })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
