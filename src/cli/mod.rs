pub mod client;
pub mod commands;
pub mod config;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "cmod")]
#[command(about = "cmod - Command-line interface for the Custom Modules API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Remote server management")]
    Server {
        #[command(subcommand)]
        cmd: commands::server::ServerCommands,
    },

    #[command(about = "Authentication and token management")]
    Auth {
        #[command(subcommand)]
        cmd: commands::auth::AuthCommands,
    },

    #[command(about = "Module definitions (dynamic tables)")]
    Module {
        #[command(subcommand)]
        cmd: commands::module::ModuleCommands,
    },

    #[command(about = "Row operations on a module")]
    Row {
        #[command(subcommand)]
        cmd: commands::row::RowCommands,
    },

    #[command(about = "Collection schema and access rules")]
    Collections {
        #[command(subcommand)]
        cmd: commands::collections::CollectionCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json && !cli.text {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Server { cmd } => commands::server::handle(cmd, output_format).await,
        Commands::Auth { cmd } => commands::auth::handle(cmd, output_format).await,
        Commands::Module { cmd } => commands::module::handle(cmd, output_format).await,
        Commands::Row { cmd } => commands::row::handle(cmd, output_format).await,
        Commands::Collections { cmd } => commands::collections::handle(cmd, output_format).await,
    }
}
