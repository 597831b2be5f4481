use clap::Subcommand;

use crate::cli::client::ApiClient;
use crate::cli::utils::output_value;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum CollectionCommands {
    #[command(about = "Show collection definitions and access rules (admin)")]
    List,
}

pub async fn handle(cmd: CollectionCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        CollectionCommands::List => {
            let client = ApiClient::from_config()?;
            output_value(&output_format, &client.collections().await?)
        }
    }
}
