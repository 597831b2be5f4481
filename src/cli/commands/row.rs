use clap::Subcommand;
use std::path::PathBuf;

use crate::cli::client::{ApiClient, RowListParams};
use crate::cli::utils::{output_success, output_value, values_from_args};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum RowCommands {
    #[command(about = "List rows of a module, computed fields included")]
    List {
        #[arg(help = "Module id")]
        module: String,
        #[arg(long = "where", help = "Filter as JSON, e.g. '{\"level\": {\"$gte\": 3}}'")]
        where_clause: Option<String>,
        #[arg(long, help = "Sort spec, e.g. 'S3 desc' or 'name,level desc'")]
        order: Option<String>,
        #[arg(long, help = "Maximum rows to return")]
        limit: Option<usize>,
        #[arg(long, help = "Rows to skip")]
        offset: Option<usize>,
    },

    #[command(about = "Show one row")]
    Get {
        #[arg(help = "Module id")]
        module: String,
        #[arg(help = "Row key")]
        key: String,
    },

    #[command(about = "Add a row")]
    Add {
        #[arg(help = "Module id")]
        module: String,
        #[arg(long, help = "Row values as inline JSON")]
        data: Option<String>,
        #[arg(long, short, help = "Row values from a JSON or YAML file")]
        file: Option<PathBuf>,
    },

    #[command(about = "Update a row (merges by default)")]
    Update {
        #[arg(help = "Module id")]
        module: String,
        #[arg(help = "Row key")]
        key: String,
        #[arg(long, help = "Row values as inline JSON")]
        data: Option<String>,
        #[arg(long, short, help = "Row values from a JSON or YAML file")]
        file: Option<PathBuf>,
        #[arg(long, help = "Replace all values instead of merging")]
        replace: bool,
    },

    #[command(about = "Delete a row")]
    Delete {
        #[arg(help = "Module id")]
        module: String,
        #[arg(help = "Row key")]
        key: String,
    },
}

pub async fn handle(cmd: RowCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::from_config()?;

    match cmd {
        RowCommands::List { module, where_clause, order, limit, offset } => {
            let params = RowListParams { where_clause, order, limit, offset };
            let page = client.list_rows(&module, &params).await?;
            if let OutputFormat::Text = output_format {
                eprintln!(
                    "{} of {} rows (offset {})",
                    page["items"].as_array().map_or(0, Vec::len),
                    page["total"],
                    page["offset"]
                );
            }
            output_value(&output_format, &page)
        }
        RowCommands::Get { module, key } => output_value(&output_format, &client.get_row(&module, &key).await?),
        RowCommands::Add { module, data, file } => {
            let values = values_from_args(data, file.as_deref())?;
            let row = client.add_row(&module, &values).await?;
            output_success(
                &output_format,
                &format!("Added row {}", row["key"].as_str().unwrap_or_default()),
                Some(row),
            )
        }
        RowCommands::Update { module, key, data, file, replace } => {
            let values = values_from_args(data, file.as_deref())?;
            let row = client.update_row(&module, &key, &values, replace).await?;
            output_success(&output_format, &format!("Updated row {}", key), Some(row))
        }
        RowCommands::Delete { module, key } => {
            client.delete_row(&module, &key).await?;
            output_success(&output_format, &format!("Deleted row {}", key), None)
        }
    }
}
