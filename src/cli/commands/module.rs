use clap::Subcommand;
use serde_json::Value;
use std::path::PathBuf;

use crate::cli::client::ApiClient;
use crate::cli::utils::{output_empty_collection, output_success, output_value, read_document};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum ModuleCommands {
    #[command(about = "List module definitions")]
    List,

    #[command(about = "Show one module with its fields")]
    Get {
        #[arg(help = "Module id")]
        id: String,
    },

    #[command(about = "Create module from a JSON or YAML definition (admin)")]
    Create {
        #[arg(long, short, help = "Definition file ({name, fields})")]
        file: PathBuf,
    },

    #[command(about = "Replace a module's name and fields (admin)")]
    Update {
        #[arg(help = "Module id")]
        id: String,
        #[arg(long, short, help = "Definition file ({name, fields})")]
        file: PathBuf,
    },

    #[command(about = "Delete module and all its rows")]
    Delete {
        #[arg(help = "Module id")]
        id: String,
    },
}

fn print_module_table(modules: &[Value]) {
    println!("{:<26} {:<24} {:>6}  {}", "ID", "NAME", "FIELDS", "UPDATED");
    for module in modules {
        println!(
            "{:<26} {:<24} {:>6}  {}",
            module["id"].as_str().unwrap_or_default(),
            module["name"].as_str().unwrap_or_default(),
            module["fields"].as_array().map_or(0, Vec::len),
            module["updated_at"].as_str().unwrap_or_default(),
        );
    }
}

pub async fn handle(cmd: ModuleCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::from_config()?;

    match cmd {
        ModuleCommands::List => {
            let data = client.list_modules().await?;
            let modules = data.as_array().cloned().unwrap_or_default();
            if modules.is_empty() {
                return output_empty_collection(&output_format, "modules", "No modules defined");
            }
            match output_format {
                OutputFormat::Json => output_value(&output_format, &data),
                OutputFormat::Text => {
                    print_module_table(&modules);
                    Ok(())
                }
            }
        }
        ModuleCommands::Get { id } => output_value(&output_format, &client.get_module(&id).await?),
        ModuleCommands::Create { file } => {
            let definition = read_document(&file)?;
            let module = client.create_module(&definition).await?;
            output_success(
                &output_format,
                &format!("Created module '{}' ({})", module["name"].as_str().unwrap_or_default(), module["id"].as_str().unwrap_or_default()),
                Some(module),
            )
        }
        ModuleCommands::Update { id, file } => {
            let definition = read_document(&file)?;
            let module = client.update_module(&id, &definition).await?;
            output_success(&output_format, &format!("Updated module {}", id), Some(module))
        }
        ModuleCommands::Delete { id } => {
            client.delete_module(&id).await?;
            output_success(&output_format, &format!("Deleted module {}", id), None)
        }
    }
}
