use clap::Subcommand;
use serde_json::json;

use crate::cli::config::{
    load_environment_config, load_server_config, ping_server, save_environment_config, save_server_config,
    ServerInfo,
};
use crate::cli::utils::{output_empty_collection, output_success, output_value};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum ServerCommands {
    #[command(about = "Register remote server")]
    Add {
        #[arg(help = "Server URL, e.g. http://localhost:3000")]
        url: String,
        #[arg(help = "Server name (defaults to the hostname)")]
        name: Option<String>,
        #[arg(long, default_value = "", help = "Free-form description")]
        description: String,
    },

    #[command(about = "List all servers")]
    List,

    #[command(about = "Switch to server (persistent selection) or show current server")]
    Use {
        #[arg(help = "Server name to switch to")]
        name: Option<String>,
    },

    #[command(about = "Remove server from registry")]
    Delete {
        #[arg(help = "Server name to delete")]
        name: String,
    },

    #[command(about = "Health check specific server (defaults to current server)")]
    Ping {
        #[arg(help = "Server name to ping")]
        name: Option<String>,
    },
}

pub async fn handle(cmd: ServerCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ServerCommands::Add { url, name, description } => {
            let info = ServerInfo::from_url(&url, description)?;
            let name = name.unwrap_or_else(|| info.hostname.clone());

            let mut servers = load_server_config()?;
            if servers.servers.contains_key(&name) {
                anyhow::bail!("Server '{}' already exists", name);
            }
            let server_url = info.url();
            servers.servers.insert(name.clone(), info);
            save_server_config(&servers)?;

            // The first server added becomes current
            let mut env = load_environment_config()?;
            if env.current_server.is_none() {
                env.current_server = Some(name.clone());
                save_environment_config(&env)?;
            }

            output_success(
                &output_format,
                &format!("Added server '{}' ({})", name, server_url),
                Some(json!({ "name": name, "url": server_url })),
            )
        }
        ServerCommands::List => {
            let servers = load_server_config()?;
            if servers.servers.is_empty() {
                return output_empty_collection(&output_format, "servers", "No servers registered");
            }
            let current = load_environment_config()?.current_server;

            match output_format {
                OutputFormat::Json => output_value(&output_format, &serde_json::to_value(&servers.servers)?),
                OutputFormat::Text => {
                    for (name, info) in &servers.servers {
                        let marker = if current.as_deref() == Some(name.as_str()) { "*" } else { " " };
                        println!("{} {:<20} {:<40} {:?}", marker, name, info.url(), info.status);
                    }
                    Ok(())
                }
            }
        }
        ServerCommands::Use { name } => {
            let mut env = load_environment_config()?;
            let Some(name) = name else {
                return match &env.current_server {
                    Some(current) => output_value(&output_format, &json!({ "current_server": current })),
                    None => output_success(&output_format, "No current server set", None),
                };
            };

            if !load_server_config()?.servers.contains_key(&name) {
                anyhow::bail!("Server '{}' not found", name);
            }
            if env.current_server.as_deref() != Some(name.as_str()) {
                // Tokens belong to the server that issued them
                env.token = None;
                env.current_user = None;
            }
            env.current_server = Some(name.clone());
            save_environment_config(&env)?;
            output_success(
                &output_format,
                &format!("Switched to server '{}'", name),
                Some(json!({ "current_server": name })),
            )
        }
        ServerCommands::Delete { name } => {
            let mut servers = load_server_config()?;
            if servers.servers.remove(&name).is_none() {
                anyhow::bail!("Server '{}' not found", name);
            }
            save_server_config(&servers)?;

            let mut env = load_environment_config()?;
            if env.current_server.as_deref() == Some(name.as_str()) {
                env = Default::default();
                save_environment_config(&env)?;
            }
            output_success(&output_format, &format!("Server '{}' deleted", name), None)
        }
        ServerCommands::Ping { name } => {
            let name = match name {
                Some(name) => name,
                None => load_environment_config()?
                    .current_server
                    .ok_or_else(|| anyhow::anyhow!("No current server set"))?,
            };

            let mut servers = load_server_config()?;
            let info = servers
                .servers
                .get_mut(&name)
                .ok_or_else(|| anyhow::anyhow!("Server '{}' not found", name))?;
            let status = ping_server(info).await;
            info.update_ping(status);
            let url = info.url();
            save_server_config(&servers)?;

            output_success(
                &output_format,
                &format!("{} ({}) is {:?}", name, url, status),
                Some(json!({ "name": name, "url": url, "status": status })),
            )
        }
    }
}
