use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::client::ApiClient;
use crate::cli::config::{current_server, load_environment_config, save_environment_config};
use crate::cli::utils::{output_success, output_value, resolve_password};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Login to the current server")]
    Login {
        #[arg(help = "Username")]
        username: String,
        #[arg(long, help = "Password (read from CMOD_PASSWORD or stdin if not provided)")]
        password: Option<String>,
    },

    #[command(about = "Logout and forget the saved token")]
    Logout,

    #[command(about = "Register new user (the first user becomes admin)")]
    Register {
        #[arg(help = "Username")]
        username: String,
        #[arg(long, help = "Password (read from CMOD_PASSWORD or stdin if not provided)")]
        password: Option<String>,
    },

    #[command(about = "Show current user information")]
    Whoami,

    #[command(about = "Refresh authentication token")]
    Refresh,
}

fn save_session(data: &Value) -> anyhow::Result<String> {
    let token = data
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Server response carried no token"))?
        .to_string();
    let username = data["session"]["user"]["name"].as_str().map(str::to_string);

    let mut env = load_environment_config()?;
    env.token = Some(token);
    env.current_user = username.clone();
    save_environment_config(&env)?;
    Ok(username.unwrap_or_default())
}

pub async fn handle(cmd: AuthCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuthCommands::Login { username, password } => {
            let password = resolve_password(password)?;
            let (server, info) = current_server()?;
            let data = ApiClient::new(info.url())?.login(&username, &password).await?;
            let name = save_session(&data)?;
            output_success(
                &output_format,
                &format!("Logged in to '{}' as {}", server, name),
                Some(json!({ "server": server, "session": data["session"] })),
            )
        }
        AuthCommands::Register { username, password } => {
            let password = resolve_password(password)?;
            let (server, info) = current_server()?;
            let data = ApiClient::new(info.url())?.register(&username, &password).await?;
            let name = save_session(&data)?;
            output_success(
                &output_format,
                &format!(
                    "Registered '{}' on '{}' as {}",
                    name,
                    server,
                    data["session"]["user"]["role"].as_str().unwrap_or("user")
                ),
                Some(json!({ "server": server, "session": data["session"] })),
            )
        }
        AuthCommands::Logout => {
            let mut env = load_environment_config()?;
            if env.token.is_some() {
                // Best effort: tokens are stateless server-side
                if let Ok(client) = ApiClient::from_config() {
                    if let Err(e) = client.logout().await {
                        tracing::debug!("Logout request failed: {}", e);
                    }
                }
            }
            env.token = None;
            env.current_user = None;
            save_environment_config(&env)?;
            output_success(&output_format, "Logged out", None)
        }
        AuthCommands::Whoami => {
            let data = ApiClient::from_config()?.whoami().await?;
            output_value(&output_format, &data)
        }
        AuthCommands::Refresh => {
            let data = ApiClient::from_config()?.refresh().await?;
            save_session(&data)?;
            output_success(&output_format, "Token refreshed", None)
        }
    }
}
