use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub hostname: String,
    pub port: u16,
    pub protocol: String,
    pub description: String,
    pub added_at: DateTime<Utc>,
    pub last_ping: Option<DateTime<Utc>>,
    pub status: ServerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Up,
    Down,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub servers: BTreeMap<String, ServerInfo>,
}

/// Current selection plus the session obtained by `auth login`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub current_server: Option<String>,
    pub current_user: Option<String>,
    pub token: Option<String>,
}

impl ServerInfo {
    pub fn new(hostname: String, port: u16, protocol: String, description: String) -> Self {
        Self {
            hostname,
            port,
            protocol,
            description,
            added_at: Utc::now(),
            last_ping: None,
            status: ServerStatus::Unknown,
        }
    }

    /// Parse `http://host:port`; the port defaults by scheme
    pub fn from_url(raw: &str, description: String) -> anyhow::Result<Self> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };
        let url = url::Url::parse(&with_scheme)?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported scheme '{}'", url.scheme());
        }
        let hostname = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("Server URL has no host: {}", raw))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("Server URL has no port: {}", raw))?;
        Ok(Self::new(hostname, port, url.scheme().to_string(), description))
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.hostname, self.port)
    }

    pub fn update_ping(&mut self, status: ServerStatus) {
        self.last_ping = Some(Utc::now());
        self.status = status;
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("CMOD_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("custom-modules").join("cli")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn load<T: Default + for<'de> Deserialize<'de>>(file: &str) -> anyhow::Result<T> {
    let path = get_config_dir()?.join(file);
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save<T: Serialize>(file: &str, value: &T) -> anyhow::Result<()> {
    let path = get_config_dir()?.join(file);
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn load_server_config() -> anyhow::Result<ServerConfig> {
    load("server.json")
}

pub fn save_server_config(config: &ServerConfig) -> anyhow::Result<()> {
    save("server.json", config)
}

pub fn load_environment_config() -> anyhow::Result<EnvironmentConfig> {
    load("env.json")
}

pub fn save_environment_config(config: &EnvironmentConfig) -> anyhow::Result<()> {
    save("env.json", config)
}

/// The selected server, failing with a hint when none is set
pub fn current_server() -> anyhow::Result<(String, ServerInfo)> {
    let env = load_environment_config()?;
    let name = env
        .current_server
        .ok_or_else(|| anyhow::anyhow!("No current server set (use `cmod server add` / `cmod server use`)"))?;
    let servers = load_server_config()?;
    let info = servers
        .servers
        .get(&name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Server '{}' not found", name))?;
    Ok((name, info))
}

pub async fn ping_server(server_info: &ServerInfo) -> ServerStatus {
    let client = reqwest::Client::new();
    let url = format!("{}/health", server_info.url());

    match client.get(&url).timeout(std::time::Duration::from_secs(5)).send().await {
        Ok(response) if response.status().is_success() => ServerStatus::Up,
        _ => ServerStatus::Down,
    }
}
