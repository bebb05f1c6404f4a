use std::env;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_env")]
    pub env: String, // file / server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub prefix: Option<String>,
    /// Path to the render JSON configuration
    #[serde(default = "default_render_config")]
    pub render_config: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_env() -> String {
    "file".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_render_config() -> String {
    "config.json".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Mount point of the API: `/` unless `PREFIX` is set. A missing leading
    /// slash is added.
    pub fn api_prefix(&self) -> String {
        match self.prefix.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) => format!("/{}", p),
            None => "/".to_string(),
        }
    }
}

pub fn get_config() -> Result<Config> {
    let env_var = env::var("env").unwrap_or("file".to_string());
    if env_var == "file" {
        info!("using .env file as environtment variable");
        let _ = dotenvy::dotenv();
    } else {
        info!("using server environtment as environtment variable");
    }
    envy::from_env::<Config>().context("Invalid environment configuration")
}

/// Build from explicit key/value pairs instead of the process environment.
pub fn config_from_iter<I>(vars: I) -> Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    envy::from_iter::<_, Config>(vars).context("Invalid environment configuration")
}
