// Configuration module for the proxy server

use anyhow::Result;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rotation::RotationPolicy;

static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();
static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Durable KEY=value store holding the credential families.
    #[serde(default = "default_env_file")]
    pub env_file: String,

    #[serde(default = "default_request_retry")]
    pub request_retry: u32,

    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: u32,

    #[serde(default)]
    pub token_rotation: TokenRotationConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default = "ProviderEndpointConfig::atlas_default")]
    pub atlas: ProviderEndpointConfig,

    #[serde(default = "ProviderEndpointConfig::copilot_default")]
    pub copilot: ProviderEndpointConfig,

    #[serde(default)]
    pub openai_compatibility: Vec<OpenAICompatEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            api_keys: Vec::new(),
            env_file: default_env_file(),
            request_retry: default_request_retry(),
            max_retry_interval: default_max_retry_interval(),
            token_rotation: TokenRotationConfig::default(),
            supervisor: SupervisorConfig::default(),
            atlas: ProviderEndpointConfig::atlas_default(),
            copilot: ProviderEndpointConfig::copilot_default(),
            openai_compatibility: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    8417
}

fn default_env_file() -> String {
    ".env".to_string()
}

fn default_request_retry() -> u32 {
    3
}

fn default_max_retry_interval() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenRotationConfig {
    /// Key prefix naming the credential family in the env store; the exact
    /// key doubles as the persisted "currently active" marker.
    #[serde(default = "default_token_family")]
    pub family: String,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    #[serde(default = "default_exhausted_backoff_ms")]
    pub exhausted_backoff_ms: u64,

    /// Accepted secret formats for the family (GitHub token prefixes).
    #[serde(default = "default_secret_prefixes")]
    pub secret_prefixes: Vec<String>,
}

impl Default for TokenRotationConfig {
    fn default() -> Self {
        Self {
            family: default_token_family(),
            cooldown_ms: default_cooldown_ms(),
            max_failures: default_max_failures(),
            exhausted_backoff_ms: default_exhausted_backoff_ms(),
            secret_prefixes: default_secret_prefixes(),
        }
    }
}

impl TokenRotationConfig {
    pub fn policy(&self) -> RotationPolicy {
        RotationPolicy {
            cooldown: chrono::Duration::milliseconds(self.cooldown_ms as i64),
            max_failures: self.max_failures,
            exhausted_backoff: std::time::Duration::from_millis(self.exhausted_backoff_ms),
        }
    }
}

fn default_token_family() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_max_failures() -> u32 {
    3
}

fn default_exhausted_backoff_ms() -> u64 {
    5_000
}

fn default_secret_prefixes() -> Vec<String> {
    vec!["gho_".to_string(), "ghp_".to_string(), "ghu_".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SupervisorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_supervisor_command")]
    pub command: String,

    #[serde(default = "default_supervisor_app")]
    pub app_name: String,

    #[serde(default = "default_ecosystem_file")]
    pub ecosystem_file: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_supervisor_command(),
            app_name: default_supervisor_app(),
            ecosystem_file: default_ecosystem_file(),
        }
    }
}

fn default_supervisor_command() -> String {
    "pm2".to_string()
}

fn default_supervisor_app() -> String {
    "openai-proxy".to_string()
}

fn default_ecosystem_file() -> String {
    "ecosystem.config.cjs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderEndpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub base_url: String,
}

impl ProviderEndpointConfig {
    pub fn atlas_default() -> Self {
        Self {
            enabled: true,
            base_url: "https://models.inference.ai.azure.com".to_string(),
        }
    }

    pub fn copilot_default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.githubcopilot.com".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ApiKeyEntry {
    pub api_key: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OpenAICompatEntry {
    pub name: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key_entries: Vec<ApiKeyEntry>,
}

/// Load the config file (creating it with defaults on first run) into the
/// process-wide slot. Path comes from `OPENAI_PROXY_CONFIG` or
/// `~/.openai-proxy/config.yaml`.
pub fn init_config() -> Result<()> {
    let config_path = match std::env::var("OPENAI_PROXY_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let home = dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))?;
            home.join(".openai-proxy").join("config.yaml")
        }
    };

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    CONFIG_PATH.set(config_path.clone()).ok();

    let config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_yaml::from_str(&content)?
    } else {
        let default_config = AppConfig::default();
        let content = serde_yaml::to_string(&default_config)?;
        std::fs::write(&config_path, content)?;
        default_config
    };

    CONFIG.set(RwLock::new(config)).ok();

    tracing::info!("Config initialized from {:?}", config_path);
    Ok(())
}

pub fn get_config() -> Option<AppConfig> {
    CONFIG.get().map(|c| c.read().clone())
}

pub fn update_config(config: AppConfig) -> Result<()> {
    if let Some(lock) = CONFIG.get() {
        *lock.write() = config.clone();
    }

    if let Some(path) = CONFIG_PATH.get() {
        let content = serde_yaml::to_string(&config)?;
        std::fs::write(path, content)?;
    }

    Ok(())
}

pub fn get_config_path() -> Option<PathBuf> {
    CONFIG_PATH.get().cloned()
}

/// Resolve the env-store path from config, expanding a leading `~`.
pub fn resolve_env_file() -> PathBuf {
    let env_file = get_config()
        .map(|c| c.env_file)
        .unwrap_or_else(default_env_file);

    if env_file.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(env_file.trim_start_matches("~/"));
        }
    }

    PathBuf::from(env_file)
}
