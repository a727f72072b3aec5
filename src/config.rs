//! Service configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Directory holding users.json, tasks.json and updates.json
    pub database_dir: PathBuf,

    /// Session lifetime in hours
    pub session_hours: u64,

    /// Origins allowed to call the API with credentials
    pub cors_origins: Vec<String>,

    /// Admin account created when the user store is empty
    pub bootstrap_admin: Option<BootstrapAdmin>,

    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    #[serde(default = "default_admin_name")]
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Generative-language API key; chat is disabled without one
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// Transcript entries sent back to the model as context
    pub history_limit: usize,
    pub timeout_secs: u64,
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            database_dir: PathBuf::from("database"),
            session_hours: 24,
            cors_origins: vec!["http://localhost:3000".to_string()],
            bootstrap_admin: None,
            chat: ChatConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            history_limit: 20,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("STAFFDESK_BIND") {
            self.bind_addr = bind;
        }
        if let Some(dir) = lookup("STAFFDESK_DATABASE_DIR") {
            self.database_dir = PathBuf::from(dir);
        }
        if let Some(hours) = lookup("STAFFDESK_SESSION_HOURS") {
            self.session_hours = hours.parse().map_err(|_| {
                AppError::Config(format!("STAFFDESK_SESSION_HOURS is not a number: {}", hours))
            })?;
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.chat.api_key = Some(key);
        }
        if let Some(model) = lookup("STAFFDESK_CHAT_MODEL") {
            self.chat.model = model;
        }
        if let (Some(email), Some(password)) = (
            lookup("STAFFDESK_ADMIN_EMAIL"),
            lookup("STAFFDESK_ADMIN_PASSWORD"),
        ) {
            self.bootstrap_admin = Some(BootstrapAdmin {
                full_name: default_admin_name(),
                email,
                password,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_hours == 0 {
            return Err(AppError::Config("session_hours must be at least 1".into()));
        }
        self.session_ttl()?;
        self.socket_addr()?;
        Ok(())
    }

    /// Session lifetime; `session_hours` too large to express in seconds is an error.
    pub fn session_ttl(&self) -> Result<Duration> {
        self.session_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                AppError::Config(format!("session_hours is too large: {}", self.session_hours))
            })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|_| AppError::Config(format!("invalid bind address: {}", self.bind_addr)))
    }
}
