//! Configuration loading and representation.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::render::RenderOptions;

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key}: {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
}

pub const GROUP_SIZE_ENV: &str = "CERTDROP_GROUP_SIZE";
pub const COOLDOWN_MS_ENV: &str = "CERTDROP_COOLDOWN_MS";
pub const STORAGE_DIR_ENV: &str = "CERTDROP_STORAGE_DIR";
pub const FONT_SIZE_ENV: &str = "CERTDROP_FONT_SIZE";

pub const DEFAULT_SUBJECT: &str = "Your Participation Certificate";
pub const DEFAULT_BODY: &str = "Dear [Name], Please find attached your certificate.";

/// Engine-wide settings shared by every job.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Records processed concurrently per group
    pub group_size: usize,
    /// Pause between consecutive groups
    pub cooldown: Duration,
    /// Root for per-job working directories and archives
    pub storage_root: PathBuf,
    /// Font size used when a job does not set one
    pub default_font_size: f32,
    /// Prefix of the archive location reported to pollers
    pub download_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            group_size: 3,
            cooldown: Duration::from_millis(1500),
            storage_root: PathBuf::from("generated"),
            default_font_size: RenderOptions::DEFAULT_FONT_SIZE,
            download_prefix: "/api/download".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CERTDROP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(GROUP_SIZE_ENV) {
            config.group_size = parse(GROUP_SIZE_ENV, &v)?;
        }
        if let Some(v) = lookup(COOLDOWN_MS_ENV) {
            config.cooldown = Duration::from_millis(parse(COOLDOWN_MS_ENV, &v)?);
        }
        if let Some(v) = lookup(STORAGE_DIR_ENV) {
            config.storage_root = PathBuf::from(v);
        }
        if let Some(v) = lookup(FONT_SIZE_ENV) {
            config.default_font_size = parse(FONT_SIZE_ENV, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: GROUP_SIZE_ENV,
                reason: "group size must be at least 1",
            });
        }
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            return Err(ConfigError::OutOfRange {
                key: FONT_SIZE_ENV,
                reason: "font size must be a positive number",
            });
        }
        Ok(())
    }
}

/// SMTP relay and OAuth client settings for the mail channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub max_connections: u32,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            max_connections: 3,
        }
    }
}

impl SmtpSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            host: lookup("SMTP_HOST").unwrap_or(defaults.host),
            client_id: lookup("CLIENT_ID").unwrap_or_default(),
            client_secret: lookup("CLIENT_SECRET").unwrap_or_default(),
            token_url: lookup("OAUTH_TOKEN_URL").unwrap_or(defaults.token_url),
            max_connections: defaults.max_connections,
        }
    }

    /// Whether OAuth client credentials are present.
    pub fn has_client(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
