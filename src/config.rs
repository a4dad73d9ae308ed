//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::directory::graph::GRAPH_BASE_URL;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub redirect_uri: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub graph_base_url: String,
}

impl ApiConfig {
    /// Graph endpoint, falling back to the public v1.0 endpoint when unset.
    pub fn graph_base_url(&self) -> &str {
        match self.graph_base_url.trim() {
            "" => GRAPH_BASE_URL,
            url => url.trim_end_matches('/'),
        }
    }
}

/// Connection retry policy for the console loop.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_connect_attempts: u32,
    pub retry_backoff_seconds: u64,
    pub sign_in_timeout_seconds: u64,
}

impl SessionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn sign_in_timeout(&self) -> Duration {
        Duration::from_secs(self.sign_in_timeout_seconds)
    }
}

/// Policy applied when creating users.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub force_mfa_registration: bool,
    pub default_usage_location: String,
}

impl DirectoryConfig {
    /// Usage location for new users, if one is configured.
    pub fn usage_location(&self) -> Option<String> {
        let location = self.default_usage_location.trim();
        if location.is_empty() {
            None
        } else {
            Some(location.to_uppercase())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub error_log_file: String,
}

impl LoggingConfig {
    /// Path of the append-only error log.
    ///
    /// Falls back to the platform data directory when no explicit path is configured.
    pub fn error_log_path(&self) -> PathBuf {
        if !self.error_log_file.trim().is_empty() {
            return PathBuf::from(self.error_log_file.trim());
        }
        crate::console::error_log::default_log_path()
    }
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(base_url) = env::var("GRAPH_BASE_URL") {
            config.api.graph_base_url = base_url;
        }

        if let Ok(force_mfa) = env::var("AZUREADMIN_FORCE_MFA") {
            config.directory.force_mfa_registration = parse_flag(&force_mfa)
                .with_context(|| format!("AZUREADMIN_FORCE_MFA has invalid value '{}'", force_mfa))?;
        }

        if let Ok(location) = env::var("AZUREADMIN_USAGE_LOCATION") {
            config.directory.default_usage_location = location;
        }

        if let Ok(log_file) = env::var("AZUREADMIN_ERROR_LOG") {
            config.logging.error_log_file = log_file;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.is_empty() || self.oauth.tenant == "YOUR_TENANT_ID" {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.session.max_connect_attempts == 0 {
            anyhow::bail!("session.max_connect_attempts must be at least 1");
        }

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
            self.oauth.tenant
        )
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.oauth.tenant
        )
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected true/false, got '{}'", other),
    }
}
