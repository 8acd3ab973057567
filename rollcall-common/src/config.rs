//! Configuration loading
//!
//! Authority credentials and endpoint resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (`<config dir>/rollcall/config.toml`)
//! 4. Compiled default (endpoint only; there is no default token)

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default authority API endpoint
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Environment variable carrying the bot token
pub const TOKEN_ENV: &str = "ROLLCALL_BOT_TOKEN";

/// Environment variable overriding the API endpoint
pub const API_URL_ENV: &str = "ROLLCALL_API_URL";

/// Resolved authority connection settings
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub api_url: String,
    pub token: Option<String>,
}

impl AuthorityConfig {
    /// The token is optional for offline operations (`reconcile` against a
    /// cached snapshot); network operations call this to fail with a clear
    /// message instead of a 401.
    pub fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "no bot token configured (set {TOKEN_ENV} or pass --token)"
            ))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    token: Option<String>,
    api_url: Option<String>,
}

/// Resolve authority settings following the priority order above
pub fn resolve_authority_config(
    cli_token: Option<String>,
    cli_api_url: Option<String>,
) -> AuthorityConfig {
    let file = load_config_file().unwrap_or_default();

    let token = cli_token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .or(file.token);

    let api_url = cli_api_url
        .or_else(|| std::env::var(API_URL_ENV).ok())
        .or(file.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    AuthorityConfig { api_url, token }
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rollcall").join("config.toml"))
}

fn load_config_file() -> Option<ConfigFile> {
    let path = config_file_path()?;
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<ConfigFile>(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_token_wins() {
        let cfg = resolve_authority_config(Some("cli-token".into()), None);
        assert_eq!(cfg.token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn test_default_api_url() {
        let cfg = resolve_authority_config(Some("t".into()), None);
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_missing_token_is_a_config_error() {
        let cfg = AuthorityConfig { api_url: DEFAULT_API_URL.into(), token: None };
        assert!(matches!(cfg.require_token(), Err(Error::Config(_))));
    }
}
