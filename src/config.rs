//! TOML-backed service configuration.
//!
//! Every field has a default, so a missing config file (or any missing key)
//! yields a runnable configuration. The file is looked up at the platform
//! config dir unless a path is given on the command line.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the SQLite database.
    pub workspace_dir: PathBuf,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access-token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Whether POST /register is accepted.
    pub allow_registration: bool,
    /// Whether a valid bearer token on the login request short-circuits
    /// credential verification ("Already logged in").
    pub allow_existing_session: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 30 * 24 * 3600,
            allow_registration: true,
            allow_existing_session: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when no
    /// path is given. An explicitly named file must exist; a missing default
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::read_file(p);
        }

        match default_config_path() {
            Some(p) if p.exists() => Self::read_file(&p),
            _ => Ok(Self::default()),
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Location of the SQLite database inside the workspace.
    pub fn database_path(&self) -> PathBuf {
        self.workspace_dir.join("auth.db")
    }
}

fn default_workspace_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "authgate")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".authgate"))
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "authgate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.auth.token_ttl_secs, 30 * 24 * 3600);
        assert!(config.auth.allow_registration);
        assert!(!config.auth.allow_existing_session);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            port = 8080

            [auth]
            allow_existing_session = true
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(config.auth.allow_existing_session);
        assert!(config.auth.allow_registration);
    }

    #[test]
    fn empty_toml_equals_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.gateway.port, Config::default().gateway.port);
        assert_eq!(config.auth.token_ttl_secs, Config::default().auth.token_ttl_secs);
    }

    #[test]
    fn database_path_is_inside_workspace() {
        let mut config = Config::default();
        config.workspace_dir = PathBuf::from("/tmp/authgate-test");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/authgate-test/auth.db")
        );
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/authgate.toml")));
        assert!(result.is_err());
    }
}
