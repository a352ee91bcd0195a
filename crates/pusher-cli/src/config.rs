//! CLI configuration at `~/.pusher/config.toml`.
//!
//! Holds the default app key, connection settings, and the authorization
//! endpoint for private and presence channels. CLI flags always override
//! config file values.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pusher_client::{AuthConfig, ClientConfig};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionSection,

    /// Authorization endpoint; absent means no private/presence channels.
    #[serde(default)]
    pub auth: Option<AuthSection>,
}

/// `[connection]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// App key used when none is given on the command line.
    #[serde(default)]
    pub app_key: Option<String>,

    #[serde(default)]
    pub cluster: Option<String>,

    /// Plain `ws://` on port 80.
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Overrides the server's activity timeout (seconds).
    #[serde(default)]
    pub activity_timeout_secs: Option<u64>,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            app_key: None,
            cluster: None,
            insecure: false,
            host: None,
            port: None,
            activity_timeout_secs: None,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    10
}

/// `[auth]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    pub url: String,

    /// Extra form fields sent with every authorization request.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Connection flags given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cluster: Option<String>,
    pub insecure: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_url: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// The app key: the command-line value, else the configured one.
    pub fn app_key(&self, given: Option<&str>) -> Result<String> {
        given
            .map(str::to_string)
            .or_else(|| self.connection.app_key.clone())
            .filter(|key| !key.is_empty())
            .context("no app key given and none set in [connection] app_key")
    }

    /// Merge file values and flags into a client configuration.
    pub fn client_config(&self, overrides: &Overrides) -> ClientConfig {
        let conn = &self.connection;

        let auth = match (&overrides.auth_url, &self.auth) {
            (Some(url), section) => {
                let mut auth = AuthConfig::new(url.clone());
                if let Some(section) = section {
                    auth.params = pairs(&section.params);
                    auth.headers = pairs(&section.headers);
                }
                Some(auth)
            }
            (None, Some(section)) => Some(AuthConfig {
                url: section.url.clone(),
                params: pairs(&section.params),
                headers: pairs(&section.headers),
            }),
            (None, None) => None,
        };

        ClientConfig {
            cluster: overrides.cluster.clone().or_else(|| conn.cluster.clone()),
            insecure: overrides.insecure || conn.insecure,
            host: overrides.host.clone().or_else(|| conn.host.clone()),
            port: overrides.port.or(conn.port),
            activity_timeout: conn.activity_timeout_secs.map(Duration::from_secs),
            handshake_timeout: Duration::from_secs(conn.handshake_timeout_secs),
            auth,
            ..Default::default()
        }
    }
}

fn pairs(map: &BTreeMap<String, String>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
