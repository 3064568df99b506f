//! Server configuration
//!
//! Layered with figment, later sources win:
//! 1. Built-in defaults
//! 2. TOML file (`fabricd.toml`, or the path given on the command line)
//! 3. `FABRICD_`-prefixed environment variables, nested with `__`
//!    (e.g. `FABRICD_REPLICATE__POLL_TIMEOUT_SECS=600`)
//! 4. `REPLICATE_API_TOKEN`

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::restyle::GenerationParams;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "fabricd.toml";

/// Default Replicate API base URL
pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub replicate: ReplicateConfig,
    pub generation: GenerationParams,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest accepted request body. Two base64 photos easily exceed axum's 2 MiB default.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            max_body_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Replicate API settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: DEFAULT_REPLICATE_API_BASE.to_string(),
            request_timeout_secs: 120,
            poll_interval_ms: 1000,
            poll_timeout_secs: 300,
        }
    }
}

impl ReplicateConfig {
    /// The API token, if set to something non-blank
    pub fn token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

// Keep the token out of logs
impl fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("api_token", &self.token().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Build the layered figment without extracting it
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("FABRICD_").split("__"))
            .merge(
                Env::raw()
                    .only(&["REPLICATE_API_TOKEN"])
                    .map(|_| "replicate.api_token".into()),
            )
    }

    /// Load configuration
    ///
    /// An explicitly named config file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()).into());
            }
        }
        Self::figment(path).extract()
    }
}
