use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WarpError};
use crate::models::Protocol;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Operator-controlled DNS zone; wildcard children are proxied.
    pub base_domain: String,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_domain: "proxywarp.com".to_string(),
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub db_file: PathBuf,
    pub token_length: usize,
    pub cleanup_interval_ms: u64,
    pub token_expiration_ms: u64,
    pub default_protocol: Protocol,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("./data/tokens.json"),
            token_length: 6,
            cleanup_interval_ms: 24 * 60 * 60 * 1000,
            token_expiration_ms: 30 * 24 * 60 * 60 * 1000,
            default_protocol: Protocol::Https,
        }
    }
}

impl DirectoryConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn token_expiration(&self) -> Duration {
        Duration::from_millis(self.token_expiration_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub user_agent: String,
    /// Upstream socket idle timeout and total proxy timeout.
    pub request_timeout_ms: u64,
    /// Hard per-request deadline before a 504 is emitted.
    pub watchdog_timeout_ms: u64,
    pub admin_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_ms: 20_000,
            watchdog_timeout_ms: 30_000,
            admin_timeout_ms: 15_000,
        }
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.admin_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 30_000 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub directory: DirectoryConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
}

impl Settings {
    /// Load settings from the TOML config file, then overlay environment
    /// variables. A missing default config file falls back to defaults;
    /// an explicitly given path must exist.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    WarpError::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                toml::from_str(&content)
                    .map_err(|e| WarpError::Config(format!("failed to parse config: {e}")))?
            }
            None => {
                let default_path = PathBuf::from("./proxywarp.toml");
                if default_path.exists() {
                    let content = std::fs::read_to_string(&default_path)
                        .map_err(|e| WarpError::Config(format!("failed to read config: {e}")))?;
                    toml::from_str(&content)
                        .map_err(|e| WarpError::Config(format!("failed to parse config: {e}")))?
                } else {
                    Settings::default()
                }
            }
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Overlay environment variables onto the loaded settings.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_parse::<u16>("PORT")? {
            self.server.port = port;
        }
        if let Some(base_domain) = env_var("BASE_DOMAIN") {
            self.server.base_domain = base_domain.to_ascii_lowercase();
        }
        if let Some(debug) = env_var("DEBUG") {
            self.server.debug = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        if let Some(db_file) = env_var("DB_FILE") {
            self.directory.db_file = PathBuf::from(db_file);
        }
        if let Some(len) = env_parse::<usize>("TOKEN_LENGTH")? {
            self.directory.token_length = len;
        }
        if let Some(ms) = env_parse::<u64>("CLEANUP_INTERVAL_MS")? {
            self.directory.cleanup_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("TOKEN_EXPIRATION_MS")? {
            self.directory.token_expiration_ms = ms;
        }
        if let Some(protocol) = env_var("DEFAULT_PROTOCOL") {
            self.directory.default_protocol = protocol.parse()?;
        }
        if let Some(user_agent) = env_var("USER_AGENT") {
            self.proxy.user_agent = user_agent;
        }
        if let Some(ms) = env_parse::<u64>("PROXY_TIMEOUT_MS")? {
            self.proxy.request_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("WATCHDOG_TIMEOUT_MS")? {
            self.proxy.watchdog_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("ADMIN_TIMEOUT_MS")? {
            self.proxy.admin_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("CACHE_TTL_MS")? {
            self.cache.ttl_ms = ms;
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| WarpError::Config(format!("invalid {name}: {value}"))),
        None => Ok(None),
    }
}
