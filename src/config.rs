use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "number-window.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    /// Credentials come from the environment only, never from the file
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    /// Maximum number of distinct values kept in the window
    #[serde(default = "default_window_size")]
    pub size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_primes_path")]
    pub primes: String,
    #[serde(default = "default_fibonacci_path")]
    pub fibonacci: String,
    #[serde(default = "default_even_path")]
    pub even: String,
    #[serde(default = "default_random_path")]
    pub random: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Max journal entries before rotation
    #[serde(default = "default_journal_max")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { size: default_window_size() }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            base_url: default_base_url(),
            primes: default_primes_path(),
            fibonacci: default_fibonacci_path(),
            even: default_even_path(),
            random: default_random_path(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_journal_max(),
        }
    }
}

// Default value functions
fn default_listen_address() -> String { "0.0.0.0".to_string() }
fn default_listen_port() -> u16 { 9876 }
fn default_window_size() -> usize { 10 }
fn default_timeout_ms() -> u64 { 500 }
fn default_base_url() -> String { "http://20.244.56.144/evaluation-service".to_string() }
fn default_primes_path() -> String { "primes".to_string() }
fn default_fibonacci_path() -> String { "fibo".to_string() }
fn default_even_path() -> String { "even".to_string() }
fn default_random_path() -> String { "rand".to_string() }
fn default_true() -> bool { true }
fn default_journal_max() -> usize { 1000 }

impl Config {
    /// Load config from `path`. The default path may be absent, in which case
    /// built-in defaults are used; an explicit path must exist.
    pub fn load(path: &str, explicit: bool) -> anyhow::Result<Self> {
        let mut config = if !explicit && !Path::new(path).exists() {
            info!("No config file at {}, using defaults", path);
            Config::default()
        } else {
            Self::from_file(path)?
        };

        config.credentials = Credentials::from_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window.size == 0 {
            return Err(anyhow::anyhow!("window.size must be at least 1"));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(anyhow::anyhow!("upstream.timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            client_id: env_or_empty("CLIENT_ID"),
            client_secret: env_or_empty("CLIENT_SECRET"),
            access_token: env_or_empty("ACCESS_TOKEN"),
        }
    }
}

fn env_or_empty(key: &str) -> String {
    match std::env::var(key) {
        Ok(v) => v,
        Err(_) => {
            warn!("{} is not set, upstream calls will send an empty value", key);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.listen.port, 9876);
        assert_eq!(config.window.size, 10);
        assert_eq!(config.upstream.timeout_ms, 500);
        assert_eq!(config.upstream.primes, "primes");
        assert_eq!(config.upstream.fibonacci, "fibo");
        assert!(config.journal.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [window]
            size = 3

            [upstream]
            timeout_ms = 250
            base_url = "http://127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.window.size, 3);
        assert_eq!(config.upstream.timeout_ms, 250);
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.upstream.random, "rand");
        assert_eq!(config.listen.address, "0.0.0.0");
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = Config::parse("[window]\nsize = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(Config::load("/nonexistent/number-window.toml", true).is_err());
    }

    #[test]
    fn test_missing_default_file_falls_back() {
        let config = Config::load("/nonexistent/number-window.toml", false).unwrap();
        assert_eq!(config.window.size, 10);
    }
}
