// src/config.rs

use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use dotenvy::dotenv;
use url::Url;

use crate::error::SyncError;

/// Settings of the question-bank document server.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub rust_log: String,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static/data"));

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!("Ignoring invalid BIND_ADDR {:?}: {}", raw, e);
                    None
                }
            })
            .unwrap_or_else(default_bind_addr);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:5001".to_string(),
                    "http://127.0.0.1:5001".to_string(),
                ]
            });

        Self {
            data_dir,
            bind_addr,
            rust_log,
            cors_origins,
        }
    }

    /// Configuration for tests: everything under `data_dir`, ephemeral port.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            rust_log: "info".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings of the client-side data store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix of the local storage keys (`<namespace>_data`, `<namespace>_backup`).
    pub namespace: String,
    /// Base URL of the document server. `None` runs offline.
    pub remote_url: Option<Url>,
    pub bank_path: String,
    pub derived_path: String,
    /// Pause between drain passes while pushes keep failing.
    pub retry_delay: Duration,
    /// Directory for the file-backed local cache. `None` keeps it in memory.
    pub cache_dir: Option<PathBuf>,
    pub notify_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "gep".to_string(),
            remote_url: None,
            bank_path: "/api/questions".to_string(),
            derived_path: "/api/derived-questions".to_string(),
            retry_delay: Duration::from_millis(1000),
            cache_dir: None,
            notify_capacity: 256,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        dotenv().ok();
        let defaults = Self::default();

        let namespace = env::var("GEP_NAMESPACE")
            .ok()
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or(defaults.namespace);

        let remote_url = match env::var("GEP_REMOTE_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(Url::parse(raw.trim())?),
            _ => None,
        };

        let retry_delay = env::var("GEP_SYNC_RETRY_MS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);

        let cache_dir = env::var("GEP_CACHE_DIR").ok().map(PathBuf::from);

        Ok(Self {
            namespace,
            remote_url,
            retry_delay,
            cache_dir,
            ..defaults
        })
    }

    pub fn with_remote(mut self, base: Url) -> Self {
        self.remote_url = Some(base);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(
            split_list(" http://a:1, ,http://b:2 "),
            vec!["http://a:1".to_string(), "http://b:2".to_string()]
        );
    }

    #[test]
    fn test_default_store_config_is_offline() {
        let config = StoreConfig::default();
        assert!(config.remote_url.is_none());
        assert!(config.cache_dir.is_none());
        assert_eq!(config.namespace, "gep");
    }

    #[test]
    fn test_default_bind_addr() {
        assert_eq!(default_bind_addr().to_string(), "0.0.0.0:5001");
    }
}
