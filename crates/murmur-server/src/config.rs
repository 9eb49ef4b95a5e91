use std::path::PathBuf;

use anyhow::{Context, Result};

use murmur_gateway::HubConfig;

/// Where messages are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
    pub hub: HubConfig,
}

impl Config {
    /// Read `MURMUR_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "MURMUR_PORT", 3000)?;

        let db_path = lookup("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into());
        let store = match lookup("MURMUR_STORE").as_deref() {
            None | Some("sqlite") => StoreBackend::Sqlite(PathBuf::from(db_path)),
            Some("memory") => StoreBackend::Memory,
            Some(other) => anyhow::bail!("MURMUR_STORE must be 'sqlite' or 'memory', got '{}'", other),
        };

        let outbound_queue = parse_or(&lookup, "MURMUR_OUTBOUND_QUEUE", 256)?;
        if outbound_queue == 0 {
            anyhow::bail!("MURMUR_OUTBOUND_QUEUE must be at least 1");
        }

        let defaults = HubConfig::default();
        let hub = HubConfig {
            max_content_len: parse_or(&lookup, "MURMUR_MAX_CONTENT_LEN", defaults.max_content_len)?,
            ..defaults
        };

        Ok(Self {
            host,
            port,
            store,
            outbound_queue,
            hub,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
