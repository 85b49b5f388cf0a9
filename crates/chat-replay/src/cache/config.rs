use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bon::Builder;
use tracing::warn;

use super::store::{CacheStore, JsonDirStore, MemoryStore};

pub const CACHE_DIR_ENV: &str = "CHAT_REPLAY_CACHE_DIR";
pub const CONCURRENCY_ENV: &str = "CHAT_REPLAY_CONCURRENCY";
pub const CACHE_MODE_ENV: &str = "CHAT_REPLAY_CACHE_MODE";

/// When example replies are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Every example is built when the interface is constructed.
    #[default]
    Eager,
    /// Each example is built on its first load.
    Lazy,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(CacheMode::Eager),
            "lazy" => Ok(CacheMode::Lazy),
            other => Err(format!("unknown cache mode `{other}`")),
        }
    }
}

/// Settings for [`ExampleCache`](crate::ExampleCache).
#[derive(Clone, Debug, Builder)]
pub struct CacheConfig {
    /// Maximum number of examples built at the same time.
    #[builder(default = 4)]
    pub concurrency_limit: usize,
    #[builder(default)]
    pub mode: CacheMode,
    /// Folder for persisted cache documents. `None` keeps entries in memory only.
    #[builder(into)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::builder().build()
    }
}

impl CacheConfig {
    /// Defaults overridden by `CHAT_REPLAY_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(CACHE_DIR_ENV)
            && !dir.trim().is_empty()
        {
            config.cache_dir = Some(PathBuf::from(dir));
        }

        if let Ok(raw) = std::env::var(CONCURRENCY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => config.concurrency_limit = limit,
                _ => warn!(value = %raw, "ignoring invalid {CONCURRENCY_ENV}"),
            }
        }

        if let Ok(raw) = std::env::var(CACHE_MODE_ENV) {
            match raw.parse::<CacheMode>() {
                Ok(mode) => config.mode = mode,
                Err(reason) => warn!(%reason, "ignoring invalid {CACHE_MODE_ENV}"),
            }
        }

        config
    }

    /// The store implied by `cache_dir`.
    pub fn store(&self) -> Arc<dyn CacheStore> {
        match &self.cache_dir {
            Some(dir) => Arc::new(JsonDirStore::new(dir.clone())),
            None => Arc::new(MemoryStore::default()),
        }
    }
}
