//! Runtime configuration derived from CLI arguments and environment

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::api::EventsClient;
use crate::cache::{FileStore, KeyValueStore, MemoryStore};
use crate::cli::Cli;

/// Settings shared by every command
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the events backend
    pub api_base_url: String,
    /// Explicit cache directory; `None` means the XDG default
    pub cache_dir: Option<PathBuf>,
    /// Whether to persist the cache to disk
    pub use_cache: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a Config from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            api_base_url: cli.api_url.clone(),
            cache_dir: cli.cache_dir.clone(),
            use_cache: !cli.no_cache,
            request_timeout: Duration::from_secs(cli.timeout),
        }
    }

    /// Opens the store this configuration points at
    ///
    /// Falls back to an in-memory store when caching is disabled or no cache
    /// directory can be determined.
    pub fn open_store(&self) -> Arc<dyn KeyValueStore> {
        if !self.use_cache {
            return Arc::new(MemoryStore::new());
        }
        self.disk_store()
    }

    /// Opens the store holding the login session
    ///
    /// `--no-cache` only disables the events cache; a session always goes to
    /// disk so that `login` is remembered by later commands.
    pub fn open_session_store(&self) -> Arc<dyn KeyValueStore> {
        self.disk_store()
    }

    fn disk_store(&self) -> Arc<dyn KeyValueStore> {
        match &self.cache_dir {
            Some(dir) => Arc::new(FileStore::with_dir(dir.clone())),
            None => match FileStore::new() {
                Some(store) => Arc::new(store),
                None => {
                    warn!("no cache directory available, data kept for this run only");
                    Arc::new(MemoryStore::new())
                }
            },
        }
    }

    /// Builds the API client for this configuration
    pub fn client(&self) -> EventsClient {
        EventsClient::new(self.api_base_url.clone(), self.request_timeout)
    }
}
