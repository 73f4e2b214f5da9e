//! Network-first loader with cache fallback
//!
//! `CacheFirstLoader::load` always tries the network first. A successful fetch
//! is persisted under the same key that the fallback path reads, so the last
//! good value can be served when the next fetch fails. Overlapping loads of the
//! same key share one fetch and one cache write.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::store::{KeyValueStore, StoreError};

/// Errors a fetch operation can fail with
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed (connectivity, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-2xx status
    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other failure reported by the fetch
    #[error("{0}")]
    Other(String),
}

/// Error returned by `CacheFirstLoader::load`
#[derive(Debug, Error)]
pub enum LoadError {
    /// The fetch failed and nothing usable was cached under the key
    #[error("'{key}' is unavailable: the fetch failed and no cached copy exists")]
    Unavailable {
        key: String,
        source: Arc<FetchError>,
    },
}

/// Where a loaded value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Freshly fetched from the network
    Network,
    /// Served from the store after a failed fetch
    Cache {
        /// When the value was cached, if the stored entry recorded it
        cached_at: Option<DateTime<Utc>>,
    },
}

/// A value returned by the loader, with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub data: T,
    pub source: Source,
}

impl<T> Loaded<T> {
    /// Whether the value came from the cache instead of the network
    pub fn is_stale(&self) -> bool {
        matches!(self.source, Source::Cache { .. })
    }
}

/// Informational messages published by the loader
///
/// Neither variant is an error for the caller; both describe a degraded but
/// successful load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadNotice {
    /// A cached value was served because the fetch failed
    StaleDataServed {
        key: String,
        cached_at: Option<DateTime<Utc>>,
        reason: String,
    },
    /// A fresh value could not be written to the store
    PersistenceFailed { key: String, reason: String },
}

/// Entry layout written to the store
#[derive(Serialize)]
struct CacheEntry<'a, T> {
    data: &'a T,
    cached_at: DateTime<Utc>,
}

/// Entry layout accepted from the store
///
/// Bare payloads (written without the envelope) are still served.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry<T> {
    Entry { data: T, cached_at: DateTime<Utc> },
    Bare(T),
}

impl<T> StoredEntry<T> {
    fn into_parts(self) -> (T, Option<DateTime<Utc>>) {
        match self {
            StoredEntry::Entry { data, cached_at } => (data, Some(cached_at)),
            StoredEntry::Bare(data) => (data, None),
        }
    }
}

type FetchOutcome = Result<Arc<dyn Any + Send + Sync>, Arc<FetchError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Pending fetch registered under a key
struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    in_flight: Mutex<HashMap<(String, TypeId), InFlight>>,
    next_id: AtomicU64,
    notices: Option<mpsc::UnboundedSender<LoadNotice>>,
}

impl Inner {
    /// Writes `value` under `key`; failures are reported, never returned
    async fn persist<T: Serialize + Sync>(&self, key: &str, value: &T) {
        let entry = CacheEntry {
            data: value,
            cached_at: Utc::now(),
        };
        let result = match serde_json::to_string(&entry) {
            Ok(json) => self.store.set(key, json).await,
            Err(e) => Err(StoreError::from(e)),
        };

        match result {
            Ok(()) => debug!(key, "cached fresh value"),
            Err(e) => {
                warn!(key, error = %e, "failed to cache fresh value");
                self.notify(LoadNotice::PersistenceFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn notify(&self, notice: LoadNotice) {
        if let Some(tx) = &self.notices {
            // Nobody listening is fine
            let _ = tx.send(notice);
        }
    }

    /// Drops the in-flight registration for `slot` if it still belongs to fetch `id`
    fn finish(&self, slot: &(String, TypeId), id: u64) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let finished = if in_flight.get(slot).map(|f| f.id) == Some(id) {
            in_flight.remove(slot)
        } else {
            None
        };
        // Release the lock before the shared fetch handle is dropped
        drop(in_flight);
        drop(finished);
    }
}

/// Registry entry owned by a running fetch
///
/// Dropping it removes the entry, whether the fetch finished or panicked.
struct Registration {
    inner: Arc<Inner>,
    slot: (String, TypeId),
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.finish(&self.slot, self.id);
    }
}

/// Network-first loader that falls back to the last persisted value
///
/// Cloning is cheap; clones share the store and the in-flight registry.
#[derive(Clone)]
pub struct CacheFirstLoader {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheFirstLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFirstLoader")
            .field("in_flight", &self.in_flight_count())
            .field("notices", &self.inner.notices.is_some())
            .finish()
    }
}

impl CacheFirstLoader {
    /// Creates a loader persisting into `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::build(store, None)
    }

    /// Creates a loader that also publishes `LoadNotice`s on `notices`
    pub fn with_notices(
        store: Arc<dyn KeyValueStore>,
        notices: mpsc::UnboundedSender<LoadNotice>,
    ) -> Self {
        Self::build(store, Some(notices))
    }

    fn build(
        store: Arc<dyn KeyValueStore>,
        notices: Option<mpsc::UnboundedSender<LoadNotice>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                notices,
            }),
        }
    }

    /// The store this loader persists into
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    /// Number of fetches currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Loads the value for `key`, preferring a fresh fetch
    ///
    /// # Arguments
    /// * `key` - Store key used both for writing fresh values and for fallback
    /// * `fetch_fresh` - Produces the network fetch; invoked at most once, and
    ///   not at all when an identical load is already in flight
    ///
    /// # Returns
    /// * `Ok(Loaded)` with `Source::Network` when the fetch succeeded
    /// * `Ok(Loaded)` with `Source::Cache` when the fetch failed but a cached
    ///   value exists; a `StaleDataServed` notice is published too
    /// * `Err(LoadError::Unavailable)` when the fetch failed and nothing usable
    ///   is cached
    pub async fn load<T, F, Fut>(&self, key: &str, fetch_fresh: F) -> Result<Loaded<T>, LoadError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let fetch = self.join_or_start::<T, F, Fut>(key, fetch_fresh);

        let error = match fetch.await {
            Ok(value) => match value.downcast::<T>() {
                Ok(data) => {
                    return Ok(Loaded {
                        data: T::clone(&data),
                        source: Source::Network,
                    })
                }
                Err(_) => Arc::new(FetchError::Other(format!(
                    "in-flight fetch for '{}' produced an unexpected type",
                    key
                ))),
            },
            Err(error) => error,
        };

        self.fall_back(key, error).await
    }

    /// Returns the shared fetch for `key`, starting one if none is in flight
    ///
    /// The registry lock is never held while `fetch_fresh` runs, so the
    /// closure may use this loader.
    fn join_or_start<T, F, Fut>(&self, key: &str, fetch_fresh: F) -> SharedFetch
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let slot = (key.to_string(), TypeId::of::<T>());
        if let Some(pending) = self.pending(&slot) {
            debug!(key, "joining in-flight fetch");
            return pending;
        }

        let request = fetch_fresh();

        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another load may have registered while `fetch_fresh` ran
        if let Some(pending) = in_flight.get(&slot) {
            debug!(key, "joining in-flight fetch");
            return pending.fetch.clone();
        }

        debug!(key, "fetching");
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            inner: Arc::clone(&self.inner),
            slot: slot.clone(),
            id,
        };

        let fetch = async move {
            let inner = Arc::clone(&registration.inner);
            let key = registration.slot.0.clone();
            let work = async {
                match request.await {
                    Ok(value) => {
                        inner.persist(&key, &value).await;
                        Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
                    }
                    Err(e) => Err(Arc::new(e)),
                }
            };

            // A panicking fetch counts as a failed fetch for every waiter
            let outcome: FetchOutcome = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!(key = %key, "fetch panicked");
                    Err(Arc::new(FetchError::Other(format!(
                        "fetch for '{}' panicked",
                        key
                    ))))
                });
            drop(registration);
            outcome
        }
        .boxed()
        .shared();

        in_flight.insert(
            slot,
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// The in-flight fetch registered under `slot`, if any
    fn pending(&self, slot: &(String, TypeId)) -> Option<SharedFetch> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot)
            .map(|pending| pending.fetch.clone())
    }

    /// Serves the cached value for `key` after a failed fetch
    async fn fall_back<T: DeserializeOwned>(
        &self,
        key: &str,
        error: Arc<FetchError>,
    ) -> Result<Loaded<T>, LoadError> {
        warn!(key, error = %error, "fetch failed, falling back to cache");

        let unavailable = |source: Arc<FetchError>| LoadError::Unavailable {
            key: key.to_string(),
            source,
        };

        let raw = match self.inner.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(unavailable(error)),
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return Err(unavailable(error));
            }
        };

        let (data, cached_at) = match serde_json::from_str::<StoredEntry<T>>(&raw) {
            Ok(entry) => entry.into_parts(),
            Err(e) => {
                warn!(key, error = %e, "cached value could not be decoded");
                return Err(unavailable(error));
            }
        };

        self.inner.notify(LoadNotice::StaleDataServed {
            key: key.to_string(),
            cached_at,
            reason: error.to_string(),
        });

        Ok(Loaded {
            data,
            source: Source::Cache { cached_at },
        })
    }
}
