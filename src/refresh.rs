//! Background events refresh
//!
//! Periodically reloads the events list through the cache-first loader and
//! sends each result to the main task over a tokio channel.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::EventsClient;
use crate::cache::CacheFirstLoader;
use crate::events::{Event, EVENTS_CACHE_KEY};

/// Messages sent from background refresh to main task
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// Refresh started
    RefreshStarted,
    /// A new events list is available
    EventsUpdated {
        events: Vec<Event>,
        /// Served from the cache because the backend was unreachable
        stale: bool,
    },
    /// Neither the backend nor the cache had events
    RefreshError(String),
    /// Refresh completed
    RefreshCompleted,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between refreshes
    pub interval: Duration,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
    /// Refresh once right away instead of waiting a full interval
    pub immediate: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            enabled: true,
            immediate: false,
        }
    }
}

/// Handle for controlling the background refresh task
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task and returns a handle to it
    ///
    /// With `enabled = false` nothing is spawned and no messages arrive.
    pub fn spawn(loader: CacheFirstLoader, client: EventsClient, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                if !config.immediate {
                    // Skip the first tick (immediate)
                    interval.tick().await;
                }

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if !refresh_once(&loader, &client, &msg_tx).await {
                                break;
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
                debug!("refresh task stopped");
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Waits for the next refresh message
    ///
    /// Returns `None` once the refresh task has stopped.
    pub async fn recv(&mut self) -> Option<RefreshMessage> {
        self.receiver.recv().await
    }

    /// Shuts down the background refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Runs one refresh cycle; returns `false` when the receiver is gone
async fn refresh_once(
    loader: &CacheFirstLoader,
    client: &EventsClient,
    tx: &mpsc::Sender<RefreshMessage>,
) -> bool {
    if tx.send(RefreshMessage::RefreshStarted).await.is_err() {
        return false;
    }

    let fetch_client = client.clone();
    let message = match loader
        .load(EVENTS_CACHE_KEY, move || async move {
            fetch_client.fetch_events().await
        })
        .await
    {
        Ok(loaded) => {
            let stale = loaded.is_stale();
            RefreshMessage::EventsUpdated {
                events: loaded.data,
                stale,
            }
        }
        Err(e) => RefreshMessage::RefreshError(match std::error::Error::source(&e) {
            Some(cause) => format!("{} ({})", e, cause),
            None => e.to_string(),
        }),
    };

    tx.send(message).await.is_ok() && tx.send(RefreshMessage::RefreshCompleted).await.is_ok()
}

/// Checks for pending refresh messages without blocking
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
