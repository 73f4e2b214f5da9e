//! Authentication session context
//!
//! The session is an explicit value owned by whoever drives the app. It is set
//! on login, cleared on logout, and persisted through the key-value store so a
//! later run can pick it up again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{KeyValueStore, StoreError};

/// Store key for the persisted session
pub const SESSION_KEY: &str = "session";

/// Credentials returned by the backend on login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer token for authenticated requests
    pub token: String,
    /// Identifier of the logged-in user
    pub user_id: String,
}

/// Errors from session handling
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation needs a logged-in user
    #[error("Not logged in. Run `volmap login` first.")]
    NotLoggedIn,

    /// Persisting or clearing the session failed
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

/// Holds the current session and persists its changes
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    current: Option<Session>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.current.as_ref().map(|s| s.user_id.as_str()))
            .finish()
    }
}

impl SessionContext {
    /// Creates a logged-out context
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Creates a context from the persisted session, if any
    ///
    /// An unreadable or corrupt persisted session is treated as logged out.
    pub async fn restore(store: Arc<dyn KeyValueStore>) -> Self {
        let current = match store.get(SESSION_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "ignoring corrupt persisted session");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read persisted session");
                None
            }
        };
        Self { store, current }
    }

    /// The current session, if logged in
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// The current session, or `SessionError::NotLoggedIn`
    pub fn require(&self) -> Result<&Session, SessionError> {
        self.current.as_ref().ok_or(SessionError::NotLoggedIn)
    }

    /// Sets and persists `session`
    pub async fn login(&mut self, session: Session) -> Result<(), SessionError> {
        let json = serde_json::to_string(&session).map_err(StoreError::from)?;
        self.store.set(SESSION_KEY, json).await?;
        info!(user_id = %session.user_id, "logged in");
        self.current = Some(session);
        Ok(())
    }

    /// Clears the session and its persisted copy
    ///
    /// Cached data under other keys is left alone.
    pub async fn logout(&mut self) -> Result<(), SessionError> {
        self.current = None;
        self.store.remove(SESSION_KEY).await?;
        info!("logged out");
        Ok(())
    }
}
