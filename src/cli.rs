//! Command-line interface parsing for volmap
//!
//! Global flags configure the backend and the offline cache; subcommands map
//! one-to-one onto the things a user can do with events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::api::DEFAULT_API_URL;
use crate::events::{NewEvent, Position};

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The event start time is not RFC 3339
    #[error("Invalid date/time: '{0}'. Expected RFC 3339, e.g. 2025-12-01T14:30:00Z")]
    InvalidDateTime(String),

    /// Latitude or longitude out of range
    #[error("Invalid position: latitude must be within ±90 and longitude within ±180, got ({0}, {1})")]
    InvalidPosition(f64, f64),
}

/// Volmap - browse and post volunteer events
#[derive(Parser, Debug)]
#[command(name = "volmap")]
#[command(about = "Browse and post volunteer events, with offline fallback")]
#[command(version)]
pub struct Cli {
    /// Base URL of the events backend
    #[arg(long, global = true, env = "VOLMAP_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Directory for the offline cache (defaults to the XDG cache directory)
    #[arg(long, global = true, env = "VOLMAP_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Keep the cache in memory only for this run
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "VOLMAP_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List events, falling back to the last cached list when offline
    Events {
        /// Include events that already started
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Keep refreshing the events list and print each update
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },

    /// Post a new event (requires login)
    Create(CreateArgs),

    /// Sign up as a volunteer for an event (requires login)
    Join {
        /// Identifier of the event
        event_id: String,
    },

    /// Log in and remember the session
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "VOLMAP_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget the current session
    Logout,
}

/// Fields for a new event
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Start time, RFC 3339 (e.g. 2025-12-01T14:30:00Z)
    #[arg(long = "at", value_name = "DATETIME")]
    pub date_time: String,

    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Number of volunteers needed
    #[arg(long)]
    pub volunteers: u32,

    /// URL of an already-hosted photo
    #[arg(long)]
    pub image_url: Option<String>,
}

/// Parses an RFC 3339 timestamp argument into UTC.
pub fn parse_date_time_arg(s: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CliError::InvalidDateTime(s.to_string()))
}

impl CreateArgs {
    /// Validates the arguments and builds the create payload.
    ///
    /// # Returns
    /// * `Ok(NewEvent)` ready to send
    /// * `Err(CliError)` if the date/time or position is invalid
    pub fn to_new_event(&self) -> Result<NewEvent, CliError> {
        let date_time = parse_date_time_arg(&self.date_time)?;
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(CliError::InvalidPosition(self.lat, self.lon));
        }
        Ok(NewEvent {
            name: self.name.clone(),
            description: self.description.clone(),
            date_time,
            position: Position {
                latitude: self.lat,
                longitude: self.lon,
            },
            image_url: self.image_url.clone(),
            volunteers_needed: self.volunteers,
        })
    }
}
