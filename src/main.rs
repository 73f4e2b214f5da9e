//! Volmap - browse and post volunteer events
//!
//! A command-line client for the volunteer events backend. The events list is
//! loaded network-first and falls back to the last cached copy when offline.

use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{Local, Utc};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use volmap::cache::{CacheFirstLoader, LoadNotice};
use volmap::cli::{Cli, Command, CreateArgs};
use volmap::config::Config;
use volmap::events::{upcoming, Event, EVENTS_CACHE_KEY};
use volmap::refresh::{RefreshConfig, RefreshHandle, RefreshMessage};
use volmap::session::SessionContext;

type CliResult = Result<(), Box<dyn Error>>;

/// Installs the stderr log subscriber, honouring `RUST_LOG`
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Prints loader notices that the user should know about
fn report_notice(notice: &LoadNotice) {
    match notice {
        LoadNotice::StaleDataServed { cached_at, .. } => match cached_at {
            Some(at) => eprintln!(
                "Offline: showing events cached at {}",
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
            None => eprintln!("Offline: showing previously cached events"),
        },
        // Already logged by the loader; the fresh list is still shown
        LoadNotice::PersistenceFailed { .. } => {}
    }
}

fn print_events(events: &[Event]) {
    if events.is_empty() {
        println!("No events.");
        return;
    }
    for event in events {
        println!(
            "{}  {:<32}  ({:.4}, {:.4})  {}/{} spots open  [{}]",
            event.date_time.with_timezone(&Local).format("%a %b %e %H:%M"),
            event.name,
            event.position.latitude,
            event.position.longitude,
            event.spots_remaining(),
            event.volunteers_needed,
            event.id,
        );
    }
}

async fn list_events(config: &Config, all: bool, json: bool) -> CliResult {
    let (notice_tx, mut notices) = mpsc::unbounded_channel();
    let loader = CacheFirstLoader::with_notices(config.open_store(), notice_tx);
    let client = config.client();

    let loaded = loader
        .load(EVENTS_CACHE_KEY, move || async move { client.fetch_events().await })
        .await?;

    while let Ok(notice) = notices.try_recv() {
        report_notice(&notice);
    }

    let events = if all {
        loaded.data
    } else {
        upcoming(&loaded.data, Utc::now())
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else {
        print_events(&events);
    }
    Ok(())
}

async fn watch_events(config: &Config, interval: u64) -> CliResult {
    let loader = CacheFirstLoader::new(config.open_store());
    let refresh_config = RefreshConfig {
        interval: Duration::from_secs(interval.max(1)),
        enabled: true,
        immediate: true,
    };
    let mut handle = RefreshHandle::spawn(loader, config.client(), refresh_config);

    loop {
        tokio::select! {
            message = handle.recv() => match message {
                Some(RefreshMessage::EventsUpdated { events, stale }) => {
                    println!("--- {}{}", Local::now().format("%H:%M:%S"), if stale { " (offline)" } else { "" });
                    print_events(&upcoming(&events, Utc::now()));
                }
                Some(RefreshMessage::RefreshError(e)) => eprintln!("Refresh failed: {}", e),
                Some(RefreshMessage::RefreshStarted | RefreshMessage::RefreshCompleted) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn create_event(config: &Config, args: &CreateArgs) -> CliResult {
    let new_event = args.to_new_event()?;
    let session = SessionContext::restore(config.open_session_store()).await;
    let created = config
        .client()
        .create_event(session.require()?, &new_event)
        .await?;
    println!("Created event '{}' [{}]", created.name, created.id);
    Ok(())
}

async fn join_event(config: &Config, event_id: &str) -> CliResult {
    let session = SessionContext::restore(config.open_session_store()).await;
    let event = config
        .client()
        .join_event(session.require()?, event_id)
        .await?;
    println!(
        "Signed up for '{}' ({} spots left)",
        event.name,
        event.spots_remaining()
    );
    Ok(())
}

async fn run(cli: Cli) -> CliResult {
    let config = Config::from_cli(&cli);

    match &cli.command {
        Command::Events { all, json } => list_events(&config, *all, *json).await,
        Command::Watch { interval } => watch_events(&config, *interval).await,
        Command::Create(args) => create_event(&config, args).await,
        Command::Join { event_id } => join_event(&config, event_id).await,
        Command::Login { email, password } => {
            let session = config.client().login(email, password).await?;
            let user_id = session.user_id.clone();
            let mut context = SessionContext::new(config.open_session_store());
            context.login(session).await?;
            println!("Logged in as {}", user_id);
            Ok(())
        }
        Command::Logout => {
            let mut context = SessionContext::restore(config.open_session_store()).await;
            context.logout().await?;
            println!("Logged out");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
