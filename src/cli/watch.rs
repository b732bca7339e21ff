//! Watch mode: follow connectivity and replay the queue on reconnect.
//!
//! Each poll hits a probe URL; its answer becomes the device network state.
//! Transitions reach the courier's network listener, which drains the queue
//! when the device comes back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, interval};

use crate::cli::OutputOptions;
use crate::cli::args::WatchArgs;
use crate::core::http::build_client;
use crate::core::service::{Courier, CourierEvent};
use crate::error::{CourierError, Result};
use crate::render::human;

/// State tracking across watch iterations.
#[derive(Debug, Default)]
pub struct WatchState {
    pub polls: u64,
    pub online: Option<bool>,
    pub transitions: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl WatchState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a poll result. Returns `true` when the state flipped.
    pub fn update(&mut self, online: bool) -> bool {
        self.polls += 1;
        self.last_poll_at = Some(Utc::now());
        let flipped = self.online.is_some_and(|prev| prev != online);
        if flipped {
            self.transitions += 1;
        }
        self.online = Some(online);
        flipped
    }

    /// Whether `max_polls` has been reached.
    #[must_use]
    pub fn done(&self, max_polls: Option<u64>) -> bool {
        max_polls.is_some_and(|max| self.polls >= max)
    }
}

async fn poll(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => {
            // Any HTTP answer proves the device has a route.
            tracing::trace!(%url, status = response.status().as_u16(), "Connectivity poll answered");
            true
        }
        Err(e) => {
            tracing::debug!(%url, error = %e, "Connectivity poll failed");
            false
        }
    }
}

fn print_event(event: &CourierEvent, out: OutputOptions) {
    if out.is_json() {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Could not serialize event"),
        }
    } else {
        println!("{}", human::render_event(event, out.no_color));
    }
}

/// Run watch mode until Ctrl+C or `max_polls`.
///
/// # Errors
/// Returns an error for a zero interval or if the poll client cannot be built.
pub async fn run_watch(courier: Arc<Courier>, args: &WatchArgs, out: OutputOptions) -> Result<()> {
    if args.interval == 0 {
        return Err(CourierError::Config(
            "watch interval must be at least 1 second".to_string(),
        ));
    }
    let url = args
        .probe_url
        .clone()
        .unwrap_or_else(|| courier.prober().health_url());
    let client = build_client(Duration::from_secs(args.interval.min(10)))?;

    let mut events = courier.subscribe();
    let listener = courier.spawn_network_listener();
    let mut state = WatchState::new();
    let mut ticker = interval(Duration::from_secs(args.interval));

    // Ctrl+C handler for clean shutdown.
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    tracing::info!(%url, interval_secs = args.interval, "Watching connectivity");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = poll(&client, &url).await;
                let first = state.polls == 0;
                state.update(online);
                let transitioned = courier.set_online(online);
                if first && online && !transitioned && !courier.queue().is_empty() {
                    // Started online with a backlog: treat startup as a reconnect.
                    courier.handle_network_change(true).await;
                }
                if state.done(args.max_polls) {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, out),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watch fell behind on events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown_rx => break,
        }
    }

    // Finish any reconnect drain before printing what is left.
    listener.stop().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event, out);
    }

    tracing::info!(polls = state.polls, transitions = state.transitions, "Watch stopped");
    Ok(())
}
