//! Shared backend reachability.
//!
//! Answers "is the shared backend reachable right now" with a short-lived
//! cache so bursts of sends cost at most one probe per TTL window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use super::http::{PROBE_TIMEOUT, build_client, join_url};
use super::network::NetworkStatus;
use crate::error::Result;

/// How long a probe result is trusted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Health endpoint path on the shared backend.
pub const HEALTH_PATH: &str = "/api/health";

/// Cached probe result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachabilityState {
    pub reachable: bool,
    /// `None` forces the next check to probe.
    pub last_checked: Option<Instant>,
}

impl ReachabilityState {
    /// Whether the cached value is younger than `ttl`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_checked.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub base_url: String,
    pub health_path: String,
    pub ttl: Duration,
    pub timeout: Duration,
}

impl ProberConfig {
    /// Defaults for a shared backend at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            health_path: HEALTH_PATH.to_string(),
            ttl: DEFAULT_TTL,
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Full health URL.
    #[must_use]
    pub fn health_url(&self) -> String {
        join_url(&self.base_url, &self.health_path)
    }
}

/// Cached liveness checker for the shared backend.
pub struct ReachabilityProber {
    client: Client,
    config: ProberConfig,
    network: NetworkStatus,
    state: Mutex<ReachabilityState>,
}

impl ReachabilityProber {
    /// Create a prober.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ProberConfig, network: NetworkStatus) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
            network,
            state: Mutex::new(ReachabilityState::default()),
        })
    }

    /// Whether the shared backend is reachable.
    ///
    /// Offline devices answer `false` without a round trip. Otherwise a fresh
    /// cached answer is reused; a stale one triggers a probe whose result is
    /// cached whether it succeeded or not.
    pub async fn check(&self) -> bool {
        if !self.network.is_online() {
            tracing::trace!("Device offline; skipping reachability probe");
            return false;
        }

        let cached = self.cached();
        if cached.is_fresh(self.config.ttl) {
            return cached.reachable;
        }

        let probed = self.probe().await;
        // A probe that straddled an offline transition must not resurrect the cache.
        let reachable = probed && self.network.is_online();
        self.record(reachable);
        reachable
    }

    /// Invalidate the cache so the next [`check`](Self::check) probes.
    pub fn force_refresh(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_checked = None;
        }
    }

    /// Record the device going offline.
    pub fn mark_offline(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = ReachabilityState {
                reachable: false,
                last_checked: None,
            };
        }
    }

    /// Last recorded state, without probing.
    #[must_use]
    pub fn cached(&self) -> ReachabilityState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    /// Health endpoint this prober hits.
    #[must_use]
    pub fn health_url(&self) -> String {
        self.config.health_url()
    }

    /// Configured cache lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn record(&self, reachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            let changed = state.reachable != reachable;
            *state = ReachabilityState {
                reachable,
                last_checked: Some(Instant::now()),
            };
            if changed {
                tracing::info!(reachable, "Shared backend reachability changed");
            }
        }
    }

    async fn probe(&self) -> bool {
        let url = self.config.health_url();
        let started = Instant::now();
        let result = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.config.timeout)
            .send()
            .await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(%url, elapsed_ms, "Shared backend reachable");
                true
            }
            Ok(response) => {
                tracing::debug!(%url, status = response.status().as_u16(), elapsed_ms, "Shared backend unhealthy");
                false
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, timeout = e.is_timeout(), elapsed_ms, "Shared backend probe failed");
                false
            }
        }
    }
}
