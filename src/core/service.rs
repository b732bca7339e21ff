//! Courier service: the composition root.
//!
//! Owns one of each component, routes failed sends into the offline queue,
//! reacts to network transitions, and publishes [`CourierEvent`]s for
//! whatever presentation layer is listening.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::direct::HttpDirectClient;
use super::dispatch::{
    CHAT_PATH, Delivery, Dispatch, DispatchOutcome, Dispatcher, FailureKind, SharedEndpoint,
};
use super::http::{DEFAULT_TIMEOUT, PROBE_TIMEOUT, SHARED_TIMEOUT};
use super::mode::{
    DispatchDecision, ModePreference, ModeStore, ResolveInput, RouteHints, resolve,
};
use super::models::ChatRequest;
use super::network::NetworkStatus;
use super::provider::{ProviderDirectory, ProviderId};
use super::queue::{
    DEFAULT_MAX_RETRIES, DrainReport, DrainSummary, OfflineQueue, PermanentFailure, QueuedMessage,
};
use super::reachability::{DEFAULT_TTL, HEALTH_PATH, ProberConfig, ReachabilityProber};
use crate::error::Result;
use crate::storage::credentials::{CredentialStore, CredentialSummary};
use crate::storage::kv::KvStore;

const EVENT_CAPACITY: usize = 64;

/// Default shared backend location.
pub const DEFAULT_SHARED_URL: &str = "http://localhost:3000";

// =============================================================================
// Events and reports
// =============================================================================

/// Change notifications for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CourierEvent {
    QueueChanged { len: usize },
    Drained(DrainSummary),
    PermanentFailure(PermanentFailure),
    ModeChanged { mode: ModePreference },
    CredentialsChanged { provider: Option<ProviderId> },
    NetworkChanged { online: bool },
}

/// Why a message went to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum QueueReason {
    Offline,
    DeliveryFailed { kind: FailureKind, detail: String },
}

impl std::fmt::Display for QueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => f.write_str("device offline"),
            Self::DeliveryFailed { kind, detail } => write!(f, "{kind} ({detail})"),
        }
    }
}

/// Point-in-time view of the dispatch layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierStatus {
    pub online: bool,
    pub shared_reachable: bool,
    pub mode: ModePreference,
    pub stored_mode: ModePreference,
    pub decision: DispatchDecision,
    pub credentials: Vec<CredentialSummary>,
    pub queue_len: usize,
    pub draining: bool,
}

/// What happened to a send.
#[derive(Debug)]
pub enum SendReport {
    Delivered(Delivery),
    Queued { entry: QueuedMessage, reason: QueueReason },
    /// Needs user action; the message was not kept.
    Rejected { kind: FailureKind, message: String },
}

// =============================================================================
// Settings
// =============================================================================

/// Runtime settings for the default wiring.
#[derive(Debug, Clone)]
pub struct CourierSettings {
    pub shared_url: String,
    pub health_path: String,
    pub chat_path: String,
    pub probe_timeout: Duration,
    pub shared_timeout: Duration,
    pub reachability_ttl: Duration,
    pub direct_timeout: Duration,
    pub max_retries: u32,
    pub api_bases: BTreeMap<ProviderId, String>,
    pub online: bool,
}

impl Default for CourierSettings {
    fn default() -> Self {
        Self {
            shared_url: DEFAULT_SHARED_URL.to_string(),
            health_path: HEALTH_PATH.to_string(),
            chat_path: CHAT_PATH.to_string(),
            probe_timeout: PROBE_TIMEOUT,
            shared_timeout: SHARED_TIMEOUT,
            reachability_ttl: DEFAULT_TTL,
            direct_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            api_bases: BTreeMap::new(),
            online: true,
        }
    }
}

impl CourierSettings {
    /// Settings pointing at a specific shared backend.
    #[must_use]
    pub fn with_shared_url(mut self, url: impl Into<String>) -> Self {
        self.shared_url = url.into();
        self
    }

    /// Route a provider's direct calls to another base URL.
    #[must_use]
    pub fn with_api_base(mut self, provider: ProviderId, url: impl Into<String>) -> Self {
        self.api_bases.insert(provider, url.into());
        self
    }
}

/// Explicitly constructed components.
pub struct CourierParts {
    pub directory: ProviderDirectory,
    pub credentials: Arc<CredentialStore>,
    pub mode: Arc<ModeStore>,
    pub prober: Arc<ReachabilityProber>,
    pub dispatcher: Arc<dyn Dispatch>,
    pub queue: Arc<OfflineQueue>,
    pub network: NetworkStatus,
}

impl CourierParts {
    /// Default wiring over a key/value store.
    ///
    /// # Errors
    /// Returns an error if the provider directory is inconsistent or an HTTP
    /// client cannot be built.
    pub fn build(kv: Arc<dyn KvStore>, settings: &CourierSettings) -> Result<Self> {
        let directory = settings
            .api_bases
            .iter()
            .fold(ProviderDirectory::new(), |dir, (id, url)| {
                dir.with_api_base(*id, url.as_str())
            });
        directory.validate()?;

        let network = NetworkStatus::new(settings.online);
        let credentials = Arc::new(CredentialStore::load(Arc::clone(&kv), directory.clone()));
        let mode = Arc::new(ModeStore::load(Arc::clone(&kv)));
        let queue = Arc::new(OfflineQueue::load_with_max_retries(
            Arc::clone(&kv),
            settings.max_retries,
        ));

        let prober_config = ProberConfig {
            base_url: settings.shared_url.clone(),
            health_path: settings.health_path.clone(),
            ttl: settings.reachability_ttl,
            timeout: settings.probe_timeout,
        };
        let prober = Arc::new(ReachabilityProber::new(prober_config, network.clone())?);

        let shared = SharedEndpoint {
            base_url: settings.shared_url.clone(),
            chat_path: settings.chat_path.clone(),
            timeout: settings.shared_timeout,
        };
        let direct = Arc::new(HttpDirectClient::with_timeout(settings.direct_timeout)?);
        let dispatcher: Arc<dyn Dispatch> = Arc::new(Dispatcher::new(
            directory.clone(),
            Arc::clone(&credentials),
            Arc::clone(&mode),
            network.clone(),
            Arc::clone(&prober),
            &shared,
            direct,
        )?);

        Ok(Self {
            directory,
            credentials,
            mode,
            prober,
            dispatcher,
            queue,
            network,
        })
    }
}

// =============================================================================
// Service
// =============================================================================

/// Chat delivery service.
pub struct Courier {
    directory: ProviderDirectory,
    credentials: Arc<CredentialStore>,
    mode: Arc<ModeStore>,
    prober: Arc<ReachabilityProber>,
    dispatcher: Arc<dyn Dispatch>,
    queue: Arc<OfflineQueue>,
    network: NetworkStatus,
    events: broadcast::Sender<CourierEvent>,
}

impl Courier {
    #[must_use]
    pub fn new(parts: CourierParts) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            directory: parts.directory,
            credentials: parts.credentials,
            mode: parts.mode,
            prober: parts.prober,
            dispatcher: parts.dispatcher,
            queue: parts.queue,
            network: parts.network,
            events,
        }
    }

    /// Build with the default wiring.
    ///
    /// # Errors
    /// See [`CourierParts::build`].
    pub fn open(kv: Arc<dyn KvStore>, settings: &CourierSettings) -> Result<Self> {
        Ok(Self::new(CourierParts::build(kv, settings)?))
    }

    #[must_use]
    pub const fn directory(&self) -> &ProviderDirectory {
        &self.directory
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    #[must_use]
    pub fn prober(&self) -> &ReachabilityProber {
        &self.prober
    }

    #[must_use]
    pub const fn network(&self) -> &NetworkStatus {
        &self.network
    }

    #[must_use]
    pub fn mode(&self) -> ModePreference {
        self.mode.get()
    }

    /// Persisted preference, ignoring any session override.
    #[must_use]
    pub fn stored_mode(&self) -> ModePreference {
        self.mode.stored()
    }

    /// Use `mode` for this process only; `None` restores the stored value.
    pub fn override_mode_for_session(&self, mode: Option<ModePreference>) {
        self.mode.override_for_session(mode);
    }

    /// Receive change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CourierEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CourierEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Current routing decision for the given hints.
    pub async fn decision(&self, hints: &RouteHints) -> DispatchDecision {
        let shared_reachable = self.prober.check().await;
        let statuses = self.credentials.statuses();
        resolve(ResolveInput {
            preference: self.mode.get(),
            shared_reachable,
            directory: &self.directory,
            credentials: &statuses,
            hints,
        })
    }

    /// Snapshot of connectivity, routing, credentials, and queue depth.
    pub async fn status(&self, hints: &RouteHints) -> CourierStatus {
        let decision = self.decision(hints).await;
        CourierStatus {
            online: self.network.is_online(),
            shared_reachable: self.prober.cached().reachable,
            mode: self.mode.get(),
            stored_mode: self.mode.stored(),
            decision,
            credentials: self.credentials.configured(),
            queue_len: self.queue.len(),
            draining: self.queue.is_draining(),
        }
    }

    /// Send a message now, or queue it when no path works.
    ///
    /// # Errors
    /// Returns an error only when a message that must be queued cannot be
    /// persisted.
    pub async fn send(&self, chat_id: &str, request: ChatRequest) -> Result<SendReport> {
        match self.dispatcher.send(&request).await {
            DispatchOutcome::Delivered(delivery) => Ok(SendReport::Delivered(delivery)),
            DispatchOutcome::MustQueue => self.enqueue(chat_id, request, QueueReason::Offline),
            DispatchOutcome::Failed(failure) if failure.is_recoverable() => {
                let reason = QueueReason::DeliveryFailed {
                    kind: failure.primary_kind(),
                    detail: failure.summary(),
                };
                self.enqueue(chat_id, request, reason)
            }
            DispatchOutcome::Failed(failure) => {
                let kind = failure.primary_kind();
                let message = failure.to_error(&self.directory).to_string();
                tracing::warn!(%kind, chat_id, "Message rejected; needs configuration");
                Ok(SendReport::Rejected { kind, message })
            }
        }
    }

    fn enqueue(&self, chat_id: &str, request: ChatRequest, reason: QueueReason) -> Result<SendReport> {
        let entry = self.queue.enqueue(chat_id, request)?;
        tracing::info!(id = %entry.id, %reason, "Send deferred to offline queue");
        self.emit(CourierEvent::QueueChanged {
            len: self.queue.len(),
        });
        Ok(SendReport::Queued { entry, reason })
    }

    /// Replay the offline queue once.
    ///
    /// Every dropped message produces a [`CourierEvent::PermanentFailure`],
    /// including passes where queue writes failed.
    pub async fn drain(&self) -> DrainReport {
        let report = self.queue.drain(self.dispatcher.as_ref()).await;
        if report.skipped {
            return report;
        }
        for failure in &report.permanent_failures {
            tracing::warn!(chat_id = %failure.chat_id, error = %failure.to_error(), "Message not delivered");
            self.emit(CourierEvent::PermanentFailure(failure.clone()));
        }
        if report.sent > 0 || report.failed > 0 || !report.storage_errors.is_empty() {
            self.emit(CourierEvent::Drained(report.summary()));
            self.emit(CourierEvent::QueueChanged {
                len: self.queue.len(),
            });
        }
        report
    }

    /// Drop a queued message.
    ///
    /// # Errors
    /// See [`OfflineQueue::remove`].
    pub fn remove_queued(&self, id: &str) -> Result<QueuedMessage> {
        let removed = self.queue.remove(id)?;
        self.emit(CourierEvent::QueueChanged {
            len: self.queue.len(),
        });
        Ok(removed)
    }

    /// Change the routing preference.
    ///
    /// # Errors
    /// Returns a storage error if the preference cannot be persisted.
    pub fn set_mode(&self, mode: ModePreference) -> Result<()> {
        if self.mode.set(mode)? {
            self.emit(CourierEvent::ModeChanged { mode });
        }
        Ok(())
    }

    /// Store a provider credential.
    ///
    /// # Errors
    /// See [`CredentialStore::set`].
    pub fn set_credential(&self, provider: ProviderId, value: &str) -> Result<()> {
        self.credentials.set(provider, value)?;
        self.emit(CourierEvent::CredentialsChanged {
            provider: Some(provider),
        });
        Ok(())
    }

    /// Remove one credential, or all of them.
    ///
    /// # Errors
    /// See [`CredentialStore::clear`].
    pub fn clear_credentials(&self, provider: Option<ProviderId>) -> Result<()> {
        self.credentials.clear(provider)?;
        self.emit(CourierEvent::CredentialsChanged { provider });
        Ok(())
    }

    /// Publish a device network state. Transitions reach the listener task.
    pub fn set_online(&self, online: bool) -> bool {
        self.network.set_online(online)
    }

    /// React to a network transition.
    ///
    /// Going offline marks the shared backend unreachable. Coming back
    /// invalidates the reachability cache and drains the queue once.
    pub async fn handle_network_change(&self, online: bool) {
        self.emit(CourierEvent::NetworkChanged { online });
        if !online {
            self.prober.mark_offline();
            return;
        }

        self.prober.force_refresh();
        if self.queue.is_empty() {
            return;
        }
        let report = self.drain().await;
        if !report.storage_errors.is_empty() {
            tracing::error!(
                count = report.storage_errors.len(),
                "Drain after reconnect could not persist the queue"
            );
        }
    }

    /// Spawn the background task that follows network transitions.
    ///
    /// A transition already published when [`NetworkListener::stop`] is
    /// called is still handled before the task exits.
    #[must_use]
    pub fn spawn_network_listener(self: &Arc<Self>) -> NetworkListener {
        let this = Arc::clone(self);
        let mut rx = self.network.subscribe();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        this.handle_network_change(online).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            tracing::debug!("Network listener stopped");
        });
        NetworkListener { shutdown, handle }
    }
}

/// Handle to the task started by [`Courier::spawn_network_listener`].
pub struct NetworkListener {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl NetworkListener {
    /// Let pending work finish, then wait for the task to exit.
    pub async fn stop(self) {
        // The task may already be gone.
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Network listener ended abnormally");
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
