//! Dispatch, reachability, routing, and queueing.

pub mod direct;
pub mod dispatch;
pub mod http;
pub mod logging;
pub mod mode;
pub mod models;
pub mod network;
pub mod provider;
pub mod queue;
pub mod reachability;
pub mod service;

pub use direct::{DirectCall, DirectClient, HttpDirectClient, stream_text};
pub use dispatch::{
    Delivery, DeliveryReceipt, Dispatch, DispatchAttempt, DispatchFailure, DispatchOutcome,
    Dispatcher, FailureKind, ResponseBody, SharedEndpoint,
};
pub use mode::{
    BlockReason, DispatchDecision, DispatchPath, ModePreference, ModeStore, RouteHints, resolve,
};
pub use models::{ChatMessage, ChatRequest, Role};
pub use network::NetworkStatus;
pub use provider::{ProviderDescriptor, ProviderDirectory, ProviderId, WireFormat};
pub use queue::{DrainReport, OfflineQueue, PermanentFailure, QueuedMessage};
pub use reachability::{ProberConfig, ReachabilityProber};
pub use service::{
    Courier, CourierEvent, CourierParts, CourierSettings, CourierStatus, NetworkListener,
    QueueReason, SendReport,
};
