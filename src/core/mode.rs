//! Dispatch mode resolution.
//!
//! [`resolve`] is a pure function of the user's [`ModePreference`], the shared
//! backend's reachability, and the per-provider credential status. It decides
//! whether a message can be sent right now and over which path, and when it
//! cannot, names the most actionable reason first.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::provider::{ProviderDirectory, ProviderId};
use crate::error::{CourierError, Result};
use crate::storage::credentials::CredentialStatus;
use crate::storage::kv::KvStore;

/// Storage key of the persisted preference.
pub const MODE_KEY: &str = "mode_preference";

// =============================================================================
// Preference
// =============================================================================

/// User's routing preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModePreference {
    /// Shared backend when reachable, otherwise direct.
    #[default]
    Auto,
    /// Shared backend only.
    ForceShared,
    /// Direct provider only.
    ForceDirect,
}

impl ModePreference {
    pub const ALL: &'static [Self] = &[Self::Auto, Self::ForceShared, Self::ForceDirect];

    /// Stored and displayed name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ForceShared => "force-shared",
            Self::ForceDirect => "force-direct",
        }
    }

    /// Parse a stored or CLI name. `shared` and `direct` are accepted as aliases.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "force-shared" | "shared" => Some(Self::ForceShared),
            "force-direct" | "direct" => Some(Self::ForceDirect),
            _ => None,
        }
    }

    /// Parse from CLI argument.
    ///
    /// # Errors
    /// Returns [`CourierError::UnknownMode`] for unrecognized names.
    pub fn from_cli_name(name: &str) -> Result<Self> {
        Self::parse(name).ok_or_else(|| CourierError::UnknownMode(name.to_string()))
    }

    /// Whether the shared backend may be used.
    #[must_use]
    pub const fn admits_shared(self) -> bool {
        !matches!(self, Self::ForceDirect)
    }

    /// Whether a direct provider call may be used.
    #[must_use]
    pub const fn admits_direct(self) -> bool {
        !matches!(self, Self::ForceShared)
    }
}

impl std::fmt::Display for ModePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Route a message takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPath {
    Shared,
    Direct,
}

impl DispatchPath {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for DispatchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message cannot be sent, most actionable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NoCredentialConfigured,
    InvalidCredentialFormat,
    SharedUnavailable,
    CannotSend,
}

impl BlockReason {
    /// User-facing explanation.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoCredentialConfigured => {
                "No provider API key is configured. Add one with `courier credentials set`."
            }
            Self::InvalidCredentialFormat => {
                "The stored API key does not look right for its provider. Re-enter it."
            }
            Self::SharedUnavailable => "The shared service is unavailable right now.",
            Self::CannotSend => "Cannot send right now.",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Routing hints carried by a send request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteHints {
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
}

/// Derived routing decision; recomputed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchDecision {
    pub can_send: bool,
    pub path: Option<DispatchPath>,
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
    pub reason: Option<BlockReason>,
}

impl DispatchDecision {
    fn blocked(reason: BlockReason) -> Self {
        Self {
            can_send: false,
            path: None,
            provider: None,
            model: None,
            reason: Some(reason),
        }
    }

    fn shared(hints: &RouteHints) -> Self {
        Self {
            can_send: true,
            path: Some(DispatchPath::Shared),
            provider: hints.provider,
            model: hints.model.clone(),
            reason: None,
        }
    }

    fn direct(directory: &ProviderDirectory, provider: ProviderId, hints: &RouteHints) -> Self {
        Self {
            can_send: true,
            path: Some(DispatchPath::Direct),
            provider: Some(provider),
            model: choose_model(directory, provider, hints.model.as_deref()),
            reason: None,
        }
    }
}

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub preference: ModePreference,
    pub shared_reachable: bool,
    pub directory: &'a ProviderDirectory,
    pub credentials: &'a BTreeMap<ProviderId, CredentialStatus>,
    pub hints: &'a RouteHints,
}

/// Decide whether and how a message can be sent.
#[must_use]
pub fn resolve(input: ResolveInput<'_>) -> DispatchDecision {
    let ResolveInput {
        preference,
        shared_reachable,
        directory,
        credentials,
        hints,
    } = input;

    if preference.admits_shared() && shared_reachable {
        return DispatchDecision::shared(hints);
    }

    if preference.admits_direct() {
        if let Some(provider) = select_direct(directory, credentials, hints.provider) {
            return DispatchDecision::direct(directory, provider, hints);
        }
        return DispatchDecision::blocked(credential_reason(directory, credentials));
    }

    DispatchDecision::blocked(BlockReason::SharedUnavailable)
}

/// Hinted provider when its credential is valid, else the most preferred valid one.
#[must_use]
pub fn select_direct(
    directory: &ProviderDirectory,
    credentials: &BTreeMap<ProviderId, CredentialStatus>,
    hint: Option<ProviderId>,
) -> Option<ProviderId> {
    let is_valid = |id: ProviderId| credentials.get(&id) == Some(&CredentialStatus::Valid);

    hint.filter(|id| directory.has(*id) && is_valid(*id))
        .or_else(|| {
            directory
                .all()
                .into_iter()
                .map(|d| d.id)
                .find(|id| is_valid(*id))
        })
}

/// Hinted model when the provider lists it, else the provider's default.
#[must_use]
pub fn choose_model(
    directory: &ProviderDirectory,
    provider: ProviderId,
    hint: Option<&str>,
) -> Option<String> {
    hint.filter(|m| directory.model(provider, m).is_some())
        .or_else(|| directory.default_model(provider))
        .map(str::to_string)
}

fn credential_reason(
    directory: &ProviderDirectory,
    credentials: &BTreeMap<ProviderId, CredentialStatus>,
) -> BlockReason {
    let known = directory
        .all()
        .into_iter()
        .filter_map(|d| credentials.get(&d.id).copied())
        .filter(|s| *s != CredentialStatus::Missing)
        .collect::<Vec<_>>();

    if known.is_empty() {
        BlockReason::NoCredentialConfigured
    } else if known.contains(&CredentialStatus::Invalid) {
        BlockReason::InvalidCredentialFormat
    } else {
        BlockReason::CannotSend
    }
}

// =============================================================================
// Persisted preference
// =============================================================================

/// Owner of the persisted [`ModePreference`].
///
/// A session override (from `--mode` or `COURIER_MODE`) shadows the stored
/// value for this process without being written back.
pub struct ModeStore {
    kv: Arc<dyn KvStore>,
    current: Mutex<ModePreference>,
    session: Mutex<Option<ModePreference>>,
}

impl ModeStore {
    /// Load the stored preference; unknown or unreadable values fall back to auto.
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let current = match kv.get(MODE_KEY) {
            Ok(Some(raw)) => ModePreference::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown stored mode preference; using auto");
                ModePreference::Auto
            }),
            Ok(None) => ModePreference::Auto,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read mode preference; using auto");
                ModePreference::Auto
            }
        };
        Self {
            kv,
            current: Mutex::new(current),
            session: Mutex::new(None),
        }
    }

    /// Effective preference: the session override, else the stored value.
    #[must_use]
    pub fn get(&self) -> ModePreference {
        self.session
            .lock()
            .ok()
            .and_then(|s| *s)
            .unwrap_or_else(|| self.stored())
    }

    /// Persisted preference, ignoring any session override.
    #[must_use]
    pub fn stored(&self) -> ModePreference {
        self.current.lock().map(|m| *m).unwrap_or_default()
    }

    /// Shadow the stored preference for this process only.
    pub fn override_for_session(&self, preference: Option<ModePreference>) {
        if let Ok(mut session) = self.session.lock() {
            *session = preference;
        }
    }

    /// Persist and apply a new preference. Returns `true` if it changed.
    ///
    /// # Errors
    /// Returns a storage error if the write fails; the old value stays active.
    pub fn set(&self, preference: ModePreference) -> Result<bool> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| CourierError::Storage("mode lock poisoned".to_string()))?;
        self.kv.put(MODE_KEY, preference.as_str())?;
        let changed = *guard != preference;
        *guard = preference;
        if changed {
            tracing::info!(mode = %preference, "Mode preference changed");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKvStore;
    use tracing_test::traced_test;

    fn statuses(entries: &[(ProviderId, CredentialStatus)]) -> BTreeMap<ProviderId, CredentialStatus> {
        let mut map: BTreeMap<_, _> = ProviderId::ALL
            .iter()
            .map(|p| (*p, CredentialStatus::Missing))
            .collect();
        map.extend(entries.iter().copied());
        map
    }

    fn decide(
        preference: ModePreference,
        shared_reachable: bool,
        creds: &BTreeMap<ProviderId, CredentialStatus>,
        hints: &RouteHints,
    ) -> DispatchDecision {
        let directory = ProviderDirectory::new();
        resolve(ResolveInput {
            preference,
            shared_reachable,
            directory: &directory,
            credentials: creds,
            hints,
        })
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in ModePreference::ALL {
            assert_eq!(ModePreference::parse(mode.as_str()), Some(*mode));
        }
        assert_eq!(ModePreference::parse("shared"), Some(ModePreference::ForceShared));
        assert_eq!(ModePreference::parse("DIRECT"), Some(ModePreference::ForceDirect));
        assert!(matches!(
            ModePreference::from_cli_name("sideways"),
            Err(CourierError::UnknownMode(_))
        ));
    }

    #[test]
    fn nothing_available_never_sends() {
        let none = statuses(&[]);
        let invalid = statuses(&[(ProviderId::Groq, CredentialStatus::Invalid)]);
        for mode in ModePreference::ALL {
            for creds in [&none, &invalid] {
                for hint in [None, Some(ProviderId::Groq), Some(ProviderId::Anthropic)] {
                    let hints = RouteHints {
                        provider: hint,
                        model: None,
                    };
                    let decision = decide(*mode, false, creds, &hints);
                    assert!(!decision.can_send, "{mode} {hint:?}");
                    assert_eq!(decision.path, None);
                    assert!(decision.reason.is_some());
                }
            }
        }
    }

    #[test]
    fn auto_prefers_shared_when_reachable() {
        let creds = statuses(&[(ProviderId::OpenAi, CredentialStatus::Valid)]);
        let hints = RouteHints {
            provider: Some(ProviderId::OpenAi),
            model: Some("custom-model".to_string()),
        };
        let decision = decide(ModePreference::Auto, true, &creds, &hints);
        assert!(decision.can_send);
        assert_eq!(decision.path, Some(DispatchPath::Shared));
        assert_eq!(decision.model.as_deref(), Some("custom-model"));
    }

    #[test]
    fn auto_falls_back_to_best_valid_provider() {
        let creds = statuses(&[
            (ProviderId::Anthropic, CredentialStatus::Valid),
            (ProviderId::Gemini, CredentialStatus::Valid),
            (ProviderId::Groq, CredentialStatus::Invalid),
        ]);
        let decision = decide(ModePreference::Auto, false, &creds, &RouteHints::default());
        assert_eq!(decision.path, Some(DispatchPath::Direct));
        assert_eq!(decision.provider, Some(ProviderId::Gemini));
        assert_eq!(decision.model.as_deref(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn valid_hint_wins_and_unknown_model_uses_default() {
        let creds = statuses(&[
            (ProviderId::Groq, CredentialStatus::Valid),
            (ProviderId::Anthropic, CredentialStatus::Valid),
        ]);
        let hints = RouteHints {
            provider: Some(ProviderId::Anthropic),
            model: Some("gpt-4o".to_string()),
        };
        let decision = decide(ModePreference::ForceDirect, true, &creds, &hints);
        assert_eq!(decision.provider, Some(ProviderId::Anthropic));
        assert_eq!(decision.model.as_deref(), Some("claude-3-5-haiku-latest"));

        let hints = RouteHints {
            provider: Some(ProviderId::Anthropic),
            model: Some("claude-3-5-sonnet-latest".to_string()),
        };
        let decision = decide(ModePreference::ForceDirect, true, &creds, &hints);
        assert_eq!(decision.model.as_deref(), Some("claude-3-5-sonnet-latest"));
    }

    #[test]
    fn invalid_hint_falls_back() {
        let creds = statuses(&[
            (ProviderId::Groq, CredentialStatus::Valid),
            (ProviderId::OpenAi, CredentialStatus::Invalid),
        ]);
        let hints = RouteHints {
            provider: Some(ProviderId::OpenAi),
            model: None,
        };
        let decision = decide(ModePreference::Auto, false, &creds, &hints);
        assert_eq!(decision.provider, Some(ProviderId::Groq));
    }

    #[test]
    fn force_shared_ignores_credentials() {
        let creds = statuses(&[(ProviderId::Groq, CredentialStatus::Valid)]);
        let decision = decide(ModePreference::ForceShared, false, &creds, &RouteHints::default());
        assert!(!decision.can_send);
        assert_eq!(decision.reason, Some(BlockReason::SharedUnavailable));
    }

    #[test]
    fn force_direct_ignores_shared() {
        let creds = statuses(&[]);
        let decision = decide(ModePreference::ForceDirect, true, &creds, &RouteHints::default());
        assert!(!decision.can_send);
        assert_eq!(decision.reason, Some(BlockReason::NoCredentialConfigured));
    }

    #[test]
    fn reason_precedence() {
        let none = statuses(&[]);
        assert_eq!(
            decide(ModePreference::Auto, false, &none, &RouteHints::default()).reason,
            Some(BlockReason::NoCredentialConfigured)
        );

        let invalid = statuses(&[(ProviderId::OpenRouter, CredentialStatus::Invalid)]);
        assert_eq!(
            decide(ModePreference::Auto, false, &invalid, &RouteHints::default()).reason,
            Some(BlockReason::InvalidCredentialFormat)
        );
        assert!(BlockReason::NoCredentialConfigured < BlockReason::CannotSend);
    }

    #[test]
    fn mode_store_persists() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = ModeStore::load(Arc::clone(&kv));
        assert_eq!(store.get(), ModePreference::Auto);

        assert!(store.set(ModePreference::ForceDirect).unwrap());
        assert!(!store.set(ModePreference::ForceDirect).unwrap());
        assert_eq!(kv.get(MODE_KEY).unwrap().as_deref(), Some("force-direct"));

        let reloaded = ModeStore::load(kv);
        assert_eq!(reloaded.get(), ModePreference::ForceDirect);
    }

    #[test]
    fn session_override_is_not_persisted() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = ModeStore::load(Arc::clone(&kv));
        store.override_for_session(Some(ModePreference::ForceShared));
        assert_eq!(store.get(), ModePreference::ForceShared);
        assert_eq!(store.stored(), ModePreference::Auto);
        assert_eq!(kv.get(MODE_KEY).unwrap(), None);

        store.override_for_session(None);
        assert_eq!(store.get(), ModePreference::Auto);
    }

    #[traced_test]
    #[test]
    fn mode_store_tolerates_garbage() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new().with_entry(MODE_KEY, "turbo"));
        assert_eq!(ModeStore::load(kv).get(), ModePreference::Auto);
        assert!(logs_contain("Unknown stored mode preference"));
    }
}
