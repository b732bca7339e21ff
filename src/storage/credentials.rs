//! User-supplied provider credentials.
//!
//! One opaque key per provider, validated against the provider's prefix rule
//! and persisted as a single versioned document under [`CREDENTIALS_KEY`].
//!
//! ## Legacy layouts
//!
//! Earlier clients wrote credentials in two other shapes. When the versioned
//! document is absent, [`CredentialStore::load`] runs a one-time migration that
//! reads the legacy layouts in precedence order, merges them, writes the
//! versioned document, and deletes the legacy keys:
//!
//! 1. [`LEGACY_BLOB_KEY`]: a JSON object `{ "groq": "gsk_..." }`
//! 2. `<provider>_api_key`: one plain string per provider
//!
//! Loading never fails. Unreadable or corrupt layouts are skipped with a warning.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::kv::KvStore;
use crate::core::provider::{ProviderDirectory, ProviderId};
use crate::error::{CourierError, Result};

/// Storage key of the current credential document.
pub const CREDENTIALS_KEY: &str = "credentials.v2";
/// Storage key of the legacy JSON blob layout.
pub const LEGACY_BLOB_KEY: &str = "apiKeys";
/// Current credential document version.
pub const CREDENTIALS_VERSION: u32 = 2;

/// Storage key of the legacy per-provider layout.
#[must_use]
pub fn legacy_provider_key(id: ProviderId) -> String {
    format!("{}_api_key", id.cli_name())
}

/// Short, stable fingerprint of a secret for logs and listings.
#[must_use]
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Persisted credential document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    version: u32,
    credentials: BTreeMap<String, String>,
}

/// State of a provider's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    /// Nothing stored.
    Missing,
    /// Stored but fails the provider's prefix rule.
    Invalid,
    /// Stored and well-formed.
    Valid,
}

/// Listing row for a stored credential; never carries the secret.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub provider: ProviderId,
    pub status: CredentialStatus,
    pub fingerprint: String,
}

/// Credential set owned by the dispatch layer.
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    directory: ProviderDirectory,
    credentials: Mutex<BTreeMap<ProviderId, String>>,
}

impl CredentialStore {
    /// Load credentials, migrating legacy layouts on first run.
    pub fn load(kv: Arc<dyn KvStore>, directory: ProviderDirectory) -> Self {
        let credentials = match kv.get(CREDENTIALS_KEY) {
            Ok(Some(raw)) => parse_current(&raw),
            Ok(None) => migrate_legacy(kv.as_ref()),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored credentials; starting empty");
                BTreeMap::new()
            }
        };

        tracing::debug!(count = credentials.len(), "Credentials loaded");
        Self {
            kv,
            directory,
            credentials: Mutex::new(credentials),
        }
    }

    /// Store a credential for a provider.
    ///
    /// # Errors
    /// Returns [`CourierError::UnknownProvider`] if the directory lacks the
    /// provider, [`CourierError::InvalidCredentialFormat`] if the value does
    /// not match the prefix rule, or a storage error if persisting fails. The
    /// previously stored value is untouched on any error.
    pub fn set(&self, provider: ProviderId, value: &str) -> Result<()> {
        let descriptor = self
            .directory
            .get(provider)
            .ok_or_else(|| CourierError::UnknownProvider(provider.to_string()))?;

        let value = value.trim();
        if !descriptor.accepts_credential(value) {
            return Err(CourierError::InvalidCredentialFormat {
                provider: provider.to_string(),
                expected_prefix: descriptor.credential_prefix.to_string(),
            });
        }

        self.mutate(|creds| {
            creds.insert(provider, value.to_string());
        })?;
        tracing::info!(%provider, fingerprint = %fingerprint(value), "Credential stored");
        Ok(())
    }

    /// Stored credential for a provider, valid or not.
    #[must_use]
    pub fn get(&self, provider: ProviderId) -> Option<String> {
        self.snapshot().remove(&provider)
    }

    /// Remove one credential, or all of them when `provider` is `None`.
    ///
    /// # Errors
    /// Returns a storage error if persisting fails.
    pub fn clear(&self, provider: Option<ProviderId>) -> Result<()> {
        self.mutate(|creds| match provider {
            Some(p) => {
                creds.remove(&p);
            }
            None => creds.clear(),
        })?;
        tracing::info!(provider = ?provider, "Credentials cleared");
        Ok(())
    }

    /// Classify the stored credential for a provider.
    #[must_use]
    pub fn status(&self, provider: ProviderId) -> CredentialStatus {
        match self.get(provider) {
            None => CredentialStatus::Missing,
            Some(value) if value.is_empty() => CredentialStatus::Missing,
            Some(value) => {
                if self
                    .directory
                    .get(provider)
                    .is_some_and(|d| d.accepts_credential(&value))
                {
                    CredentialStatus::Valid
                } else {
                    CredentialStatus::Invalid
                }
            }
        }
    }

    /// Whether a non-empty credential is stored.
    #[must_use]
    pub fn is_present(&self, provider: ProviderId) -> bool {
        self.status(provider) != CredentialStatus::Missing
    }

    /// Whether a well-formed credential is stored.
    #[must_use]
    pub fn has_valid(&self, provider: ProviderId) -> bool {
        self.status(provider) == CredentialStatus::Valid
    }

    /// Whether any provider has a well-formed credential.
    #[must_use]
    pub fn any_valid(&self) -> bool {
        ProviderId::ALL.iter().any(|p| self.has_valid(*p))
    }

    /// Providers with a stored credential, most preferred first.
    #[must_use]
    pub fn configured(&self) -> Vec<CredentialSummary> {
        let snapshot = self.snapshot();
        self.directory
            .all()
            .into_iter()
            .filter_map(|d| {
                let value = snapshot.get(&d.id).filter(|v| !v.is_empty())?;
                Some(CredentialSummary {
                    provider: d.id,
                    status: if d.accepts_credential(value) {
                        CredentialStatus::Valid
                    } else {
                        CredentialStatus::Invalid
                    },
                    fingerprint: fingerprint(value),
                })
            })
            .collect()
    }

    /// Status of every known provider, for the mode resolver.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<ProviderId, CredentialStatus> {
        ProviderId::ALL
            .iter()
            .map(|p| (*p, self.status(*p)))
            .collect()
    }

    fn snapshot(&self) -> BTreeMap<ProviderId, String> {
        self.credentials
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Apply `f` to a copy, persist it, then publish it.
    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<ProviderId, String>)) -> Result<()> {
        let mut guard = self
            .credentials
            .lock()
            .map_err(|_| CourierError::Storage("credential lock poisoned".to_string()))?;
        let mut next = guard.clone();
        f(&mut next);
        persist(self.kv.as_ref(), &next)?;
        *guard = next;
        Ok(())
    }
}

fn persist(kv: &dyn KvStore, credentials: &BTreeMap<ProviderId, String>) -> Result<()> {
    let file = CredentialsFile {
        version: CREDENTIALS_VERSION,
        credentials: credentials
            .iter()
            .map(|(id, value)| (id.cli_name().to_string(), value.clone()))
            .collect(),
    };
    kv.put(CREDENTIALS_KEY, &serde_json::to_string(&file)?)
}

fn parse_current(raw: &str) -> BTreeMap<ProviderId, String> {
    match serde_json::from_str::<CredentialsFile>(raw) {
        Ok(file) => {
            if file.version != CREDENTIALS_VERSION {
                tracing::warn!(version = file.version, "Unexpected credential document version");
            }
            into_provider_map(file.credentials)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Stored credentials are corrupt; starting empty");
            BTreeMap::new()
        }
    }
}

fn into_provider_map(raw: BTreeMap<String, String>) -> BTreeMap<ProviderId, String> {
    raw.into_iter()
        .filter_map(|(name, value)| match ProviderId::parse(&name) {
            Some(id) if !value.trim().is_empty() => Some((id, value.trim().to_string())),
            Some(_) => None,
            None => {
                tracing::warn!(provider = %name, "Dropping credential for unknown provider");
                None
            }
        })
        .collect()
}

/// Read every legacy layout, merge, write the current document, drop legacy keys.
fn migrate_legacy(kv: &dyn KvStore) -> BTreeMap<ProviderId, String> {
    let mut merged = BTreeMap::new();
    let mut legacy_keys = Vec::new();

    match kv.get(LEGACY_BLOB_KEY) {
        Ok(Some(raw)) => {
            legacy_keys.push(LEGACY_BLOB_KEY.to_string());
            match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(blob) => merged.extend(into_provider_map(blob)),
                Err(e) => tracing::warn!(error = %e, "Skipping corrupt legacy credential blob"),
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read legacy credential blob"),
    }

    for id in ProviderId::ALL {
        let key = legacy_provider_key(*id);
        match kv.get(&key) {
            Ok(Some(value)) => {
                legacy_keys.push(key);
                let value = value.trim();
                if !value.is_empty() {
                    // Earlier layouts take precedence.
                    merged.entry(*id).or_insert_with(|| value.to_string());
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, key = %key, "Could not read legacy credential"),
        }
    }

    if legacy_keys.is_empty() {
        return merged;
    }

    match persist(kv, &merged) {
        Ok(()) => {
            for key in &legacy_keys {
                if let Err(e) = kv.remove(key) {
                    tracing::warn!(error = %e, key = %key, "Could not delete legacy credential key");
                }
            }
            tracing::info!(
                migrated = merged.len(),
                layouts = legacy_keys.len(),
                "Migrated legacy credentials"
            );
        }
        // Legacy keys stay in place so the next load retries the migration.
        Err(e) => tracing::warn!(error = %e, "Could not write migrated credentials"),
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKvStore;

    fn store_with(kv: MemoryKvStore) -> (Arc<MemoryKvStore>, CredentialStore) {
        let kv = Arc::new(kv);
        let store = CredentialStore::load(kv.clone(), ProviderDirectory::new());
        (kv, store)
    }

    #[test]
    fn set_accepts_matching_prefix() {
        let (_, store) = store_with(MemoryKvStore::new());
        store.set(ProviderId::Groq, "gsk_x").unwrap();
        assert_eq!(store.get(ProviderId::Groq).as_deref(), Some("gsk_x"));
        assert!(store.has_valid(ProviderId::Groq));
    }

    #[test]
    fn set_rejects_wrong_prefix_and_keeps_prior_value() {
        let (_, store) = store_with(MemoryKvStore::new());
        store.set(ProviderId::Groq, "gsk_original").unwrap();

        let err = store.set(ProviderId::Groq, "sk_x").unwrap_err();
        assert!(matches!(
            err,
            CourierError::InvalidCredentialFormat { ref expected_prefix, .. } if expected_prefix == "gsk_"
        ));
        assert_eq!(
            store.get(ProviderId::Groq).as_deref(),
            Some("gsk_original")
        );
    }

    #[test]
    fn every_mutation_persists_the_full_set() {
        let (kv, store) = store_with(MemoryKvStore::new());
        store.set(ProviderId::Groq, "gsk_a").unwrap();
        store.set(ProviderId::OpenAi, "sk-b").unwrap();

        let reloaded = CredentialStore::load(kv.clone(), ProviderDirectory::new());
        assert_eq!(reloaded.get(ProviderId::Groq).as_deref(), Some("gsk_a"));
        assert_eq!(reloaded.get(ProviderId::OpenAi).as_deref(), Some("sk-b"));

        store.clear(Some(ProviderId::Groq)).unwrap();
        let reloaded = CredentialStore::load(kv.clone(), ProviderDirectory::new());
        assert!(reloaded.get(ProviderId::Groq).is_none());
        assert!(reloaded.get(ProviderId::OpenAi).is_some());

        store.clear(None).unwrap();
        let reloaded = CredentialStore::load(kv, ProviderDirectory::new());
        assert!(reloaded.configured().is_empty());
    }

    #[test]
    fn migrates_legacy_layouts_with_blob_precedence() {
        let kv = MemoryKvStore::new()
            .with_entry(LEGACY_BLOB_KEY, r#"{"groq":"gsk_from_blob","mystery":"x"}"#)
            .with_entry("groq_api_key", "gsk_from_single")
            .with_entry("anthropic_api_key", "sk-ant-single");
        let (kv, store) = store_with(kv);

        assert_eq!(
            store.get(ProviderId::Groq).as_deref(),
            Some("gsk_from_blob")
        );
        assert_eq!(
            store.get(ProviderId::Anthropic).as_deref(),
            Some("sk-ant-single")
        );
        assert_eq!(kv.keys(), vec![CREDENTIALS_KEY.to_string()]);
    }

    #[test]
    fn migration_tolerates_corrupt_blob() {
        let kv = MemoryKvStore::new()
            .with_entry(LEGACY_BLOB_KEY, "{not json")
            .with_entry("openai_api_key", "sk-ok");
        let (_, store) = store_with(kv);
        assert_eq!(store.get(ProviderId::OpenAi).as_deref(), Some("sk-ok"));
    }

    #[test]
    fn migrated_invalid_values_are_kept_as_invalid() {
        let kv = MemoryKvStore::new().with_entry("groq_api_key", "not-a-groq-key");
        let (_, store) = store_with(kv);
        assert_eq!(store.status(ProviderId::Groq), CredentialStatus::Invalid);
        assert!(store.is_present(ProviderId::Groq));
        assert!(!store.any_valid());
    }

    #[test]
    fn current_document_wins_over_legacy() {
        let kv = MemoryKvStore::new()
            .with_entry(
                CREDENTIALS_KEY,
                r#"{"version":2,"credentials":{"openai":"sk-current"}}"#,
            )
            .with_entry("groq_api_key", "gsk_legacy");
        let (_, store) = store_with(kv);
        assert_eq!(store.get(ProviderId::OpenAi).as_deref(), Some("sk-current"));
        assert!(store.get(ProviderId::Groq).is_none());
    }

    #[test]
    fn corrupt_current_document_loads_empty() {
        let kv = MemoryKvStore::new().with_entry(CREDENTIALS_KEY, "garbage");
        let (_, store) = store_with(kv);
        assert!(store.configured().is_empty());
    }

    #[test]
    fn configured_lists_by_priority_without_secrets() {
        let (_, store) = store_with(MemoryKvStore::new());
        store.set(ProviderId::Anthropic, "sk-ant-secret").unwrap();
        store.set(ProviderId::Groq, "gsk_secret").unwrap();

        let listed = store.configured();
        assert_eq!(listed[0].provider, ProviderId::Groq);
        assert_eq!(listed[1].provider, ProviderId::Anthropic);
        assert_eq!(listed[0].fingerprint.len(), 12);
        assert!(!listed[0].fingerprint.contains("secret"));
    }
}
