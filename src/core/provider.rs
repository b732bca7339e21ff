//! Provider descriptors and directory.
//!
//! Defines every model provider the direct path can reach, the credential
//! prefix each one issues, and the order in which they are preferred when
//! no provider is hinted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::{CourierError, Result};

// =============================================================================
// Provider Enum
// =============================================================================

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Groq,
    OpenRouter,
    Gemini,
    OpenAi,
    Anthropic,
}

impl ProviderId {
    /// All providers in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::Groq,
        Self::OpenRouter,
        Self::Gemini,
        Self::OpenAi,
        Self::Anthropic,
    ];

    /// CLI and storage name for this provider.
    #[must_use]
    pub const fn cli_name(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Display name for human output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Groq => "Groq",
            Self::OpenRouter => "OpenRouter",
            Self::Gemini => "Google Gemini",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    /// Look up a provider by name; `None` when unknown.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.iter().find(|p| p.cli_name() == lower).copied()
    }

    /// Parse from CLI argument.
    ///
    /// # Errors
    /// Returns [`CourierError::UnknownProvider`] for names outside [`Self::ALL`].
    pub fn from_cli_name(name: &str) -> Result<Self> {
        Self::parse(name).ok_or_else(|| CourierError::UnknownProvider(name.to_string()))
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cli_name())
    }
}

// =============================================================================
// Provider Descriptor
// =============================================================================

/// Request/response shape spoken by a provider's chat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// `POST {base}/chat/completions` with bearer auth.
    OpenAiCompatible,
    /// `POST {base}/messages` with `x-api-key` auth.
    Anthropic,
}

/// A model offered by a provider, with per-1k-token pricing in USD.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl ModelInfo {
    const fn new(id: &'static str, input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        Self {
            id,
            input_cost_per_1k,
            output_cost_per_1k,
        }
    }

    /// Whether this model costs nothing to call.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.input_cost_per_1k == 0.0 && self.output_cost_per_1k == 0.0
    }
}

/// Complete provider descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    /// Every valid credential for this provider starts with this prefix.
    pub credential_prefix: &'static str,
    pub api_base: String,
    pub wire: WireFormat,
    pub default_model: &'static str,
    pub models: Vec<ModelInfo>,
    /// Fallback rank; lower is preferred.
    pub priority: u8,
}

impl ProviderDescriptor {
    /// Whether `value` satisfies this provider's credential format.
    #[must_use]
    pub fn accepts_credential(&self, value: &str) -> bool {
        !value.is_empty() && value.starts_with(self.credential_prefix)
    }

    /// Whether the provider lists `model_id`.
    #[must_use]
    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

// =============================================================================
// Provider Directory
// =============================================================================

/// Immutable lookup table of provider descriptors.
#[derive(Debug, Clone)]
pub struct ProviderDirectory {
    descriptors: HashMap<ProviderId, ProviderDescriptor>,
}

impl ProviderDirectory {
    /// Create the directory with the built-in providers.
    #[must_use]
    pub fn new() -> Self {
        let builtin = [
            ProviderDescriptor {
                id: ProviderId::Groq,
                display_name: ProviderId::Groq.display_name(),
                credential_prefix: "gsk_",
                api_base: "https://api.groq.com/openai/v1".to_string(),
                wire: WireFormat::OpenAiCompatible,
                default_model: "llama-3.3-70b-versatile",
                models: vec![
                    ModelInfo::new("llama-3.3-70b-versatile", 0.0, 0.0),
                    ModelInfo::new("llama-3.1-8b-instant", 0.0, 0.0),
                    ModelInfo::new("gemma2-9b-it", 0.0, 0.0),
                ],
                priority: 1,
            },
            ProviderDescriptor {
                id: ProviderId::OpenRouter,
                display_name: ProviderId::OpenRouter.display_name(),
                credential_prefix: "sk-or-",
                api_base: "https://openrouter.ai/api/v1".to_string(),
                wire: WireFormat::OpenAiCompatible,
                default_model: "meta-llama/llama-3.3-70b-instruct:free",
                models: vec![
                    ModelInfo::new("meta-llama/llama-3.3-70b-instruct:free", 0.0, 0.0),
                    ModelInfo::new("openai/gpt-4o-mini", 0.000_15, 0.000_6),
                ],
                priority: 2,
            },
            ProviderDescriptor {
                id: ProviderId::Gemini,
                display_name: ProviderId::Gemini.display_name(),
                credential_prefix: "AIza",
                api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                wire: WireFormat::OpenAiCompatible,
                default_model: "gemini-2.0-flash",
                models: vec![
                    ModelInfo::new("gemini-2.0-flash", 0.000_1, 0.000_4),
                    ModelInfo::new("gemini-1.5-pro", 0.001_25, 0.005),
                ],
                priority: 3,
            },
            ProviderDescriptor {
                id: ProviderId::OpenAi,
                display_name: ProviderId::OpenAi.display_name(),
                credential_prefix: "sk-",
                api_base: "https://api.openai.com/v1".to_string(),
                wire: WireFormat::OpenAiCompatible,
                default_model: "gpt-4o-mini",
                models: vec![
                    ModelInfo::new("gpt-4o-mini", 0.000_15, 0.000_6),
                    ModelInfo::new("gpt-4o", 0.002_5, 0.01),
                ],
                priority: 4,
            },
            ProviderDescriptor {
                id: ProviderId::Anthropic,
                display_name: ProviderId::Anthropic.display_name(),
                credential_prefix: "sk-ant-",
                api_base: "https://api.anthropic.com/v1".to_string(),
                wire: WireFormat::Anthropic,
                default_model: "claude-3-5-haiku-latest",
                models: vec![
                    ModelInfo::new("claude-3-5-haiku-latest", 0.000_8, 0.004),
                    ModelInfo::new("claude-3-5-sonnet-latest", 0.003, 0.015),
                ],
                priority: 5,
            },
        ];

        Self {
            descriptors: builtin.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Override the API base URL for a provider (config or tests).
    #[must_use]
    pub fn with_api_base(mut self, id: ProviderId, api_base: impl Into<String>) -> Self {
        if let Some(descriptor) = self.descriptors.get_mut(&id) {
            descriptor.api_base = api_base.into().trim_end_matches('/').to_string();
        }
        self
    }

    /// Get descriptor for a provider.
    #[must_use]
    pub fn get(&self, id: ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors.get(&id)
    }

    /// Get descriptor by provider name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderDescriptor> {
        ProviderId::parse(name).and_then(|id| self.get(id))
    }

    /// Whether the directory knows this provider.
    #[must_use]
    pub fn has(&self, id: ProviderId) -> bool {
        self.descriptors.contains_key(&id)
    }

    /// All descriptors, most preferred first.
    #[must_use]
    pub fn all(&self) -> Vec<&ProviderDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().collect();
        all.sort_by_key(|d| (d.priority, d.id));
        all
    }

    /// Default model id for a provider.
    #[must_use]
    pub fn default_model(&self, id: ProviderId) -> Option<&'static str> {
        self.get(id).map(|d| d.default_model)
    }

    /// Look up a specific model under a provider.
    #[must_use]
    pub fn model(&self, id: ProviderId, model_id: &str) -> Option<&ModelInfo> {
        self.get(id)?.models.iter().find(|m| m.id == model_id)
    }

    /// True iff every model under the provider has zero cost.
    ///
    /// Unknown providers are never free.
    #[must_use]
    pub fn is_free(&self, id: ProviderId) -> bool {
        self.get(id)
            .is_some_and(|d| !d.models.is_empty() && d.models.iter().all(ModelInfo::is_free))
    }

    /// Check the directory's own consistency.
    ///
    /// # Errors
    /// Returns [`CourierError::InvalidDirectory`] when ranks collide, a
    /// provider has no models, or a default model is not listed.
    pub fn validate(&self) -> Result<()> {
        let mut ranks = HashSet::new();
        for descriptor in self.descriptors.values() {
            if !ranks.insert(descriptor.priority) {
                return Err(CourierError::InvalidDirectory(format!(
                    "duplicate priority {} ({})",
                    descriptor.priority, descriptor.id
                )));
            }
            if descriptor.credential_prefix.is_empty() {
                return Err(CourierError::InvalidDirectory(format!(
                    "{} has an empty credential prefix",
                    descriptor.id
                )));
            }
            if !descriptor.has_model(descriptor.default_model) {
                return Err(CourierError::InvalidDirectory(format!(
                    "{} default model {} is not listed",
                    descriptor.id, descriptor.default_model
                )));
            }
        }
        Ok(())
    }
}

impl Default for ProviderDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_cli_name() {
        assert_eq!(ProviderId::from_cli_name("groq").unwrap(), ProviderId::Groq);
        assert_eq!(
            ProviderId::from_cli_name("OpenAI").unwrap(),
            ProviderId::OpenAi
        );
        assert!(ProviderId::from_cli_name("invalid").is_err());
        assert!(ProviderId::parse("invalid").is_none());
    }

    #[test]
    fn directory_has_all_providers() {
        let directory = ProviderDirectory::new();
        for id in ProviderId::ALL {
            assert!(directory.has(*id));
            assert!(directory.get(*id).is_some());
        }
    }

    #[test]
    fn builtin_directory_is_valid() {
        ProviderDirectory::new().validate().unwrap();
    }

    #[test]
    fn all_is_sorted_by_priority() {
        let directory = ProviderDirectory::new();
        let ranks: Vec<u8> = directory.all().iter().map(|d| d.priority).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert_eq!(directory.all()[0].id, ProviderId::Groq);
    }

    #[test]
    fn is_free_requires_every_model_free() {
        let directory = ProviderDirectory::new();
        assert!(directory.is_free(ProviderId::Groq));
        // OpenRouter mixes free and paid models
        assert!(!directory.is_free(ProviderId::OpenRouter));
        assert!(!directory.is_free(ProviderId::Anthropic));
    }

    #[test]
    fn default_model_lookup() {
        let directory = ProviderDirectory::new();
        assert_eq!(
            directory.default_model(ProviderId::OpenAi),
            Some("gpt-4o-mini")
        );
        assert!(directory.model(ProviderId::OpenAi, "gpt-4o").is_some());
        assert!(directory.model(ProviderId::OpenAi, "nope").is_none());
    }

    #[test]
    fn credential_prefix_rule() {
        let directory = ProviderDirectory::new();
        let groq = directory.get(ProviderId::Groq).unwrap();
        assert!(groq.accepts_credential("gsk_x"));
        assert!(!groq.accepts_credential("sk_x"));
        assert!(!groq.accepts_credential(""));
    }

    #[test]
    fn api_base_override_trims_trailing_slash() {
        let directory =
            ProviderDirectory::new().with_api_base(ProviderId::Groq, "http://127.0.0.1:9000/v1/");
        assert_eq!(
            directory.get(ProviderId::Groq).unwrap().api_base,
            "http://127.0.0.1:9000/v1"
        );
    }

    #[test]
    fn duplicate_priority_is_rejected() {
        let mut directory = ProviderDirectory::new();
        directory
            .descriptors
            .get_mut(&ProviderId::Anthropic)
            .unwrap()
            .priority = 1;
        assert!(matches!(
            directory.validate(),
            Err(CourierError::InvalidDirectory(_))
        ));
    }
}
