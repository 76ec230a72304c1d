mod claude;
mod deepl;
mod google;
mod openai;

pub use claude::ClaudeBackend;
pub use deepl::DeeplBackend;
pub use google::GoogleBackend;
pub use openai::OpenAiBackend;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EnsembleConfig;
use crate::error::BackendResult;

/// The four supported translation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Claude,
    Deepl,
    OpenAi,
    Google,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Deepl => "deepl",
            Self::OpenAi => "openai",
            Self::Google => "google",
        }
    }

    /// Reverse lookup from a backend id string.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "claude" => Some(Self::Claude),
            "deepl" => Some(Self::Deepl),
            "openai" => Some(Self::OpenAi),
            "google" => Some(Self::Google),
            _ => None,
        }
    }

    /// Per-backend base backoff, used unless overridden in config.
    pub fn default_base_backoff(&self) -> Duration {
        match self {
            Self::Claude | Self::OpenAi => Duration::from_secs(2),
            Self::Deepl => Duration::from_millis(1500),
            Self::Google => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One translation request: the immutable input handed to every backend.
#[derive(Debug, Clone)]
pub struct TranslateJob {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Preceding source text, for disambiguation only; never translated.
    pub context: Option<String>,
}

impl TranslateJob {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.to_lowercase(),
            target_lang: target_lang.to_lowercase(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }
}

/// One backend's output for one request. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub backend_id: String,
    pub source_text: String,
    pub translated_text: String,
    /// Self-assessed confidence in [0, 1].
    pub self_confidence: f64,
    pub latency: Duration,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
}

impl Candidate {
    /// A candidate that failed before or during the provider call.
    pub fn failed(backend_id: &str, source_text: &str, error: String) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            source_text: source_text.to_string(),
            translated_text: String::new(),
            self_confidence: 0.0,
            latency: Duration::ZERO,
            metadata: serde_json::Map::new(),
            error: Some(error),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none() && !self.translated_text.trim().is_empty()
    }
}

/// The uniform translate contract, implemented once per provider.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Stable identifier used in reports and tie-breaks.
    fn id(&self) -> &'static str;

    /// Translate one job. Blocking from the caller's perspective; retry
    /// and timeout envelopes are applied by the orchestrator.
    async fn translate(&self, job: &TranslateJob) -> BackendResult<Candidate>;
}

/// The set of configured backends, frozen at construction, held in
/// preference order.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn TranslationBackend>>,
    preference: Vec<String>,
}

impl BackendRegistry {
    /// Instantiate an adapter for every backend with a credential,
    /// skipping (with a warning) any adapter that fails to construct.
    pub fn from_config(config: &EnsembleConfig) -> Self {
        let mut backends: Vec<Arc<dyn TranslationBackend>> = Vec::new();

        for &kind in &config.preference_order {
            let Some(provider) = config.credential_for(kind) else {
                continue;
            };
            let built: Result<Arc<dyn TranslationBackend>> = match kind {
                BackendKind::Claude => ClaudeBackend::new(
                    &provider.api_key,
                    &config.claude_model,
                    provider.base_url.as_deref(),
                )
                .map(|b| Arc::new(b) as Arc<dyn TranslationBackend>),
                BackendKind::Google => {
                    GoogleBackend::new(&provider.api_key, provider.base_url.as_deref())
                        .map(|b| Arc::new(b) as Arc<dyn TranslationBackend>)
                }
                BackendKind::Deepl => {
                    DeeplBackend::new(&provider.api_key, provider.base_url.as_deref())
                        .map(|b| Arc::new(b) as Arc<dyn TranslationBackend>)
                }
                BackendKind::OpenAi => OpenAiBackend::new(
                    &provider.api_key,
                    &config.openai_model,
                    provider.base_url.as_deref(),
                )
                .map(|b| Arc::new(b) as Arc<dyn TranslationBackend>),
            };

            match built {
                Ok(backend) => {
                    info!("initialized backend: {kind}");
                    backends.push(backend);
                }
                Err(e) => warn!("failed to initialize {kind} backend: {e}; skipping"),
            }
        }

        Self {
            backends,
            preference: config.preference_order.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Build a registry directly from backend instances (test seam). The
    /// given order doubles as the preference order.
    pub fn from_backends(backends: Vec<Arc<dyn TranslationBackend>>) -> Self {
        let preference = backends.iter().map(|b| b.id().to_string()).collect();
        Self { backends, preference }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends in preference order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TranslationBackend>> {
        self.backends.iter()
    }

    /// The deterministic preference order of backend ids, used for
    /// tie-breaking and the ensemble-disabled path.
    pub fn preference_order(&self) -> &[String] {
        &self.preference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(serde_json::to_string(&BackendKind::Claude).unwrap(), "\"claude\"");
        assert_eq!(serde_json::to_string(&BackendKind::OpenAi).unwrap(), "\"openai\"");
        let kind: BackendKind = serde_json::from_str("\"deepl\"").unwrap();
        assert_eq!(kind, BackendKind::Deepl);
    }

    #[test]
    fn test_candidate_success_requires_text_and_no_error() {
        let mut candidate = Candidate::failed("claude", "src", "boom".into());
        assert!(!candidate.is_successful());

        candidate.error = None;
        assert!(!candidate.is_successful(), "blank text is not a success");

        candidate.translated_text = "hello".into();
        assert!(candidate.is_successful());

        candidate.translated_text = "   ".into();
        assert!(!candidate.is_successful());
    }

    #[test]
    fn test_job_lowercases_langs() {
        let job = TranslateJob::new("نص", "AR", "EN");
        assert_eq!(job.source_lang, "ar");
        assert_eq!(job.target_lang, "en");
    }

    #[test]
    fn test_registry_skips_backends_without_credentials() {
        let mut config = EnsembleConfig::default();
        config.providers.anthropic = Some(ProviderConfig {
            api_key: "sk-test".into(),
            base_url: None,
        });
        let registry = BackendRegistry::from_config(&config);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().next().unwrap().id(), "claude");
    }

    #[test]
    fn test_registry_preference_order_from_config() {
        let config = EnsembleConfig::default();
        let registry = BackendRegistry::from_config(&config);
        assert!(registry.is_empty());
        assert_eq!(
            registry.preference_order(),
            ["claude", "deepl", "openai", "google"]
        );
    }
}
