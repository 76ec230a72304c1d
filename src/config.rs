use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Configuration for the translation ensemble.
///
/// Credentials are resolved once, here: explicit configuration first,
/// process environment second. Adapters never read the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    #[serde(default = "default_true")]
    pub enable_ensemble: bool,
    #[serde(default)]
    pub force_multi_method: bool,
    /// Gap between the top two automated totals below which the judge is
    /// consulted.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in seconds. When unset, each backend uses its own
    /// default (claude 2.0, google 1.0, deepl 1.5, openai 2.0).
    #[serde(default)]
    pub base_backoff_secs: Option<f64>,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,
    #[serde(default = "default_true")]
    pub judge_enabled: bool,
    #[serde(default = "default_preference_order")]
    pub preference_order: Vec<BackendKind>,

    #[serde(default = "default_claude_model")]
    pub claude_model: String,
    #[serde(default = "default_claude_model")]
    pub judge_model: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_max_chunk_chars() -> usize {
    3000
}

fn default_chunk_overlap_chars() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_quality_threshold() -> f64 {
    0.10
}

fn default_per_call_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_backoff_secs() -> f64 {
    30.0
}

fn default_preference_order() -> Vec<BackendKind> {
    vec![
        BackendKind::Claude,
        BackendKind::Deepl,
        BackendKind::OpenAi,
        BackendKind::Google,
    ]
}

fn default_claude_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub google: Option<ProviderConfig>,
    pub deepl: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults
        toml::from_str("").expect("empty config parses with defaults")
    }
}

impl EnsembleConfig {
    /// Configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("tarjuman");
        Ok(config_dir)
    }

    /// Configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load from the config file when it exists, else start from
    /// defaults; then expand `${VAR}` references and fill missing
    /// credentials from the process environment.
    pub fn resolve() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file at {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        config.expand_env_vars();
        config.apply_env_fallback();
        Ok(config)
    }

    /// Expand environment variable references in API keys.
    fn expand_env_vars(&mut self) {
        for provider in [
            &mut self.providers.anthropic,
            &mut self.providers.google,
            &mut self.providers.deepl,
            &mut self.providers.openai,
        ]
        .into_iter()
        .flatten()
        {
            provider.api_key = expand_env_var(&provider.api_key);
        }
    }

    /// Fill credentials absent from explicit configuration from the
    /// conventional environment variables. Absent variables simply leave
    /// that backend disabled.
    pub fn apply_env_fallback(&mut self) {
        for (slot, var) in [
            (&mut self.providers.anthropic, "ANTHROPIC_API_KEY"),
            (&mut self.providers.google, "GOOGLE_TRANSLATE_API_KEY"),
            (&mut self.providers.deepl, "DEEPL_API_KEY"),
            (&mut self.providers.openai, "OPENAI_API_KEY"),
        ] {
            let missing = slot.as_ref().map(|p| p.api_key.is_empty()).unwrap_or(true);
            if missing && let Ok(key) = std::env::var(var) {
                if key.is_empty() {
                    continue;
                }
                let entry = slot.get_or_insert_with(ProviderConfig::default);
                entry.api_key = key;
            }
        }
    }

    /// Provider configuration for a backend, when it has a credential.
    pub fn credential_for(&self, kind: BackendKind) -> Option<&ProviderConfig> {
        let provider = match kind {
            BackendKind::Claude => self.providers.anthropic.as_ref(),
            BackendKind::Google => self.providers.google.as_ref(),
            BackendKind::Deepl => self.providers.deepl.as_ref(),
            BackendKind::OpenAi => self.providers.openai.as_ref(),
        };
        provider.filter(|p| !p.api_key.is_empty())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.max_backoff_secs)
    }

    /// Base backoff for a backend: the global override when set, else the
    /// backend's own default.
    pub fn base_backoff_for(&self, kind: BackendKind) -> Duration {
        match self.base_backoff_secs {
            Some(secs) => Duration::from_secs_f64(secs),
            None => kind.default_base_backoff(),
        }
    }
}

/// Expand environment variable references like `${VAR_NAME}` or `$VAR`.
fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else if let Some(var_name) = value.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}
