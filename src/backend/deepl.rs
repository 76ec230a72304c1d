//! Fluency-optimized neural MT backend over the DeepL v2 API.
//!
//! DeepL produces exceptionally natural target-language output, but its
//! source-language coverage is narrow; requests for unsupported source
//! languages are rejected in preflight, before any network traffic.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Candidate, TranslateJob, TranslationBackend};
use crate::error::{BackendError, BackendResult};

/// Source languages DeepL accepts. Arabic is notably absent, which makes
/// the preflight fail fast for the primary use case of this crate; the
/// ensemble then relies on the remaining backends.
const SUPPORTED_SOURCE_LANGS: &[&str] = &[
    "bg", "cs", "da", "de", "el", "en", "es", "et", "fi", "fr", "hu", "id", "it", "ja", "ko",
    "lt", "lv", "nb", "nl", "pl", "pt", "ro", "ru", "sk", "sl", "sv", "tr", "uk", "zh",
];

/// DeepL target-language codes for the common cases; anything else is
/// uppercased as-is.
fn deepl_target_code(lang: &str) -> String {
    match lang {
        "en" | "en-us" => "EN-US".to_string(),
        "en-gb" => "EN-GB".to_string(),
        "pt" => "PT-BR".to_string(),
        other => other.to_uppercase(),
    }
}

pub struct DeeplBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: Vec<&'a str>,
    source_lang: String,
    target_lang: String,
    preserve_formatting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
    detected_source_language: Option<String>,
}

impl DeeplBackend {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("DeepL API key is required");
        }

        // Free-tier keys carry the ":fx" suffix and use a separate host.
        let default_url = if api_key.ends_with(":fx") {
            "https://api-free.deepl.com/v2/translate"
        } else {
            "https://api.deepl.com/v2/translate"
        };

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or(default_url).trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TranslationBackend for DeeplBackend {
    fn id(&self) -> &'static str {
        "deepl"
    }

    async fn translate(&self, job: &TranslateJob) -> BackendResult<Candidate> {
        if job.text.trim().is_empty() {
            return Err(BackendError::EmptyInput);
        }
        if !SUPPORTED_SOURCE_LANGS.contains(&job.source_lang.as_str()) {
            return Err(BackendError::UnsupportedLanguage {
                backend: "deepl",
                lang: job.source_lang.clone(),
            });
        }

        let request = TranslateRequest {
            text: vec![&job.text],
            source_lang: job.source_lang.to_uppercase(),
            target_lang: deepl_target_code(&job.target_lang),
            preserve_formatting: true,
            context: job.context.as_deref(),
        };

        tracing::debug!("deepl: sending {} chars", job.text.chars().count());

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let response: TranslateResponse = response.json().await?;

        let translation = response
            .translations
            .into_iter()
            .next()
            .ok_or(BackendError::EmptyResult)?;
        let translated = translation.text.trim().to_string();
        if translated.is_empty() {
            return Err(BackendError::EmptyResult);
        }

        let detected = translation.detected_source_language.unwrap_or_default();
        let mut confidence = 0.85;
        if detected.eq_ignore_ascii_case(&job.source_lang) {
            confidence += 0.03;
        }

        let mut metadata = serde_json::Map::new();
        if !detected.is_empty() {
            metadata.insert("detected_lang".into(), detected.into());
        }

        Ok(Candidate {
            backend_id: self.id().to_string(),
            source_text: job.text.clone(),
            translated_text: translated,
            self_confidence: confidence,
            latency: std::time::Duration::ZERO,
            metadata,
            error: None,
        })
    }
}
