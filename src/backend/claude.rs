//! Contextual LLM backend over the Anthropic Messages API.
//!
//! Strongest on idiomatic expressions, formal/classical Arabic, and
//! register preservation, which is why it also leads the default
//! preference order.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Candidate, TranslateJob, TranslationBackend};
use crate::error::{BackendError, BackendResult};

const TRANSLATION_SYSTEM_PROMPT: &str = "\
You are an expert Arabic-to-English translator with deep knowledge of \
Modern Standard Arabic, Classical Arabic, common dialects, and Islamic, \
legal, and technical terminology.

Guidelines:
1. Translate accurately while preserving the original meaning, tone, and register
2. Render idiomatic expressions as natural English equivalents
3. Keep proper nouns in their most common English transliteration
4. Preserve numbers, dates, and references exactly
5. Maintain paragraph structure and formatting

IMPORTANT:
- Output ONLY the English translation, with no notes or explanations
- Do NOT transliterate Arabic; translate to natural English";

pub struct ClaudeBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl ClaudeBackend {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("Anthropic API key is required");
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn user_message(job: &TranslateJob) -> String {
        match &job.context {
            Some(context) => format!(
                "CONTEXT (preceding text for reference, do NOT translate this):\n{context}\n\n---\n\n\
                 Translate the following Arabic text to English:\n\n{}",
                job.text
            ),
            None => format!("Translate the following Arabic text to English:\n\n{}", job.text),
        }
    }
}

#[async_trait]
impl TranslationBackend for ClaudeBackend {
    fn id(&self) -> &'static str {
        "claude"
    }

    async fn translate(&self, job: &TranslateJob) -> BackendResult<Candidate> {
        if job.text.trim().is_empty() {
            return Err(BackendError::EmptyInput);
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            temperature: 0.3,
            system: TRANSLATION_SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::user_message(job),
            }],
        };

        tracing::debug!("claude: sending {} chars", job.text.chars().count());

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let response: MessagesResponse = response.json().await?;

        let translated = response
            .content
            .first()
            .and_then(|c| c.text.as_deref())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if translated.is_empty() {
            return Err(BackendError::EmptyResult);
        }

        let stop_reason = response.stop_reason.as_deref().unwrap_or_default();
        let mut confidence = 0.90;
        if stop_reason == "end_turn" {
            confidence = 0.92;
        }
        if translated.chars().count() < job.text.chars().count() / 5 {
            confidence *= 0.7;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("model".into(), self.model.clone().into());
        metadata.insert("stop_reason".into(), stop_reason.into());
        if let Some(usage) = response.usage {
            metadata.insert("input_tokens".into(), usage.input_tokens.into());
            metadata.insert("output_tokens".into(), usage.output_tokens.into());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(ClaudeBackend::new("", "claude-sonnet-4-20250514", None).is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_input_without_network() {
        let backend = ClaudeBackend::new("sk-test", "claude-sonnet-4-20250514", None).unwrap();
        let job = TranslateJob::new("   ", "ar", "en");
        let err = backend.translate(&job).await.unwrap_err();
        assert!(matches!(err, BackendError::EmptyInput));
    }

    #[test]
    fn test_context_is_labelled_reference_only() {
        let job = TranslateJob::new("النص الحالي", "ar", "en")
            .with_context(Some("النص السابق".to_string()));
        let message = ClaudeBackend::user_message(&job);
        assert!(message.contains("do NOT translate"));
        assert!(message.contains("النص السابق"));
        // The text to translate comes after the context block
        assert!(message.rfind("النص الحالي").unwrap() > message.find("النص السابق").unwrap());
    }
}
