//! Contextual LLM backend over the OpenAI chat-completions API.
//!
//! Good at colloquial and dialectal Arabic and at following domain
//! instructions.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Candidate, TranslateJob, TranslationBackend};
use crate::error::{BackendError, BackendResult};

const TRANSLATION_SYSTEM_PROMPT: &str = "\
You are a professional Arabic-to-English translator specializing in \
Modern Standard Arabic, classical texts, technical and legal Arabic, and \
common dialectal expressions.

Rules:
1. Output ONLY the English translation, with no notes, transliterations, or explanations
2. Preserve the original meaning, tone, and register
3. Render idiomatic expressions as natural English equivalents
4. Keep proper nouns in standard English transliteration
5. Maintain paragraph structure and formatting";

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("OpenAI API key is required");
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn user_message(job: &TranslateJob) -> String {
        match &job.context {
            Some(context) => format!(
                "Context (for reference only, do NOT translate):\n{context}\n\n---\n\n\
                 Translate the following Arabic text to English:\n\n{}",
                job.text
            ),
            None => format!("Translate the following Arabic text to English:\n\n{}", job.text),
        }
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    fn id(&self) -> &'static str {
        "openai"
    }

    async fn translate(&self, job: &TranslateJob) -> BackendResult<Candidate> {
        if job.text.trim().is_empty() {
            return Err(BackendError::EmptyInput);
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: TRANSLATION_SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: Self::user_message(job),
                },
            ],
            max_tokens: 4096,
            temperature: 0.3,
        };

        tracing::debug!("openai: sending {} chars", job.text.chars().count());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let response: ChatResponse = response.json().await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".into()))?;
        let translated = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if translated.is_empty() {
            return Err(BackendError::EmptyResult);
        }

        let finish_reason = choice.finish_reason.as_deref().unwrap_or_default();
        let mut confidence = 0.87;
        if finish_reason == "stop" {
            confidence = 0.89;
        }
        if translated.chars().count() < job.text.chars().count() / 5 {
            confidence *= 0.7;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("model".into(), self.model.clone().into());
        metadata.insert("finish_reason".into(), finish_reason.into());
        if let Some(usage) = response.usage {
            metadata.insert("prompt_tokens".into(), usage.prompt_tokens.into());
            metadata.insert("completion_tokens".into(), usage.completion_tokens.into());
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
        assert!(OpenAiBackend::new("", "gpt-4o", None).is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_input_without_network() {
        let backend = OpenAiBackend::new("sk-test", "gpt-4o", None).unwrap();
        let err = backend
            .translate(&TranslateJob::new("\t\n", "ar", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyInput));
    }
}
