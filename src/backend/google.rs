//! Neural MT backend over the Google Cloud Translation v2 REST API.
//!
//! High-throughput, broad-vocabulary machine translation. Requests are
//! sent as a JSON body first, falling back to form-encoded parameters
//! when the JSON transport fails at the network level.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Candidate, TranslateJob, TranslationBackend};
use crate::error::{BackendError, BackendResult};

pub struct GoogleBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    #[serde(rename = "translatedText")]
    translated_text: String,
    #[serde(rename = "detectedSourceLanguage")]
    detected_source_language: Option<String>,
}

impl GoogleBackend {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("Google Translate API key is required");
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://translation.googleapis.com/language/translate/v2")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn send_json(
        &self,
        request: &TranslateRequest<'_>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(&self.base_url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
    }

    async fn send_form(
        &self,
        request: &TranslateRequest<'_>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(&self.base_url)
            .query(&[("key", self.api_key.as_str())])
            .form(request)
            .send()
            .await
    }
}

#[async_trait]
impl TranslationBackend for GoogleBackend {
    fn id(&self) -> &'static str {
        "google"
    }

    async fn translate(&self, job: &TranslateJob) -> BackendResult<Candidate> {
        if job.text.trim().is_empty() {
            return Err(BackendError::EmptyInput);
        }

        let request = TranslateRequest {
            q: &job.text,
            source: &job.source_lang,
            target: &job.target_lang,
            format: "text",
        };

        tracing::debug!("google: sending {} chars", job.text.chars().count());

        // Transport fallback: JSON body first, form encoding when the
        // request never reached the service.
        let (response, transport) = match self.send_json(&request).await {
            Ok(response) => (response, "json_body"),
            Err(e) if e.status().is_none() => {
                tracing::warn!("google: JSON transport failed ({e}); retrying form-encoded");
                (self.send_form(&request).await?, "form")
            }
            Err(e) => return Err(e.into()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let response: TranslateResponse = response.json().await?;

        let translation = response
            .data
            .translations
            .into_iter()
            .next()
            .ok_or(BackendError::EmptyResult)?;
        let translated = translation.translated_text.trim().to_string();
        if translated.is_empty() {
            return Err(BackendError::EmptyResult);
        }

        let detected = translation.detected_source_language.unwrap_or_default();
        let mut confidence = 0.82;
        if detected.eq_ignore_ascii_case(&job.source_lang) {
            confidence += 0.03;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("transport".into(), transport.into());
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
