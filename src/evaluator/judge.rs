//! LLM-as-judge arbitration for close automated rankings.
//!
//! Judge responses are unpredictable: they may wrap the JSON verdict in
//! markdown fences or surround it with prose. The parser extracts the
//! outermost JSON object and tolerates missing fields; any transport or
//! parse failure is reported to the evaluator, which proceeds without
//! the judge.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::backend::Candidate;

/// Maximum source prefix included in the judge prompt.
const MAX_SOURCE_CHARS: usize = 2000;

/// Normalized judge output: per-backend mean score, per-dimension scores
/// (all scaled to [0, 1]), and a textual rationale.
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub scores: HashMap<String, f64>,
    pub dimensions: HashMap<String, BTreeMap<String, f64>>,
    pub best_method: String,
    pub reasoning: String,
}

/// An arbiter consulted when automated totals are too close to call.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, source: &str, candidates: &[&Candidate]) -> Result<JudgeVerdict>;
}

/// Judge backed by the Anthropic Messages API. Shares the contextual-LLM
/// credential.
pub struct AnthropicJudge {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
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
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Verdict document as produced by the judge, before normalization.
/// Dimension scores are integers in [1, 10].
#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    evaluations: HashMap<String, HashMap<String, serde_json::Value>>,
    #[serde(default)]
    best_method: String,
    #[serde(default)]
    reasoning: String,
}

impl AnthropicJudge {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("judge requires the Anthropic API key");
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

    fn build_prompt(source: &str, candidates: &[&Candidate]) -> String {
        let source_prefix: String = source.chars().take(MAX_SOURCE_CHARS).collect();

        let mut translations_block = String::new();
        let mut template_parts = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            translations_block.push_str(&format!(
                "\n--- TRANSLATION {} (method: {}) ---\n{}\n",
                i + 1,
                candidate.backend_id,
                candidate.translated_text
            ));
            template_parts.push(format!(
                "\"{}\": {{\"accuracy\": <1-10>, \"fluency\": <1-10>, \"completeness\": <1-10>, \
                 \"terminology\": <1-10>, \"register\": <1-10>}}",
                candidate.backend_id
            ));
        }

        format!(
            "You are an expert translation quality evaluator specializing in \
             Arabic-to-English translation.\n\n\
             You will be given the original Arabic text and {n} different English translations.\n\
             Evaluate each translation on these dimensions (score 1-10 for each):\n\n\
             1. Accuracy: does the translation faithfully convey the original meaning? \
             Check for mistranslations, omissions, and additions.\n\
             2. Fluency: is the English natural, grammatically correct, and readable?\n\
             3. Completeness: does the translation cover ALL of the source content?\n\
             4. Terminology: are domain-specific terms translated correctly and consistently?\n\
             5. Register: does the translation maintain the appropriate formality level?\n\n\
             ORIGINAL ARABIC TEXT:\n{source}\n\n{translations}\n\
             Respond in this EXACT JSON format (no other text):\n\
             {{\n    \"evaluations\": {{\n        {template}\n    }},\n    \
             \"best_method\": \"<method name of the best translation>\",\n    \
             \"reasoning\": \"<brief explanation of why the best translation wins>\"\n}}",
            n = candidates.len(),
            source = source_prefix,
            translations = translations_block,
            template = template_parts.join(",\n        "),
        )
    }

    /// Scale raw 1-10 integer scores to [0, 1] and compute per-backend
    /// means.
    fn normalize(raw: RawVerdict) -> JudgeVerdict {
        let mut scores = HashMap::new();
        let mut dimensions = HashMap::new();

        for (backend_id, dims) in raw.evaluations {
            let mut normalized = BTreeMap::new();
            for (name, value) in dims {
                if let Some(v) = value.as_f64() {
                    normalized.insert(name, (v / 10.0).clamp(0.0, 1.0));
                }
            }
            if !normalized.is_empty() {
                let mean = normalized.values().sum::<f64>() / normalized.len() as f64;
                scores.insert(backend_id.clone(), mean);
            }
            dimensions.insert(backend_id, normalized);
        }

        JudgeVerdict {
            scores,
            dimensions,
            best_method: raw.best_method,
            reasoning: raw.reasoning,
        }
    }
}

#[async_trait]
impl Judge for AnthropicJudge {
    async fn evaluate(&self, source: &str, candidates: &[&Candidate]) -> Result<JudgeVerdict> {
        tracing::info!("judge: evaluating {} candidate translations", candidates.len());

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 2048,
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::build_prompt(source, candidates),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("judge request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("judge request returned HTTP {status}: {body}");
        }

        let response: MessagesResponse = response.json().await.context("judge response body")?;
        let text = response
            .content
            .first()
            .and_then(|c| c.text.as_deref())
            .context("judge response had no text content")?;

        let json = extract_json_object(text).context("judge did not return a JSON object")?;
        let raw: RawVerdict = serde_json::from_str(&json).context("judge verdict JSON")?;
        Ok(Self::normalize(raw))
    }
}

/// Extract the outermost JSON object from a response that may contain
/// markdown fences or surrounding prose.
pub fn extract_json_object(response: &str) -> Option<String> {
    let stripped = strip_code_fences(response.trim());

    let start = stripped.find('{')?;
    let end = find_matching_brace(&stripped[start..])?;
    Some(stripped[start..=start + end].to_string())
}

/// Strip markdown code fences (``` or ```json) from around content.
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    if s.starts_with("```")
        && let Some(first_newline) = s.find('\n')
    {
        let inner = &s[first_newline + 1..];
        if let Some(closing) = inner.rfind("```") {
            return inner[..closing].trim();
        }
    }
    s
}

/// Byte index of the `}` matching the first `{`, ignoring braces inside
/// string literals. `None` when unbalanced.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
