//! Ensemble orchestration: fan out each chunk to every registered
//! backend in parallel, evaluate the candidates, and assemble the
//! per-chunk winners into the final translation.
//!
//! Chunks are strictly serial, since the carry-context passed to a chunk
//! is the preceding chunk's source text and ordering must stay
//! deterministic.
//! Parallelism lives entirely within a chunk's fan-out.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backend::{BackendKind, BackendRegistry, Candidate, TranslateJob, TranslationBackend};
use crate::chunker::Chunker;
use crate::config::EnsembleConfig;
use crate::error::EnsembleError;
use crate::evaluator::{AnthropicJudge, Judge, QualityEvaluator, QualityReport};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Slack added to the per-call timeout to form the per-chunk deadline.
const CHUNK_DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Result of one ensemble translation.
#[derive(Debug, Serialize)]
pub struct EnsembleOutcome {
    /// Final translation: per-chunk winners joined with a single space.
    pub text: String,
    /// The winning candidate of the last chunk.
    pub best: Candidate,
    /// Every candidate produced, across all chunks, successful or not.
    pub candidates: Vec<Candidate>,
    /// The last chunk's evaluation; absent when the evaluator never ran
    /// (single backend, or ensemble mode disabled).
    pub report: Option<QualityReport>,
}

/// Multi-backend translation orchestrator.
pub struct TranslationEnsemble {
    registry: BackendRegistry,
    evaluator: QualityEvaluator,
    chunker: Chunker,
    config: EnsembleConfig,
}

impl TranslationEnsemble {
    /// Discover backends from the configuration and freeze the registry.
    pub fn new(config: EnsembleConfig) -> Result<Self, EnsembleError> {
        let registry = BackendRegistry::from_config(&config);

        let judge: Option<Box<dyn Judge>> = if config.judge_enabled {
            config
                .credential_for(BackendKind::Claude)
                .and_then(|provider| {
                    AnthropicJudge::new(
                        &provider.api_key,
                        &config.judge_model,
                        provider.base_url.as_deref(),
                    )
                    .map(|j| Box::new(j) as Box<dyn Judge>)
                    .map_err(|e| warn!("judge unavailable: {e}"))
                    .ok()
                })
        } else {
            None
        };

        Self::with_registry(registry, judge, config)
    }

    /// Build from an explicit registry (and optional judge), the seam
    /// used by tests and embedders.
    pub fn with_registry(
        registry: BackendRegistry,
        judge: Option<Box<dyn Judge>>,
        config: EnsembleConfig,
    ) -> Result<Self, EnsembleError> {
        if registry.is_empty() {
            return Err(EnsembleError::NoBackends);
        }

        info!(
            "translation ensemble ready with {} backend(s): {:?}",
            registry.len(),
            registry.iter().map(|b| b.id()).collect::<Vec<_>>()
        );

        let evaluator = QualityEvaluator::new(
            registry.preference_order().to_vec(),
            config.quality_threshold,
        )
        .with_judge(judge);
        let chunker = Chunker::new(config.max_chunk_chars, config.chunk_overlap_chars);

        Ok(Self {
            registry,
            evaluator,
            chunker,
            config,
        })
    }

    /// Translate a job: chunk, fan out per chunk, evaluate, and join the
    /// winners.
    pub async fn translate(&self, job: &TranslateJob) -> Result<EnsembleOutcome, EnsembleError> {
        if job.text.trim().is_empty() {
            return Err(EnsembleError::EmptyInput);
        }

        let chunks = self.chunker.split(&job.text);
        if chunks.is_empty() {
            return Err(EnsembleError::EmptyInput);
        }
        if chunks.len() > 1 {
            info!("input split into {} chunks", chunks.len());
        }

        let mut winners: Vec<Candidate> = Vec::with_capacity(chunks.len());
        let mut all_candidates: Vec<Candidate> = Vec::new();
        let mut last_report: Option<QualityReport> = None;

        for chunk in &chunks {
            // The first chunk inherits the caller's context; later chunks
            // carry the preceding chunk's source text.
            let context = chunk.carry_context.clone().or_else(|| job.context.clone());
            let chunk_job = Arc::new(
                TranslateJob::new(chunk.text.clone(), &job.source_lang, &job.target_lang)
                    .with_context(context),
            );

            let (winner, candidates, report) = self.translate_chunk(chunk_job).await?;
            all_candidates.extend(candidates);
            winners.push(winner);
            last_report = report;
        }

        let text = winners
            .iter()
            .map(|w| w.translated_text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let best = winners.pop().ok_or(EnsembleError::EmptyInput)?;

        Ok(EnsembleOutcome {
            text,
            best,
            candidates: all_candidates,
            report: last_report,
        })
    }

    async fn translate_chunk(
        &self,
        job: Arc<TranslateJob>,
    ) -> Result<(Candidate, Vec<Candidate>, Option<QualityReport>), EnsembleError> {
        // Single backend: call it directly, no evaluator.
        if self.registry.len() == 1 {
            let backend = self
                .registry
                .iter()
                .next()
                .ok_or(EnsembleError::NoBackends)?;
            let deadline = Instant::now() + self.config.per_call_timeout() + CHUNK_DEADLINE_SLACK;
            let candidate = self
                .call_backend(Arc::clone(backend), Arc::clone(&job), deadline)
                .await;
            if !candidate.is_successful() {
                return Err(EnsembleError::AllBackendsFailed {
                    causes: vec![describe_failure(&candidate)],
                });
            }
            return Ok((candidate.clone(), vec![candidate], None));
        }

        // Ensemble disabled: walk the preference order, first success wins.
        if !self.config.enable_ensemble && !self.config.force_multi_method {
            return self.translate_preferred(job).await;
        }

        self.run_ensemble(job).await
    }

    /// Sequentially try backends in preference order until one succeeds.
    async fn translate_preferred(
        &self,
        job: Arc<TranslateJob>,
    ) -> Result<(Candidate, Vec<Candidate>, Option<QualityReport>), EnsembleError> {
        let mut attempted: Vec<Candidate> = Vec::new();

        for backend in self.registry.iter() {
            let deadline = Instant::now() + self.config.per_call_timeout() + CHUNK_DEADLINE_SLACK;
            let candidate = self
                .call_backend(Arc::clone(backend), Arc::clone(&job), deadline)
                .await;
            if candidate.is_successful() {
                attempted.push(candidate.clone());
                return Ok((candidate, attempted, None));
            }
            warn!("{} failed, trying next preferred backend", backend.id());
            attempted.push(candidate);
        }

        Err(EnsembleError::AllBackendsFailed {
            causes: attempted.iter().map(describe_failure).collect(),
        })
    }

    /// Fan out to every backend in parallel and let the evaluator pick
    /// the winner.
    async fn run_ensemble(
        &self,
        job: Arc<TranslateJob>,
    ) -> Result<(Candidate, Vec<Candidate>, Option<QualityReport>), EnsembleError> {
        let deadline = Instant::now() + self.config.per_call_timeout() + CHUNK_DEADLINE_SLACK;
        let expected: Vec<&'static str> = self.registry.iter().map(|b| b.id()).collect();

        let mut join_set: JoinSet<Candidate> = JoinSet::new();
        for backend in self.registry.iter() {
            let backend = Arc::clone(backend);
            let job = Arc::clone(&job);
            let timeout = self.config.per_call_timeout();
            let policy = self.policy_for(backend.id());

            join_set.spawn(async move {
                let started = Instant::now();
                let result = tokio::time::timeout(
                    timeout,
                    retry_with_backoff(backend.id(), &policy, Some(deadline), || {
                        let backend = Arc::clone(&backend);
                        let job = Arc::clone(&job);
                        async move { backend.translate(&job).await }
                    }),
                )
                .await;

                let mut candidate = match result {
                    Ok(Ok(candidate)) => candidate,
                    Ok(Err(e)) => Candidate::failed(backend.id(), &job.text, e.to_string()),
                    Err(_) => {
                        Candidate::failed(backend.id(), &job.text, "operation timed out".into())
                    }
                };
                candidate.latency = started.elapsed();
                info!(
                    "{}: {} chars, confidence {:.2}, {:.1}s",
                    candidate.backend_id,
                    candidate.translated_text.chars().count(),
                    candidate.self_confidence,
                    candidate.latency.as_secs_f64()
                );
                candidate
            });
        }

        // Collect under the chunk deadline; abandoned calls become
        // failed candidates.
        let mut candidates: Vec<Candidate> = Vec::with_capacity(expected.len());
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok(candidate))) => candidates.push(candidate),
                Ok(Some(Err(join_err))) => warn!("backend task failed to complete: {join_err}"),
                Ok(None) => break,
                Err(_) => {
                    warn!("chunk deadline exceeded; abandoning outstanding backends");
                    join_set.abort_all();
                    break;
                }
            }
        }
        for id in &expected {
            if !candidates.iter().any(|c| c.backend_id == *id) {
                candidates.push(Candidate::failed(id, &job.text, "deadline exceeded".into()));
            }
        }

        if !candidates.iter().any(|c| c.is_successful()) {
            return Err(EnsembleError::AllBackendsFailed {
                causes: candidates.iter().map(describe_failure).collect(),
            });
        }

        let report = self.evaluator.evaluate(&job.text, &candidates).await;

        let winner = report
            .best_backend
            .as_deref()
            .and_then(|id| {
                candidates
                    .iter()
                    .find(|c| c.backend_id == id && c.is_successful())
            })
            .or_else(|| candidates.iter().find(|c| c.is_successful()))
            .cloned()
            .ok_or_else(|| EnsembleError::AllBackendsFailed {
                causes: candidates.iter().map(describe_failure).collect(),
            })?;

        info!(
            "chunk winner: {} (score {:.3})",
            winner.backend_id,
            report.scores.get(&winner.backend_id).copied().unwrap_or(0.0)
        );

        Ok((winner, candidates, Some(report)))
    }

    /// One wrapped backend call: retry envelope inside a per-call
    /// timeout, latency measured across all attempts.
    async fn call_backend(
        &self,
        backend: Arc<dyn TranslationBackend>,
        job: Arc<TranslateJob>,
        deadline: Instant,
    ) -> Candidate {
        let started = Instant::now();
        let policy = self.policy_for(backend.id());
        let result = tokio::time::timeout(
            self.config.per_call_timeout(),
            retry_with_backoff(backend.id(), &policy, Some(deadline), || {
                let backend = Arc::clone(&backend);
                let job = Arc::clone(&job);
                async move { backend.translate(&job).await }
            }),
        )
        .await;

        let mut candidate = match result {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(e)) => Candidate::failed(backend.id(), &job.text, e.to_string()),
            Err(_) => Candidate::failed(backend.id(), &job.text, "operation timed out".into()),
        };
        candidate.latency = started.elapsed();
        candidate
    }

    fn policy_for(&self, backend_id: &str) -> RetryPolicy {
        let base_backoff = match BackendKind::from_id(backend_id) {
            Some(kind) => self.config.base_backoff_for(kind),
            None => self
                .config
                .base_backoff_secs
                .map(Duration::from_secs_f64)
                .unwrap_or(Duration::from_secs(1)),
        };
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_backoff,
            max_backoff: self.config.max_backoff(),
        }
    }
}

fn describe_failure(candidate: &Candidate) -> String {
    format!(
        "{}: {}",
        candidate.backend_id,
        candidate.error.as_deref().unwrap_or("unknown error")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_fails_without_backends() {
        let config = EnsembleConfig::default();
        let registry = BackendRegistry::from_backends(vec![]);
        let result = TranslationEnsemble::with_registry(registry, None, config);
        assert!(matches!(result, Err(EnsembleError::NoBackends)));
    }
}
