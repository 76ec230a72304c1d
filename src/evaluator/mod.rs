//! Multi-dimensional translation quality evaluation.
//!
//! Candidates are scored on five dimensions (accuracy, fluency,
//! completeness, consistency, and cross-candidate agreement) using fast
//! heuristics, then blended with fixed weights. When the top two totals
//! are close, an LLM judge arbitrates (see [`judge`]); judge failures are
//! swallowed and the heuristic ranking stands.

mod judge;

pub use judge::{AnthropicJudge, Judge, JudgeVerdict};

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::Candidate;
use crate::textutil::{arabic_char_ratio, word_jaccard};

/// Fixed weights for blending dimension scores; normalized over the
/// dimensions actually present.
const DIMENSION_WEIGHTS: &[(&str, f64)] = &[
    ("accuracy", 0.30),
    ("fluency", 0.25),
    ("completeness", 0.25),
    ("consistency", 0.10),
    ("cross_agreement", 0.10),
];

/// Sentence enders for the (Arabic) source side.
static SOURCE_SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?،؟\n]+").expect("static regex"));

/// Sentence enders for the (English) output side.
static TARGET_SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?\n]+").expect("static regex"));

static FLUENCY_SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("static regex"));

/// Per-candidate scores on each quality dimension, all in [0, 1].
pub type DimensionScores = BTreeMap<String, f64>;

/// Ranking of a set of candidate translations of one source text.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// backend id → overall score in [0, 1]
    pub scores: HashMap<String, f64>,
    pub dimension_scores: HashMap<String, DimensionScores>,
    /// Winning backend; `None` when every candidate failed.
    pub best_backend: Option<String>,
    pub judge_used: bool,
    pub reasoning: String,
}

impl QualityReport {
    /// Backends ranked by score, highest first.
    pub fn ranking(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> =
            self.scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

/// Evaluates and ranks candidate translations.
pub struct QualityEvaluator {
    preference: Vec<String>,
    quality_threshold: f64,
    judge: Option<Box<dyn Judge>>,
}

impl QualityEvaluator {
    pub fn new(preference: Vec<String>, quality_threshold: f64) -> Self {
        Self {
            preference,
            quality_threshold,
            judge: None,
        }
    }

    pub fn with_judge(mut self, judge: Option<Box<dyn Judge>>) -> Self {
        self.judge = judge;
        self
    }

    /// Evaluate candidates against the source text and pick a winner.
    ///
    /// Failed candidates are recorded with zero scores and can never
    /// win; with no successful candidate at all the report carries no
    /// winner.
    pub async fn evaluate(&self, source: &str, candidates: &[Candidate]) -> QualityReport {
        let successful: Vec<&Candidate> =
            candidates.iter().filter(|c| c.is_successful()).collect();

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut dimension_scores: HashMap<String, DimensionScores> = HashMap::new();

        for candidate in candidates.iter().filter(|c| !c.is_successful()) {
            scores.insert(candidate.backend_id.clone(), 0.0);
            dimension_scores.insert(candidate.backend_id.clone(), zero_dimensions());
        }

        if successful.is_empty() {
            return QualityReport {
                scores,
                dimension_scores,
                best_backend: None,
                judge_used: false,
                reasoning: "all backends failed".to_string(),
            };
        }

        if successful.len() == 1 {
            let only = successful[0];
            scores.insert(only.backend_id.clone(), only.self_confidence);
            let mut dims = DimensionScores::new();
            dims.insert("self_confidence".to_string(), only.self_confidence);
            dimension_scores.insert(only.backend_id.clone(), dims);
            return QualityReport {
                scores,
                dimension_scores,
                best_backend: Some(only.backend_id.clone()),
                judge_used: false,
                reasoning: String::new(),
            };
        }

        // Phase 1: automated heuristics + cross-candidate agreement
        for (i, candidate) in successful.iter().enumerate() {
            let mut dims = heuristic_dimensions(source, candidate);
            dims.insert(
                "cross_agreement".to_string(),
                cross_agreement(&successful, i),
            );

            let mut total = 0.0;
            let mut total_weight = 0.0;
            for (dim, weight) in DIMENSION_WEIGHTS {
                if let Some(score) = dims.get(*dim) {
                    total += score * weight;
                    total_weight += weight;
                }
            }
            let total = if total_weight > 0.0 { total / total_weight } else { 0.0 };

            scores.insert(candidate.backend_id.clone(), total);
            dimension_scores.insert(candidate.backend_id.clone(), dims);
        }

        // Phase 2: judge arbitration when the automated ranking is close
        let mut judge_used = false;
        let mut reasoning = String::new();

        if let Some(judge) = &self.judge
            && self.scores_are_close(&scores, &successful)
        {
            info!("automated totals within {:.2}; consulting judge", self.quality_threshold);
            match judge.evaluate(source, &successful).await {
                Ok(verdict) => {
                    for candidate in &successful {
                        if let Some(judge_score) = verdict.scores.get(&candidate.backend_id)
                            && let Some(total) = scores.get_mut(&candidate.backend_id)
                        {
                            *total = 0.6 * judge_score + 0.4 * *total;
                        }
                    }
                    for (backend_id, judge_dims) in &verdict.dimensions {
                        if let Some(dims) = dimension_scores.get_mut(backend_id) {
                            for (name, value) in judge_dims {
                                dims.insert(format!("judge_{name}"), *value);
                            }
                        }
                    }
                    reasoning = verdict.reasoning;
                    judge_used = true;
                }
                Err(e) => warn!("judge evaluation failed: {e}; keeping heuristic ranking"),
            }
        }

        // Winner: highest total; preference order breaks ties
        let best_backend = successful
            .iter()
            .map(|c| c.backend_id.as_str())
            .min_by(|a, b| {
                let score_a = scores.get(*a).copied().unwrap_or(0.0);
                let score_b = scores.get(*b).copied().unwrap_or(0.0);
                score_b
                    .partial_cmp(&score_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(self.preference_rank(a).cmp(&self.preference_rank(b)))
                    .then(a.cmp(b))
            })
            .map(String::from);

        QualityReport {
            scores,
            dimension_scores,
            best_backend,
            judge_used,
            reasoning,
        }
    }

    fn preference_rank(&self, backend_id: &str) -> usize {
        self.preference
            .iter()
            .position(|p| p == backend_id)
            .unwrap_or(self.preference.len())
    }

    /// The judge runs only when the top two totals among successful
    /// candidates are within the configured threshold.
    fn scores_are_close(&self, scores: &HashMap<String, f64>, successful: &[&Candidate]) -> bool {
        if successful.len() < 2 {
            return false;
        }
        let mut totals: Vec<f64> = successful
            .iter()
            .filter_map(|c| scores.get(&c.backend_id))
            .copied()
            .collect();
        totals.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        totals[0] - totals[1] < self.quality_threshold
    }
}

fn zero_dimensions() -> DimensionScores {
    ["accuracy", "fluency", "completeness", "consistency"]
        .into_iter()
        .map(|d| (d.to_string(), 0.0))
        .collect()
}

/// Heuristic scores for one successful candidate.
fn heuristic_dimensions(source: &str, candidate: &Candidate) -> DimensionScores {
    let text = &candidate.translated_text;
    let mut dims = DimensionScores::new();

    // Accuracy: leftover source script in the output is a strong failure
    // signal; blend with the backend's self-reported confidence.
    let leftover = 1.0 - (5.0 * arabic_char_ratio(text)).min(1.0);
    dims.insert(
        "accuracy".to_string(),
        0.7 * leftover + 0.3 * candidate.self_confidence,
    );

    dims.insert("fluency".to_string(), assess_fluency(text));
    dims.insert("completeness".to_string(), assess_completeness(source, text));
    dims.insert("consistency".to_string(), assess_consistency(text));
    dims
}

/// Length-ratio and sentence-count checks: a faithful Arabic→English
/// translation lands near 1x the source length.
fn assess_completeness(source: &str, text: &str) -> f64 {
    let source_len = source.chars().count();
    let length_ratio = if source_len > 0 {
        text.chars().count() as f64 / source_len as f64
    } else {
        0.0
    };
    let length_score = if (0.5..=2.0).contains(&length_ratio) {
        (1.0 - (1.0 - length_ratio).abs() * 0.3).min(1.0)
    } else {
        (1.0 - (1.0 - length_ratio).abs() * 0.5).max(0.2)
    };

    let source_sentences = SOURCE_SENTENCE_SPLIT.split(source).count();
    let text_sentences = TARGET_SENTENCE_SPLIT.split(text).count();
    let sentence_ratio = if source_sentences > 0 {
        text_sentences as f64 / source_sentences as f64
    } else {
        1.0
    };
    let sentence_score = (1.0 - (1.0 - sentence_ratio).abs() * 0.4).clamp(0.0, 1.0);

    (length_score + sentence_score) / 2.0
}

/// Basic English fluency signals: sentence length in a natural range,
/// length variety, and capitalized sentence starts.
fn assess_fluency(text: &str) -> f64 {
    let sentences: Vec<&str> = FLUENCY_SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() {
        return 0.3;
    }

    let mut score = 0.75;

    let lengths: Vec<f64> = sentences
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .collect();
    if lengths.len() > 1 {
        let avg = lengths.iter().sum::<f64>() / lengths.len() as f64;
        if (8.0..=25.0).contains(&avg) {
            score += 0.1;
        }
        let variance =
            lengths.iter().map(|l| (l - avg).powi(2)).sum::<f64>() / lengths.len() as f64;
        if variance > 10.0 {
            score += 0.05;
        }
    }

    let capitalized = sentences
        .iter()
        .filter(|s| s.chars().next().is_some_and(char::is_uppercase))
        .count();
    score += capitalized as f64 / sentences.len() as f64 * 0.1;

    score.min(1.0)
}

/// Repeated verbatim 3-word shingles indicate a decoder stuck in a loop.
fn assess_consistency(text: &str) -> f64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 10 {
        return 0.8;
    }

    let trigrams: Vec<(&str, &str, &str)> = words
        .windows(3)
        .map(|w| (w[0], w[1], w[2]))
        .collect();
    let unique: std::collections::HashSet<_> = trigrams.iter().collect();
    let unique_ratio = unique.len() as f64 / trigrams.len() as f64;

    (unique_ratio + 0.1).min(1.0)
}

/// Mean word-set similarity with every *other* successful candidate;
/// 0.5 when there is nothing to compare against.
fn cross_agreement(successful: &[&Candidate], index: usize) -> f64 {
    let this = successful[index];
    let similarities: Vec<f64> = successful
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .map(|(_, other)| word_jaccard(&this.translated_text, &other.translated_text))
        .collect();

    if similarities.is_empty() {
        0.5
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(backend_id: &str, source: &str, text: &str, confidence: f64) -> Candidate {
        Candidate {
            backend_id: backend_id.to_string(),
            source_text: source.to_string(),
            translated_text: text.to_string(),
            self_confidence: confidence,
            latency: Duration::ZERO,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    fn evaluator() -> QualityEvaluator {
        QualityEvaluator::new(
            vec![
                "claude".into(),
                "deepl".into(),
                "openai".into(),
                "google".into(),
            ],
            0.10,
        )
    }

    const SOURCE: &str = "أعلنت الأمم المتحدة اليوم عن برنامج جديد لدعم التعليم في المنطقة العربية.";

    #[tokio::test]
    async fn test_all_dimensions_in_unit_interval() {
        let candidates = vec![
            candidate("claude", SOURCE, "The United Nations announced a new program today to support education in the Arab region.", 0.92),
            candidate("google", SOURCE, "UN announced new program today supporting education in Arab region.", 0.82),
        ];
        let report = evaluator().evaluate(SOURCE, &candidates).await;
        for dims in report.dimension_scores.values() {
            for (name, value) in dims {
                assert!((0.0..=1.0).contains(value), "{name} = {value}");
            }
        }
        for total in report.scores.values() {
            assert!((0.0..=1.0).contains(total));
        }
    }

    #[tokio::test]
    async fn test_leftover_arabic_scores_lower_on_accuracy() {
        let candidates = vec![
            candidate("claude", SOURCE, "The العالم العربي responded", 0.9),
            candidate("google", SOURCE, "The Arab world responded", 0.9),
        ];
        let report = evaluator().evaluate(SOURCE, &candidates).await;
        let mixed = report.dimension_scores["claude"]["accuracy"];
        let clean = report.dimension_scores["google"]["accuracy"];
        assert!(mixed < clean, "mixed {mixed} should be below clean {clean}");
    }

    #[tokio::test]
    async fn test_short_output_scores_lower_on_completeness() {
        let long_source = "كلمة ".repeat(60);
        let short = "word ".repeat(6);
        let near = "word ".repeat(54);
        let candidates = vec![
            candidate("claude", &long_source, short.trim(), 0.9),
            candidate("google", &long_source, near.trim(), 0.9),
        ];
        let report = evaluator().evaluate(&long_source, &candidates).await;
        assert!(
            report.dimension_scores["claude"]["completeness"]
                < report.dimension_scores["google"]["completeness"]
        );
    }

    #[tokio::test]
    async fn test_looping_output_scores_lower_on_consistency() {
        let looping = "the same phrase again ".repeat(10);
        let varied = "The ministry published its annual report covering budgets, staffing, \
                      regional programs, and the planned reforms for next year.";
        let candidates = vec![
            candidate("claude", SOURCE, looping.trim(), 0.9),
            candidate("google", SOURCE, varied, 0.9),
        ];
        let report = evaluator().evaluate(SOURCE, &candidates).await;
        assert!(
            report.dimension_scores["claude"]["consistency"]
                < report.dimension_scores["google"]["consistency"]
        );
    }

    #[tokio::test]
    async fn test_agreement_monotonicity() {
        let a = candidate("claude", SOURCE, "The United Nations announced a new program", 0.9);
        let b = candidate("google", SOURCE, "A completely different rendering entirely", 0.8);
        let report = evaluator().evaluate(SOURCE, &[a.clone(), b.clone()]).await;
        let before = report.dimension_scores["claude"]["cross_agreement"];

        // A third candidate textually identical to `a` can only raise
        // a's agreement.
        let twin = candidate("openai", SOURCE, "The United Nations announced a new program", 0.85);
        let report = evaluator().evaluate(SOURCE, &[a, b, twin]).await;
        let after = report.dimension_scores["claude"]["cross_agreement"];
        assert!(after >= before, "{after} < {before}");
    }

    #[tokio::test]
    async fn test_winner_is_deterministic_under_reordering() {
        let a = candidate("claude", SOURCE, "The United Nations announced a new education program today.", 0.92);
        let b = candidate("google", SOURCE, "UN announced education program today in region.", 0.82);
        let c = candidate("openai", SOURCE, "The United Nations announced a new program for education today.", 0.89);

        let forward = evaluator()
            .evaluate(SOURCE, &[a.clone(), b.clone(), c.clone()])
            .await;
        let reversed = evaluator().evaluate(SOURCE, &[c, b, a]).await;
        assert_eq!(forward.best_backend, reversed.best_backend);
        for (backend, score) in &forward.scores {
            assert!((reversed.scores[backend] - score).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_tie_breaks_by_preference_order() {
        // Identical text and confidence: identical totals
        let a = candidate("openai", SOURCE, "The United Nations announced a new program.", 0.9);
        let b = candidate("deepl", SOURCE, "The United Nations announced a new program.", 0.9);
        let report = evaluator().evaluate(SOURCE, &[a, b]).await;
        assert_eq!(report.best_backend.as_deref(), Some("deepl"));
    }

    #[tokio::test]
    async fn test_single_candidate_wins_without_judge() {
        let only = candidate("google", SOURCE, "The United Nations announced a new program.", 0.85);
        let report = evaluator().evaluate(SOURCE, &[only]).await;
        assert_eq!(report.best_backend.as_deref(), Some("google"));
        assert!(!report.judge_used);
        assert!((report.scores["google"] - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_failed_reports_no_winner() {
        let failed = Candidate::failed("claude", SOURCE, "HTTP 500".into());
        let report = evaluator().evaluate(SOURCE, &[failed]).await;
        assert!(report.best_backend.is_none());
        assert_eq!(report.reasoning, "all backends failed");
    }

    #[tokio::test]
    async fn test_failed_candidate_never_wins() {
        let failed = Candidate::failed("claude", SOURCE, "timeout".into());
        let ok = candidate("google", SOURCE, "A perfectly fine translation of the text.", 0.5);
        let report = evaluator().evaluate(SOURCE, &[failed, ok]).await;
        assert_eq!(report.best_backend.as_deref(), Some("google"));
        assert_eq!(report.scores["claude"], 0.0);
    }

    #[tokio::test]
    async fn test_fluency_rewards_capitalized_varied_sentences() {
        let good = "The committee approved the budget. Its members debated for hours before \
                    reaching a decision. Final approval came late in the evening session.";
        let bad = "the committee approved the budget";
        assert!(assess_fluency(good) > assess_fluency(bad));
    }

    // ── judge interaction ───────────────────────────────────────────────

    struct StubJudge {
        favourite: &'static str,
    }

    #[async_trait::async_trait]
    impl Judge for StubJudge {
        async fn evaluate(
            &self,
            _source: &str,
            candidates: &[&Candidate],
        ) -> anyhow::Result<JudgeVerdict> {
            let mut scores = HashMap::new();
            let mut dimensions = HashMap::new();
            for c in candidates {
                let high = c.backend_id == self.favourite;
                let completeness = if high { 1.0 } else { 0.7 };
                scores.insert(c.backend_id.clone(), if high { 0.95 } else { 0.75 });
                let mut dims = BTreeMap::new();
                dims.insert("completeness".to_string(), completeness);
                dimensions.insert(c.backend_id.clone(), dims);
            }
            Ok(JudgeVerdict {
                scores,
                dimensions,
                best_method: self.favourite.to_string(),
                reasoning: "more complete rendering".to_string(),
            })
        }
    }

    struct FailingJudge;

    #[async_trait::async_trait]
    impl Judge for FailingJudge {
        async fn evaluate(
            &self,
            _source: &str,
            _candidates: &[&Candidate],
        ) -> anyhow::Result<JudgeVerdict> {
            anyhow::bail!("transport error")
        }
    }

    #[tokio::test]
    async fn test_judge_breaks_close_scores() {
        // Two near-identical candidates: automated totals land within the
        // 0.10 gate, and the stub judge prefers the fuller rendering.
        let a = candidate("claude", "أعلنت الأمم المتحدة", "The UN announced", 0.90);
        let b = candidate("google", "أعلنت الأمم المتحدة", "The United Nations announced", 0.89);
        let report = evaluator()
            .with_judge(Some(Box::new(StubJudge { favourite: "google" })))
            .evaluate("أعلنت الأمم المتحدة", &[a, b])
            .await;
        assert!(report.judge_used);
        assert_eq!(report.best_backend.as_deref(), Some("google"));
        assert_eq!(report.reasoning, "more complete rendering");
        assert!(report.dimension_scores["google"].contains_key("judge_completeness"));
    }

    #[tokio::test]
    async fn test_judge_skipped_when_scores_far_apart() {
        let strong = candidate(
            "claude",
            SOURCE,
            "The United Nations announced a new program today to support education across the Arab region.",
            0.92,
        );
        let weak = candidate("google", SOURCE, "برنامج الأمم المتحدة", 0.3);
        let report = evaluator()
            .with_judge(Some(Box::new(StubJudge { favourite: "google" })))
            .evaluate(SOURCE, &[strong, weak])
            .await;
        assert!(!report.judge_used, "judge must not run on a clear gap");
        assert_eq!(report.best_backend.as_deref(), Some("claude"));
    }

    #[tokio::test]
    async fn test_judge_failure_falls_back_to_heuristics() {
        let a = candidate("claude", "أعلنت الأمم المتحدة", "The UN announced", 0.90);
        let b = candidate("google", "أعلنت الأمم المتحدة", "The United Nations announced", 0.89);
        let report = evaluator()
            .with_judge(Some(Box::new(FailingJudge)))
            .evaluate("أعلنت الأمم المتحدة", &[a, b])
            .await;
        assert!(!report.judge_used);
        assert!(report.best_backend.is_some());
    }
}
