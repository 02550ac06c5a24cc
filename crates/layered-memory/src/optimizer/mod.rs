//! Context Optimizer (§4.G): the fixed seven-step pipeline that turns a
//! retrieved candidate list into the trimmed set actually handed back to
//! a caller. Ratio-based trimming and token-budget truncation at
//! sentence boundaries, with weighted, clamped multi-factor scoring
//! throughout.
//!
//! Store-agnostic by design: it consumes [`OptimizerCandidate`], not
//! [`crate::retrieval::RetrievalHit`] directly, so it has no dependency
//! on the store or the embedder — callers (the facade) adapt retrieval
//! output into candidates.

pub mod scoring;

use std::sync::Arc;

use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::llm::Llm;
use crate::metrics::Metrics;
use scoring::{adaptive_threshold, approx_tokens, cosine_similarity, exact_dedup_key, jaccard_overlap, negation_xor, normalized_entropy, split_sentences};

#[derive(Debug, Clone)]
pub struct OptimizerCandidate {
    pub id: Uuid,
    pub source_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub score: f32,
    /// Marks a candidate as exempt from being dropped by deduplication,
    /// e.g. the user's persona summary.
    pub keep: bool,
    pub has_contradiction: bool,
    pub contradicts_with: Vec<Uuid>,
}

impl OptimizerCandidate {
    pub fn new(id: Uuid, source_id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>, score: f32) -> Self {
        Self { id, source_id: source_id.into(), content: content.into(), embedding, score, keep: false, has_contradiction: false, contradicts_with: Vec::new() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizerStats {
    pub removed_exact_dedup: usize,
    pub removed_semantic_dedup: usize,
    pub removed_diversity: usize,
    pub removed_entropy: usize,
    pub compressed_count: usize,
    pub removed_rerank: usize,
    pub removed_token_budget: usize,
    pub contradiction_count: usize,
    pub adaptive_threshold_used: f32,
    /// Set when the candidate list exceeded `candidate_ceiling`: pairwise
    /// semantic dedup was skipped past that point to keep the pass
    /// bounded, per §5's "bounded scratch memory" requirement.
    pub semantic_dedup_truncated: bool,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub candidates: Vec<OptimizerCandidate>,
    pub stats: OptimizerStats,
}

pub struct ContextOptimizer {
    config: OptimizerConfig,
    metrics: Arc<Metrics>,
    llm: Option<Arc<dyn Llm>>,
}

impl ContextOptimizer {
    pub fn new(config: OptimizerConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics, llm: None }
    }

    /// Wires an optional capability into the contradiction and
    /// compression stages (§6: "absence must not break any core
    /// operation" — every heuristic fallback stays reachable via
    /// [`Self::optimize`] regardless of this).
    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Runs the full pipeline for one query against one candidate list,
    /// always via the heuristic contradiction/compression fallbacks.
    /// `query` drives the compression and re-ranking relevance scoring;
    /// candidates are assumed already scoped to a single user and kind.
    pub fn optimize(&self, query: &str, candidates: Vec<OptimizerCandidate>) -> OptimizationResult {
        let mut stats = OptimizerStats::default();
        let mut items = candidates;

        self.dedup_exact(&mut items, &mut stats);
        self.dedup_semantic(&mut items, &mut stats);
        self.diversity_sample(&mut items, &mut stats);
        self.detect_contradictions(&mut items, &mut stats);
        self.entropy_filter(&mut items, &mut stats);
        self.compress(query, &mut items, &mut stats);
        self.rerank_adaptive(query, &mut items, &mut stats);
        self.enforce_token_budget(&mut items, &mut stats);

        self.record_drop_metrics(&stats);
        OptimizationResult { candidates: items, stats }
    }

    /// Same pipeline, but routes the contradiction and compression
    /// stages through the configured LLM capability when one is
    /// attached. Falls back to [`Self::optimize`] entirely when none is.
    pub async fn optimize_async(&self, query: &str, candidates: Vec<OptimizerCandidate>) -> OptimizationResult {
        let Some(llm) = self.llm.clone() else {
            return self.optimize(query, candidates);
        };

        let mut stats = OptimizerStats::default();
        let mut items = candidates;

        self.dedup_exact(&mut items, &mut stats);
        self.dedup_semantic(&mut items, &mut stats);
        self.diversity_sample(&mut items, &mut stats);
        self.detect_contradictions_llm(&llm, &mut items, &mut stats).await;
        self.entropy_filter(&mut items, &mut stats);
        self.compress_llm(&llm, query, &mut items, &mut stats).await;
        self.rerank_adaptive(query, &mut items, &mut stats);
        self.enforce_token_budget(&mut items, &mut stats);

        self.record_drop_metrics(&stats);
        OptimizationResult { candidates: items, stats }
    }

    /// LLM-backed step 3: same similarity gate as the heuristic, but the
    /// yes/no judgment comes from the capability instead of negation-XOR.
    async fn detect_contradictions_llm(&self, llm: &Arc<dyn Llm>, items: &mut [OptimizerCandidate], stats: &mut OptimizerStats) {
        let n = items.len();
        let mut flagged: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let sim = cosine_similarity(&items[i].embedding, &items[j].embedding);
                if sim < self.config.contradiction_lo || sim > self.config.contradiction_hi {
                    continue;
                }
                let verdict = llm.judge_contradiction(&items[i].content, &items[j].content).await;
                if matches!(verdict, Ok(v) if v.contradicts) {
                    let (id_i, id_j) = (items[i].id, items[j].id);
                    items[i].has_contradiction = true;
                    items[i].contradicts_with.push(id_j);
                    items[j].has_contradiction = true;
                    items[j].contradicts_with.push(id_i);
                    flagged.insert(id_i);
                    flagged.insert(id_j);
                }
            }
        }
        stats.contradiction_count = flagged.len();
    }

    /// LLM-backed step 5: same trigger condition as the heuristic, but
    /// summarization comes from the capability instead of sentence
    /// windowing. Falls back to the heuristic for an individual entry if
    /// the call errors, so a single backend hiccup doesn't drop content.
    async fn compress_llm(&self, llm: &Arc<dyn Llm>, query: &str, items: &mut [OptimizerCandidate], stats: &mut OptimizerStats) {
        let trigger_tokens = (self.config.max_context_tokens as f32 * self.config.compression_trigger_fraction) as usize;
        if trigger_tokens == 0 {
            return;
        }
        for c in items.iter_mut() {
            if approx_tokens(&c.content) <= trigger_tokens {
                continue;
            }
            match llm.summarize(query, &c.content, trigger_tokens as u32).await {
                Ok(summary) if !summary.trim().is_empty() && summary.len() < c.content.len() => {
                    c.content = summary;
                    stats.compressed_count += 1;
                }
                _ => {
                    self.compress(query, std::slice::from_mut(c), stats);
                }
            }
        }
    }

    fn record_drop_metrics(&self, stats: &OptimizerStats) {
        let steps = [
            ("dedup_exact", stats.removed_exact_dedup),
            ("dedup_semantic", stats.removed_semantic_dedup),
            ("diversity", stats.removed_diversity),
            ("entropy", stats.removed_entropy),
            ("rerank", stats.removed_rerank),
            ("token_budget", stats.removed_token_budget),
        ];
        for (step, count) in steps {
            if count > 0 {
                self.metrics.optimizer_dropped.with_label_values(&[step]).inc_by(count as u64);
            }
        }
    }

    /// Step 1a: exact duplicates by a hash (here, the key itself — no
    /// need to actually hash, `HashMap` does that) of trimmed lowercased
    /// content. Keeps the highest-scoring entry per key.
    fn dedup_exact(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let before = items.len();
        let mut best: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut keep = vec![true; items.len()];
        for (i, c) in items.iter().enumerate() {
            let key = exact_dedup_key(&c.content);
            match best.get(&key) {
                None => {
                    best.insert(key, i);
                }
                Some(&prev) => {
                    if items[i].score > items[prev].score {
                        keep[prev] = false;
                        best.insert(key, i);
                    } else {
                        keep[i] = false;
                    }
                }
            }
        }
        let mut idx = 0;
        items.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        stats.removed_exact_dedup = before - items.len();
    }

    /// Step 1b: pairwise cosine similarity above `similarity_threshold`
    /// drops the lower-scoring of the pair, unless either is marked
    /// `keep`. O(n^2); skipped past `candidate_ceiling` entries to keep
    /// the pass bounded on pathologically large lists (§5).
    fn dedup_semantic(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let before = items.len();
        let ceiling = self.config.candidate_ceiling.min(items.len());
        if self.config.candidate_ceiling < items.len() {
            stats.semantic_dedup_truncated = true;
        }
        let mut drop = vec![false; items.len()];
        for i in 0..ceiling {
            if drop[i] {
                continue;
            }
            for j in (i + 1)..ceiling {
                if drop[j] {
                    continue;
                }
                if items[i].keep && items[j].keep {
                    continue;
                }
                let sim = cosine_similarity(&items[i].embedding, &items[j].embedding);
                if sim >= self.config.similarity_threshold {
                    if items[i].score >= items[j].score && !items[j].keep {
                        drop[j] = true;
                    } else if !items[i].keep {
                        drop[i] = true;
                        break;
                    }
                }
            }
        }
        let mut idx = 0;
        items.retain(|_| {
            let d = drop[idx];
            idx += 1;
            !d
        });
        stats.removed_semantic_dedup = before - items.len();
    }

    /// Step 2: caps survivors per `source_id`, dropping the lowest
    /// scoring excess.
    fn diversity_sample(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let before = items.len();
        let cap = self.config.max_per_source;
        let mut by_source: std::collections::HashMap<String, Vec<usize>> = std::collections::HashMap::new();
        for (i, c) in items.iter().enumerate() {
            by_source.entry(c.source_id.clone()).or_default().push(i);
        }
        let mut keep = vec![true; items.len()];
        for (_, mut idxs) in by_source {
            if idxs.len() <= cap {
                continue;
            }
            idxs.sort_by(|&a, &b| items[b].score.partial_cmp(&items[a].score).unwrap_or(std::cmp::Ordering::Equal));
            for &i in &idxs[cap..] {
                keep[i] = false;
            }
        }
        let mut idx = 0;
        items.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        stats.removed_diversity = before - items.len();
    }

    /// Step 3: flags both sides of a contradicting pair, never drops.
    fn detect_contradictions(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let n = items.len();
        let mut flagged: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let sim = cosine_similarity(&items[i].embedding, &items[j].embedding);
                if sim >= self.config.contradiction_lo && sim <= self.config.contradiction_hi && negation_xor(&items[i].content, &items[j].content) {
                    let (id_i, id_j) = (items[i].id, items[j].id);
                    items[i].has_contradiction = true;
                    items[i].contradicts_with.push(id_j);
                    items[j].has_contradiction = true;
                    items[j].contradicts_with.push(id_i);
                    flagged.insert(id_i);
                    flagged.insert(id_j);
                }
            }
        }
        stats.contradiction_count = flagged.len();
    }

    /// Step 4: drops entries whose content is too short or too uniform
    /// to carry information.
    fn entropy_filter(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let before = items.len();
        items.retain(|c| c.content.len() >= self.config.length_min && normalized_entropy(&c.content) >= self.config.entropy_min);
        stats.removed_entropy = before - items.len();
    }

    /// Step 5: query-focused extractive compression. Only entries whose
    /// token count exceeds a quarter (by default) of the total context
    /// budget are touched; the rest pass through unchanged.
    fn compress(&self, query: &str, items: &mut [OptimizerCandidate], stats: &mut OptimizerStats) {
        let trigger_tokens = (self.config.max_context_tokens as f32 * self.config.compression_trigger_fraction) as usize;
        if trigger_tokens == 0 {
            return;
        }
        for c in items.iter_mut() {
            if approx_tokens(&c.content) <= trigger_tokens {
                continue;
            }
            let sentences = split_sentences(&c.content);
            if sentences.len() <= 1 {
                continue;
            }
            let scored: Vec<f32> = sentences.iter().map(|s| jaccard_overlap(query, s)).collect();
            let best = scored.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)).map(|(i, _)| i).unwrap_or(0);
            let window = self.config.context_window_sentences;
            let lo = best.saturating_sub(window);
            let hi = (best + window).min(sentences.len() - 1);
            let mut kept_indices: std::collections::BTreeSet<usize> = (lo..=hi).collect();
            // A section header's first/last sentence survives even when
            // outside the relevance window.
            kept_indices.insert(0);
            kept_indices.insert(sentences.len() - 1);
            let compressed: String = kept_indices.into_iter().map(|i| sentences[i]).collect::<Vec<_>>().join(" ");
            if compressed.len() < c.content.len() {
                c.content = compressed;
                stats.compressed_count += 1;
            }
        }
    }

    /// Step 6: adaptive-threshold re-ranking, iterated up to
    /// `max_iterations` times, never dropping below `min_kept`.
    fn rerank_adaptive(&self, query: &str, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        let before = items.len();
        let mut threshold_used = 0.0f32;
        for _ in 0..self.config.max_iterations {
            if items.len() <= self.config.min_kept {
                break;
            }
            let relevance: Vec<f32> = items.iter().map(|c| jaccard_overlap(query, &c.content)).collect();
            let threshold = adaptive_threshold(&relevance, self.config.rerank_threshold_base);
            threshold_used = threshold;

            let mut order: Vec<usize> = (0..items.len()).collect();
            order.sort_by(|&a, &b| relevance[b].partial_cmp(&relevance[a]).unwrap_or(std::cmp::Ordering::Equal));

            let survivors_above: Vec<usize> = (0..items.len()).filter(|&i| relevance[i] >= threshold).collect();
            let keep_indices: std::collections::HashSet<usize> = if survivors_above.len() >= self.config.min_kept {
                survivors_above.into_iter().collect()
            } else {
                order.into_iter().take(self.config.min_kept).collect()
            };

            if keep_indices.len() == items.len() {
                break;
            }

            let mut idx = 0;
            let mut dropped_any = false;
            items.retain(|_| {
                let keep = keep_indices.contains(&idx);
                if !keep {
                    dropped_any = true;
                }
                idx += 1;
                keep
            });
            if !dropped_any {
                break;
            }
        }
        stats.adaptive_threshold_used = threshold_used;
        stats.removed_rerank = before - items.len();
    }

    /// Step 7: accumulates entries in descending score order until the
    /// token budget would be exceeded; the entry that would overflow it
    /// is truncated at the nearest sentence boundary instead of dropped
    /// outright, and everything after it is discarded. `max_context_tokens
    /// == 0` disables the budget entirely.
    fn enforce_token_budget(&self, items: &mut Vec<OptimizerCandidate>, stats: &mut OptimizerStats) {
        if self.config.max_context_tokens == 0 {
            stats.removed_token_budget += items.len();
            items.clear();
            return;
        }
        let before = items.len();
        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut budget = self.config.max_context_tokens;
        let mut kept = Vec::with_capacity(items.len());
        for mut c in std::mem::take(items) {
            let tokens = approx_tokens(&c.content);
            if tokens <= budget {
                budget -= tokens;
                kept.push(c);
                continue;
            }
            if budget == 0 {
                break;
            }
            let truncated = truncate_to_token_budget(&c.content, budget);
            if !truncated.is_empty() {
                c.content = truncated;
                kept.push(c);
            }
            break;
        }
        *items = kept;
        stats.removed_token_budget = before - items.len();
    }
}

/// Keeps whole sentences from the front of `content` until the next one
/// would exceed `budget` tokens.
fn truncate_to_token_budget(content: &str, budget: usize) -> String {
    let sentences = split_sentences(content);
    let mut out = String::new();
    let mut used = 0;
    for s in sentences {
        let tokens = approx_tokens(s);
        if used + tokens > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(s);
        used += tokens;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerProfile;

    fn cfg() -> OptimizerConfig {
        OptimizerConfig::for_profile(OptimizerProfile::Balanced)
    }

    fn cand(id_seed: u8, source: &str, content: &str, embedding: Vec<f32>, score: f32) -> OptimizerCandidate {
        OptimizerCandidate::new(Uuid::from_bytes([id_seed; 16]), source, content, embedding, score)
    }

    #[test]
    fn exact_duplicates_collapse_to_highest_score() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let items = vec![
            cand(1, "a", "Rust is great for systems work.", vec![1.0, 0.0], 0.4),
            cand(2, "a", "rust is great for systems work.", vec![1.0, 0.0], 0.9),
        ];
        let result = optimizer.optimize("rust systems", items);
        assert_eq!(result.stats.removed_exact_dedup, 1);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].score, 0.9);
    }

    #[test]
    fn semantic_duplicates_above_threshold_are_dropped() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let items = vec![
            cand(1, "a", "The quick brown fox jumps over the lazy dog near the river.", vec![1.0, 0.0, 0.0], 0.9),
            cand(2, "b", "A swift auburn fox leaps across the sleepy dog by the stream.", vec![0.99, 0.01, 0.0], 0.5),
        ];
        let result = optimizer.optimize("fox dog", items);
        assert_eq!(result.stats.removed_semantic_dedup, 1);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].score, 0.9);
    }

    #[test]
    fn diversity_sampling_caps_per_source() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let mut items = Vec::new();
        for i in 0..5usize {
            let mut one_hot = vec![0.0; 5];
            one_hot[i] = 1.0;
            items.push(cand(i as u8 + 1, "same-source", &format!("distinct fact number {i} about rust memory layout."), one_hot, i as f32 / 10.0));
        }
        let result = optimizer.optimize("rust memory layout", items);
        assert!(result.candidates.len() <= cfg().max_per_source);
        assert_eq!(result.stats.removed_diversity, 5 - cfg().max_per_source);
    }

    #[test]
    fn contradiction_flags_both_sides_without_dropping() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let items = vec![
            cand(1, "a", "The deployment is stable right now.", vec![1.0, 0.0], 0.8),
            cand(2, "b", "The deployment is not stable right now.", vec![0.75, 0.6614], 0.8),
        ];
        let result = optimizer.optimize("deployment stability", items);
        assert_eq!(result.stats.contradiction_count, 2);
        assert_eq!(result.candidates.len(), 2);
        assert!(result.candidates.iter().all(|c| c.has_contradiction));
    }

    #[test]
    fn entropy_filter_drops_low_information_entries() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let items = vec![
            cand(1, "a", "aaaaaaaaaaaaaa", vec![1.0, 0.0], 0.9),
            cand(2, "b", "Rust's ownership model prevents data races at compile time.", vec![0.0, 1.0], 0.9),
        ];
        let result = optimizer.optimize("rust ownership", items);
        assert_eq!(result.stats.removed_entropy, 1);
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn token_budget_truncates_rather_than_drops_when_possible() {
        let mut config = cfg();
        config.max_context_tokens = 20;
        config.min_kept = 1;
        config.rerank_threshold_base = 0.0;
        let optimizer = ContextOptimizer::new(config, Arc::new(Metrics::new()));
        let long = "The quick brown fox jumps over the lazy dog near the great river. ".repeat(6);
        let items = vec![cand(1, "a", &long, vec![1.0, 0.0], 0.9)];
        let result = optimizer.optimize("fox", items);
        assert!(!result.candidates.is_empty());
        assert!(result.candidates[0].content.len() < long.len());
    }

    #[test]
    fn rerank_never_drops_below_min_kept() {
        let mut config = cfg();
        config.min_kept = 3;
        config.rerank_threshold_base = 0.99;
        let optimizer = ContextOptimizer::new(config.clone(), Arc::new(Metrics::new()));
        let items: Vec<_> = (0..5u8).map(|i| cand(i + 1, "a", "completely unrelated filler text here", vec![0.0, 0.0], 0.1)).collect();
        let result = optimizer.optimize("rust", items);
        assert!(result.candidates.len() >= config.min_kept);
    }

    #[tokio::test]
    async fn optimize_async_without_llm_matches_heuristic_path() {
        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new()));
        let items = vec![
            cand(1, "a", "Rust is great for systems work.", vec![1.0, 0.0], 0.4),
            cand(2, "a", "rust is great for systems work.", vec![1.0, 0.0], 0.9),
        ];
        let result = optimizer.optimize_async("rust systems", items).await;
        assert_eq!(result.stats.removed_exact_dedup, 1);
    }

    #[tokio::test]
    async fn optimize_async_with_llm_uses_capability_for_contradictions() {
        use crate::llm::{ChatTurn, ContradictionVerdict, Llm};
        use crate::error::Result;

        struct AlwaysContradicts;
        #[async_trait::async_trait]
        impl Llm for AlwaysContradicts {
            async fn chat(&self, _turns: &[ChatTurn], _max_tokens: u32, _temperature: f32) -> Result<String> {
                Ok("yes".to_string())
            }
            async fn judge_contradiction(&self, _a: &str, _b: &str) -> Result<ContradictionVerdict> {
                Ok(ContradictionVerdict { contradicts: true })
            }
        }

        let optimizer = ContextOptimizer::new(cfg(), Arc::new(Metrics::new())).with_llm(Arc::new(AlwaysContradicts));
        let items = vec![
            cand(1, "a", "The deployment is healthy.", vec![1.0, 0.0], 0.8),
            cand(2, "b", "The deployment looks fine today.", vec![0.75, 0.6614], 0.8),
        ];
        let result = optimizer.optimize_async("deployment status", items).await;
        assert_eq!(result.stats.contradiction_count, 2);
    }
}
