//! Score fusion (§4.D): combines an ANN ranked list and a lexical ranked
//! list into one ordering, without either path knowing the other exists.
//! Reciprocal Rank Fusion is the default — grounded on the RRF constant
//! and per-rank accumulation pattern in KogSector-ConHub's fusion
//! service (`indexers/src/services/fusion.rs`) — with a weighted-score
//! variant for callers who'd rather fuse on normalized magnitude than
//! rank alone.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::ScoredId;

/// The RRF smoothing constant. Standard choice; dampens the influence of
/// rank-1 items so a single path can't dominate fusion on its own.
pub const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    ReciprocalRank,
    WeightedScore,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FusedScore {
    pub vector_score: f32,
    pub lex_score: f32,
    pub vector_rank: Option<usize>,
    pub lex_rank: Option<usize>,
    pub fused_score: f32,
}

/// Rescales scores into `[0, 1]` by dividing by the largest score in the
/// batch. A query-specific max rather than a global one, since ANN
/// cosine similarity and BM25 live on unrelated scales batch to batch.
pub fn normalize(hits: &[ScoredId]) -> HashMap<Uuid, f32> {
    let max = hits.iter().map(|h| h.score).fold(0.0_f32, f32::max);
    hits.iter()
        .map(|h| {
            let n = if max > 0.0 { (h.score / max).clamp(0.0, 1.0) } else { 0.0 };
            (h.id, n)
        })
        .collect()
}

fn ranks_of(hits: &[ScoredId]) -> HashMap<Uuid, usize> {
    hits.iter().enumerate().map(|(rank, h)| (h.id, rank)).collect()
}

/// Fuses a vector and a lexical ranked list into one score per document.
/// Every id that appears in either list gets an entry; a list a document
/// is absent from contributes 0 to both the rank term and the
/// normalized-score term for that side.
pub fn fuse(
    vector_hits: &[ScoredId],
    lex_hits: &[ScoredId],
    method: FusionMethod,
    weight_vector: f32,
    weight_lexical: f32,
) -> HashMap<Uuid, FusedScore> {
    let vector_norm = normalize(vector_hits);
    let lex_norm = normalize(lex_hits);
    let vector_ranks = ranks_of(vector_hits);
    let lex_ranks = ranks_of(lex_hits);

    let mut ids: Vec<Uuid> = vector_hits.iter().map(|h| h.id).collect();
    for h in lex_hits {
        if !ids.contains(&h.id) {
            ids.push(h.id);
        }
    }

    ids.into_iter()
        .map(|id| {
            let vector_score = *vector_norm.get(&id).unwrap_or(&0.0);
            let lex_score = *lex_norm.get(&id).unwrap_or(&0.0);
            let vector_rank = vector_ranks.get(&id).copied();
            let lex_rank = lex_ranks.get(&id).copied();

            let fused_score = match method {
                FusionMethod::ReciprocalRank => {
                    let v_term = vector_rank.map(|r| weight_vector / (RRF_K + r as f32)).unwrap_or(0.0);
                    let l_term = lex_rank.map(|r| weight_lexical / (RRF_K + r as f32)).unwrap_or(0.0);
                    v_term + l_term
                }
                FusionMethod::WeightedScore => weight_vector * vector_score + weight_lexical * lex_score,
            };

            (id, FusedScore { vector_score, lex_score, vector_rank, lex_rank, fused_score })
        })
        .collect()
}

/// `exp(-lambda * age_days)`, `lambda = ln(2) / half_life_days`, so a
/// document exactly `half_life_days` old is worth half of a fresh one.
pub fn freshness_factor(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f32) -> f32 {
    let age_days = (now - created_at).num_seconds().max(0) as f32 / 86_400.0;
    let lambda = std::f32::consts::LN_2 / half_life_days;
    (-lambda * age_days).exp()
}

/// Clamps importance into a bounded multiplier so a single very
/// important (or unimportant) record can't swing fusion unboundedly.
pub fn importance_multiplier(importance: f32) -> f32 {
    (0.5 + importance.clamp(0.0, 1.0) * 0.5).clamp(0.5, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn normalize_scales_by_batch_max() {
        let hits = vec![ScoredId { id: id(1), score: 4.0 }, ScoredId { id: id(2), score: 2.0 }];
        let n = normalize(&hits);
        assert_eq!(n[&id(1)], 1.0);
        assert_eq!(n[&id(2)], 0.5);
    }

    #[test]
    fn normalize_of_empty_batch_is_empty() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn rrf_rewards_documents_ranked_highly_on_both_sides() {
        let vector_hits = vec![ScoredId { id: id(1), score: 0.9 }, ScoredId { id: id(2), score: 0.8 }];
        let lex_hits = vec![ScoredId { id: id(2), score: 10.0 }, ScoredId { id: id(1), score: 8.0 }];
        let fused = fuse(&vector_hits, &lex_hits, FusionMethod::ReciprocalRank, 0.7, 0.3);
        // doc 2 is rank 1 on vector but rank 0 on lexical, doc 1 is rank 0/rank 1.
        assert!(fused.contains_key(&id(1)));
        assert!(fused.contains_key(&id(2)));
    }

    #[test]
    fn rrf_only_present_on_one_side_still_scores() {
        let vector_hits = vec![ScoredId { id: id(1), score: 0.9 }];
        let lex_hits: Vec<ScoredId> = vec![];
        let fused = fuse(&vector_hits, &lex_hits, FusionMethod::ReciprocalRank, 0.7, 0.3);
        assert!(fused[&id(1)].fused_score > 0.0);
        assert_eq!(fused[&id(1)].lex_rank, None);
    }

    #[test]
    fn weighted_score_variant_uses_normalized_magnitudes() {
        let vector_hits = vec![ScoredId { id: id(1), score: 1.0 }];
        let lex_hits = vec![ScoredId { id: id(1), score: 1.0 }];
        let fused = fuse(&vector_hits, &lex_hits, FusionMethod::WeightedScore, 0.7, 0.3);
        assert!((fused[&id(1)].fused_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn freshness_factor_is_one_at_zero_age() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!((freshness_factor(now, now, 30.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn freshness_factor_is_half_at_half_life() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let created = now - chrono::Duration::days(30);
        assert!((freshness_factor(created, now, 30.0) - 0.5).abs() < 0.01);
    }

    #[test]
    fn importance_multiplier_is_bounded() {
        assert!((importance_multiplier(0.0) - 0.5).abs() < 1e-6);
        assert!((importance_multiplier(1.0) - 1.0).abs() < 1e-6);
    }
}
