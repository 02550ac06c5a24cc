//! Pure scoring helpers shared by the optimizer's steps: no state, no
//! I/O, each one independently testable against the numbers in the
//! pipeline's pass/fail examples.

use std::collections::HashSet;

/// Negation markers checked by the contradiction heuristic. Deliberately
/// small and literal rather than a full grammar: the heuristic only
/// needs to catch the common case of one entry asserting something and
/// the other asserting its negation.
const NEGATION_MARKERS: &[&str] = &["not", "no", "never", "n't", "without", "isn't", "doesn't", "won't", "can't"];

/// Cosine similarity of two equal-length embeddings. Returns 0.0 for a
/// zero vector on either side rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Shannon entropy over characters, normalized to [0, 1] by dividing by
/// log2 of the alphabet size actually present. Empty input has zero
/// entropy.
pub fn normalized_entropy(text: &str) -> f32 {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    for c in &chars {
        *counts.entry(*c).or_insert(0) += 1;
    }
    let len = chars.len() as f32;
    let entropy: f32 = counts.values().map(|&n| {
        let p = n as f32 / len;
        -p * p.log2()
    }).sum();
    let alphabet = counts.len() as f32;
    if alphabet <= 1.0 {
        return 0.0;
    }
    (entropy / alphabet.log2()).clamp(0.0, 1.0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

/// Jaccard overlap of the token sets of two strings, in [0, 1].
pub fn jaccard_overlap(query: &str, content: &str) -> f32 {
    let q = tokenize(query);
    let c = tokenize(content);
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    let intersection = q.intersection(&c).count() as f32;
    let union = q.union(&c).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Whether exactly one of the two texts carries a negation marker —
/// the XOR-of-negation heuristic used when an NLI capability isn't
/// configured.
pub fn negation_xor(a: &str, b: &str) -> bool {
    let has_negation = |text: &str| {
        let lower = text.to_ascii_lowercase();
        NEGATION_MARKERS.iter().any(|m| lower.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'') == *m) || lower.contains(m))
    };
    has_negation(a) != has_negation(b)
}

/// A hash of trimmed, lowercased content for exact-duplicate grouping.
pub fn exact_dedup_key(content: &str) -> String {
    content.trim().to_ascii_lowercase()
}

/// Splits text into sentences on `.`, `!`, `?` boundaries, keeping the
/// terminator attached. Whitespace-only fragments are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Token count approximation consistent with the rest of the crate:
/// one token per four characters.
pub fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// The four quartiles (min treated as q0 is unused) needed by the
/// adaptive re-rank threshold: q25, q50 (median), q75.
pub fn quartiles(values: &[f32]) -> (f32, f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pct = |p: f32| -> f32 {
        let n = sorted.len();
        if n == 1 {
            return sorted[0];
        }
        let idx = p * (n as f32 - 1.0);
        let lo = idx.floor() as usize;
        let hi = idx.ceil() as usize;
        if lo == hi {
            sorted[lo]
        } else {
            let frac = idx - lo as f32;
            sorted[lo] * (1.0 - frac) + sorted[hi] * frac
        }
    };
    (pct(0.25), pct(0.5), pct(0.75))
}

/// The §4.G adaptive threshold derived from the score distribution.
pub fn adaptive_threshold(scores: &[f32], t_base: f32) -> f32 {
    let (q25, q50, q75) = quartiles(scores);
    let iqr = q75 - q25;
    if iqr > 0.3 {
        (t_base - 0.1).max(q50 * 0.8)
    } else if iqr < 0.15 {
        (t_base + 0.05).min(q50 * 0.95)
    } else {
        (t_base + q50) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn normalized_entropy_of_uniform_text_is_high() {
        assert!(normalized_entropy("abcdabcdabcd") > 0.9);
    }

    #[test]
    fn normalized_entropy_of_repeated_char_is_zero() {
        assert_eq!(normalized_entropy("aaaaaaaaaa"), 0.0);
    }

    #[test]
    fn jaccard_overlap_of_identical_text_is_one() {
        assert!((jaccard_overlap("rust memory safety", "rust memory safety") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn jaccard_overlap_of_disjoint_text_is_zero() {
        assert_eq!(jaccard_overlap("rust ownership", "baking bread"), 0.0);
    }

    #[test]
    fn negation_xor_detects_one_sided_negation() {
        assert!(negation_xor("the server is healthy", "the server is not healthy"));
        assert!(!negation_xor("the server is healthy", "the server is stable"));
    }

    #[test]
    fn split_sentences_keeps_terminators() {
        let s = split_sentences("First one. Second one! Third?");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn quartiles_of_sorted_run() {
        let (q25, q50, q75) = quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(q50, 3.0);
        assert!(q25 < q50 && q50 < q75);
    }

    #[test]
    fn adaptive_threshold_wide_spread_relaxes_toward_median() {
        let scores = vec![0.1, 0.2, 0.3, 0.9, 0.95];
        let t = adaptive_threshold(&scores, 0.65);
        assert!(t < 0.65);
    }

    #[test]
    fn adaptive_threshold_tight_spread_tightens_above_base() {
        let scores = vec![0.60, 0.61, 0.62, 0.63, 0.64];
        let t = adaptive_threshold(&scores, 0.65);
        assert!(t >= 0.65 * 0.95 - 1e-6);
    }
}
