//! Process-wide configuration surface (§6). An immutable value built once
//! at construction and passed by `Arc`, loaded from env vars with
//! defaults and range validation.

use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub dim_semantic: usize,
    pub dim_episodic: usize,

    pub k_fetch_min: usize,
    pub retrieval_weight_vector: f32,
    pub retrieval_weight_lexical: f32,
    pub retrieval_freshness_half_life_days: f32,
    pub retrieval_apply_freshness: bool,
    pub retrieval_apply_importance: bool,
    pub retrieval_expand_scope_on_empty: bool,

    pub cache_persona_ttl_s: u64,
    pub cache_query_ttl_s: u64,
    pub cache_input_ttl_s: u64,
    pub cache_semantic_match_threshold: f32,
    pub cache_max_query_per_user: usize,

    pub episodic_window_seconds: u64,
    pub episodic_super_chat_cap: usize,
    pub episodic_deep_dive_cap: usize,
    pub episodic_idle_gap_seconds: u64,
    pub episodic_retention_days: i64,
    pub episodic_compress_after_days: i64,

    /// §5 backpressure: if a retrieval's store/cache fetch takes longer
    /// than this, the Facade skips the context optimizer for that call
    /// and returns fused-but-unoptimized hits with `optimizer_skipped`
    /// set, trading quality for latency under load.
    pub backpressure_latency_ms: u64,

    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub profile: OptimizerProfile,
    pub similarity_threshold: f32,
    pub max_per_source: usize,
    pub contradiction_lo: f32,
    pub contradiction_hi: f32,
    pub entropy_min: f32,
    pub length_min: usize,
    pub context_window_sentences: usize,
    pub compression_trigger_fraction: f32,
    pub rerank_threshold_base: f32,
    pub max_iterations: u32,
    pub max_context_tokens: usize,
    pub min_kept: usize,
    pub candidate_ceiling: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerProfile {
    Conservative,
    Balanced,
    Aggressive,
    Quality,
}

impl OptimizerProfile {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            "quality" => Ok(Self::Quality),
            other => Err(MemoryError::validation(format!("unknown optimizer profile: {other}"))),
        }
    }
}

impl OptimizerConfig {
    pub fn for_profile(profile: OptimizerProfile) -> Self {
        let mut cfg = Self::balanced();
        cfg.profile = profile;
        match profile {
            OptimizerProfile::Conservative => {
                cfg.similarity_threshold = 0.85;
                cfg.max_per_source = 5;
                cfg.rerank_threshold_base = 0.50;
                cfg.min_kept = 5;
            }
            OptimizerProfile::Balanced => {}
            OptimizerProfile::Aggressive => {
                cfg.similarity_threshold = 0.70;
                cfg.max_per_source = 2;
                cfg.rerank_threshold_base = 0.80;
                cfg.min_kept = 1;
            }
            OptimizerProfile::Quality => {
                cfg.similarity_threshold = 0.82;
                cfg.max_per_source = 4;
                cfg.rerank_threshold_base = 0.55;
                cfg.min_kept = 5;
                cfg.max_iterations = 2;
            }
        }
        cfg
    }

    fn balanced() -> Self {
        Self {
            profile: OptimizerProfile::Balanced,
            similarity_threshold: 0.80,
            max_per_source: 3,
            contradiction_lo: 0.70,
            contradiction_hi: 0.90,
            entropy_min: 0.3,
            length_min: 10,
            context_window_sentences: 1,
            compression_trigger_fraction: 0.25,
            rerank_threshold_base: 0.65,
            max_iterations: 3,
            max_context_tokens: 4000,
            min_kept: 3,
            candidate_ceiling: 200,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_range("optimizer.similarity_threshold", self.similarity_threshold, 0.70, 0.85)?;
        check_range("optimizer.max_per_source", self.max_per_source as f32, 2.0, 5.0)?;
        check_range("optimizer.rerank_threshold_base", self.rerank_threshold_base, 0.50, 0.80)?;
        if self.max_iterations == 0 || self.max_iterations > 5 {
            return Err(MemoryError::validation("optimizer.max_iterations out of [1, 5]"));
        }
        if self.max_context_tokens < 512 && self.max_context_tokens != 0 {
            return Err(MemoryError::validation("optimizer.max_context_tokens must be 0 or >= 512"));
        }
        if self.min_kept == 0 {
            return Err(MemoryError::validation("optimizer.min_kept must be >= 1"));
        }
        Ok(())
    }
}

fn check_range(name: &str, v: f32, lo: f32, hi: f32) -> Result<()> {
    if v < lo || v > hi {
        return Err(MemoryError::validation(format!("{name}={v} out of range [{lo}, {hi}]")));
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dim_semantic: 1536,
            dim_episodic: 384,
            k_fetch_min: 50,
            retrieval_weight_vector: 0.7,
            retrieval_weight_lexical: 0.3,
            retrieval_freshness_half_life_days: 30.0,
            retrieval_apply_freshness: false,
            retrieval_apply_importance: true,
            retrieval_expand_scope_on_empty: false,
            cache_persona_ttl_s: 3600,
            cache_query_ttl_s: 1800,
            cache_input_ttl_s: 300,
            cache_semantic_match_threshold: 0.85,
            cache_max_query_per_user: 10,
            episodic_window_seconds: 21_600,
            episodic_super_chat_cap: 50,
            episodic_deep_dive_cap: 30,
            episodic_idle_gap_seconds: 120,
            episodic_retention_days: 30,
            episodic_compress_after_days: 90,
            backpressure_latency_ms: 500,
            optimizer: OptimizerConfig::for_profile(OptimizerProfile::Balanced),
        }
    }
}

impl Config {
    /// Loads overrides from `MEMORY_*` environment variables (optionally
    /// preloaded from a `.env` file), falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MEMORY_DIM_SEMANTIC") {
            cfg.dim_semantic = parse_env("MEMORY_DIM_SEMANTIC", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_DIM_EPISODIC") {
            cfg.dim_episodic = parse_env("MEMORY_DIM_EPISODIC", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_K_FETCH_MIN") {
            cfg.k_fetch_min = parse_env("MEMORY_K_FETCH_MIN", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_PROFILE") {
            cfg.optimizer = OptimizerConfig::for_profile(OptimizerProfile::parse(&v)?);
        }

        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_WEIGHT_VECTOR") {
            cfg.retrieval_weight_vector = parse_env("MEMORY_RETRIEVAL_WEIGHT_VECTOR", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_WEIGHT_LEXICAL") {
            cfg.retrieval_weight_lexical = parse_env("MEMORY_RETRIEVAL_WEIGHT_LEXICAL", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_FRESHNESS_HALF_LIFE_DAYS") {
            cfg.retrieval_freshness_half_life_days =
                parse_env("MEMORY_RETRIEVAL_FRESHNESS_HALF_LIFE_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_APPLY_FRESHNESS") {
            cfg.retrieval_apply_freshness = parse_env("MEMORY_RETRIEVAL_APPLY_FRESHNESS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_APPLY_IMPORTANCE") {
            cfg.retrieval_apply_importance = parse_env("MEMORY_RETRIEVAL_APPLY_IMPORTANCE", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_RETRIEVAL_EXPAND_SCOPE_ON_EMPTY") {
            cfg.retrieval_expand_scope_on_empty =
                parse_env("MEMORY_RETRIEVAL_EXPAND_SCOPE_ON_EMPTY", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_PERSONA_TTL_S") {
            cfg.cache_persona_ttl_s = parse_env("MEMORY_CACHE_PERSONA_TTL_S", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_QUERY_TTL_S") {
            cfg.cache_query_ttl_s = parse_env("MEMORY_CACHE_QUERY_TTL_S", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_INPUT_TTL_S") {
            cfg.cache_input_ttl_s = parse_env("MEMORY_CACHE_INPUT_TTL_S", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_SEMANTIC_MATCH_THRESHOLD") {
            cfg.cache_semantic_match_threshold =
                parse_env("MEMORY_CACHE_SEMANTIC_MATCH_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_MAX_QUERY_PER_USER") {
            cfg.cache_max_query_per_user = parse_env("MEMORY_CACHE_MAX_QUERY_PER_USER", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_WINDOW_SECONDS") {
            cfg.episodic_window_seconds = parse_env("MEMORY_EPISODIC_WINDOW_SECONDS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_SUPER_CHAT_CAP") {
            cfg.episodic_super_chat_cap = parse_env("MEMORY_EPISODIC_SUPER_CHAT_CAP", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_DEEP_DIVE_CAP") {
            cfg.episodic_deep_dive_cap = parse_env("MEMORY_EPISODIC_DEEP_DIVE_CAP", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_IDLE_GAP_SECONDS") {
            cfg.episodic_idle_gap_seconds = parse_env("MEMORY_EPISODIC_IDLE_GAP_SECONDS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_RETENTION_DAYS") {
            cfg.episodic_retention_days = parse_env("MEMORY_EPISODIC_RETENTION_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_EPISODIC_COMPRESS_AFTER_DAYS") {
            cfg.episodic_compress_after_days = parse_env("MEMORY_EPISODIC_COMPRESS_AFTER_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_SIMILARITY_THRESHOLD") {
            cfg.optimizer.similarity_threshold =
                parse_env("MEMORY_OPTIMIZER_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_MAX_PER_SOURCE") {
            cfg.optimizer.max_per_source = parse_env("MEMORY_OPTIMIZER_MAX_PER_SOURCE", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_MAX_CONTEXT_TOKENS") {
            cfg.optimizer.max_context_tokens = parse_env("MEMORY_OPTIMIZER_MAX_CONTEXT_TOKENS", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_MIN_KEPT") {
            cfg.optimizer.min_kept = parse_env("MEMORY_OPTIMIZER_MIN_KEPT", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_OPTIMIZER_CANDIDATE_CEILING") {
            cfg.optimizer.candidate_ceiling = parse_env("MEMORY_OPTIMIZER_CANDIDATE_CEILING", &v)?;
        }
        if let Ok(v) = std::env::var("MEMORY_BACKPRESSURE_LATENCY_MS") {
            cfg.backpressure_latency_ms = parse_env("MEMORY_BACKPRESSURE_LATENCY_MS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim_semantic < 32 {
            return Err(MemoryError::validation("embedding.dim_semantic must be >= 32"));
        }
        if self.dim_episodic < 32 {
            return Err(MemoryError::validation("embedding.dim_episodic must be >= 32"));
        }
        check_range("retrieval.k_fetch_min", self.k_fetch_min as f32, 10.0, 500.0)?;
        if self.retrieval_weight_vector + self.retrieval_weight_lexical > 1.0001 {
            return Err(MemoryError::validation("retrieval.weights must sum to <= 1"));
        }
        if self.retrieval_freshness_half_life_days <= 0.0 {
            return Err(MemoryError::validation("retrieval.freshness_half_life_days must be > 0"));
        }
        if self.cache_persona_ttl_s < 60 || self.cache_query_ttl_s < 60 {
            return Err(MemoryError::validation("cache TTLs must be >= 60s"));
        }
        check_range("cache.semantic_match_threshold", self.cache_semantic_match_threshold, 0.80, 0.95)?;
        check_range("cache.max_query_per_user", self.cache_max_query_per_user as f32, 1.0, 100.0)?;
        if self.episodic_window_seconds < 60 {
            return Err(MemoryError::validation("episodic.window_seconds must be >= 60"));
        }
        if self.episodic_compress_after_days < self.episodic_retention_days {
            return Err(MemoryError::validation(
                "episodic.compress_after_days must be >= episodic.retention_days",
            ));
        }
        self.optimizer.validate()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| MemoryError::validation(format!("invalid value for {name}: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_dim_below_minimum() {
        let mut cfg = Config::default();
        cfg.dim_semantic = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_weights_summing_above_one() {
        let mut cfg = Config::default();
        cfg.retrieval_weight_vector = 0.9;
        cfg.retrieval_weight_lexical = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_compress_after_less_than_retention() {
        let mut cfg = Config::default();
        cfg.episodic_compress_after_days = 1;
        cfg.episodic_retention_days = 30;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn aggressive_profile_lowers_min_kept() {
        let cfg = OptimizerConfig::for_profile(OptimizerProfile::Aggressive);
        assert_eq!(cfg.min_kept, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_known_profile_names_case_insensitively() {
        assert_eq!(OptimizerProfile::parse("AGGRESSIVE").unwrap(), OptimizerProfile::Aggressive);
    }

    #[test]
    fn rejects_unknown_profile_name() {
        assert!(OptimizerProfile::parse("turbo").is_err());
    }
}
