//! Configuration system for the Mnemon engine.
//!
//! Configuration is loaded from a TOML file; every field carries a serde
//! default so a partial (or missing) file yields a fully usable config.
//! After parsing, `MNEMON_`-prefixed environment variables override
//! individual fields, e.g.:
//!
//! ```text
//! MNEMON_EMBEDDING_DIMENSIONS=384
//! MNEMON_RETRIEVAL_TOP_K=20
//! MNEMON_GROUNDING_GROUNDING_THRESHOLD=0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemonConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Dimensionality every embedding in the system must match.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Weight of the vector score in hybrid fusion; the graph proximity
    /// score gets `1 - vector_weight`.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Default traversal depth for the graph branch of a query.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Relation types for which self-loops are allowed.
    #[serde(default = "default_reflexive_relation_types")]
    pub reflexive_relation_types: Vec<String>,
    /// Cosine threshold for treating two same-named entities as duplicates.
    #[serde(default = "default_dedupe_threshold")]
    pub dedupe_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Minimum confidence for a statement to count as grounded.
    #[serde(default = "default_grounding_threshold")]
    pub grounding_threshold: f32,
    /// Contradictions at or above this score reject grounding outright.
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: f32,
    /// Evidence recency half-life in seconds (default 30 days).
    #[serde(default = "default_recency_half_life_secs")]
    pub recency_half_life_secs: u64,
    /// Maximum supporting evidence items returned per statement.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Cosine threshold for clustering two memories as duplicates.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    /// Above this many candidate memories the pass switches from full
    /// pairwise comparison to bucketed candidate generation.
    #[serde(default = "default_pairwise_limit")]
    pub pairwise_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Target chunk size (characters) for document indexing.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_dimensions() -> usize {
    256
}
fn default_top_k() -> usize {
    10
}
fn default_min_score() -> f32 {
    0.7
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_max_depth() -> u32 {
    2
}
fn default_reflexive_relation_types() -> Vec<String> {
    vec!["same_as".to_string(), "related_to".to_string()]
}
fn default_dedupe_threshold() -> f32 {
    0.8
}
fn default_grounding_threshold() -> f32 {
    0.6
}
fn default_rejection_threshold() -> f32 {
    0.8
}
fn default_recency_half_life_secs() -> u64 {
    2_592_000
}
fn default_max_evidence() -> usize {
    5
}
fn default_merge_threshold() -> f32 {
    0.92
}
fn default_pairwise_limit() -> usize {
    512
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_chunk_chars() -> usize {
    1_200
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            vector_weight: default_vector_weight(),
            max_depth: default_max_depth(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            reflexive_relation_types: default_reflexive_relation_types(),
            dedupe_threshold: default_dedupe_threshold(),
        }
    }
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            grounding_threshold: default_grounding_threshold(),
            rejection_threshold: default_rejection_threshold(),
            recency_half_life_secs: default_recency_half_life_secs(),
            max_evidence: default_max_evidence(),
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            pairwise_limit: default_pairwise_limit(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

impl MnemonConfig {
    /// Parse a TOML string and apply environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: MnemonConfig =
            toml::from_str(raw).context("failed to parse mnemon config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path; a missing file yields defaults (plus env
    /// overrides).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            Self::from_toml_str(&raw)
        } else {
            let mut config = MnemonConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        override_parsed("MNEMON_EMBEDDING_DIMENSIONS", &mut self.embedding.dimensions);
        override_parsed("MNEMON_RETRIEVAL_TOP_K", &mut self.retrieval.top_k);
        override_parsed("MNEMON_RETRIEVAL_MIN_SCORE", &mut self.retrieval.min_score);
        override_parsed(
            "MNEMON_RETRIEVAL_VECTOR_WEIGHT",
            &mut self.retrieval.vector_weight,
        );
        override_parsed("MNEMON_RETRIEVAL_MAX_DEPTH", &mut self.retrieval.max_depth);
        override_parsed(
            "MNEMON_GRAPH_DEDUPE_THRESHOLD",
            &mut self.graph.dedupe_threshold,
        );
        if let Ok(raw) = std::env::var("MNEMON_GRAPH_REFLEXIVE_RELATION_TYPES") {
            self.graph.reflexive_relation_types = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        override_parsed(
            "MNEMON_GROUNDING_GROUNDING_THRESHOLD",
            &mut self.grounding.grounding_threshold,
        );
        override_parsed(
            "MNEMON_GROUNDING_REJECTION_THRESHOLD",
            &mut self.grounding.rejection_threshold,
        );
        override_parsed(
            "MNEMON_GROUNDING_RECENCY_HALF_LIFE_SECS",
            &mut self.grounding.recency_half_life_secs,
        );
        override_parsed(
            "MNEMON_GROUNDING_MAX_EVIDENCE",
            &mut self.grounding.max_evidence,
        );
        override_parsed(
            "MNEMON_CONSOLIDATION_MERGE_THRESHOLD",
            &mut self.consolidation.merge_threshold,
        );
        override_parsed(
            "MNEMON_CONSOLIDATION_PAIRWISE_LIMIT",
            &mut self.consolidation.pairwise_limit,
        );
        override_parsed(
            "MNEMON_WORKFLOW_REQUEST_TIMEOUT_MS",
            &mut self.workflow.request_timeout_ms,
        );
        override_parsed(
            "MNEMON_WORKFLOW_MAX_CHUNK_CHARS",
            &mut self.workflow.max_chunk_chars,
        );
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than zero");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than zero");
        }
        for (name, value) in [
            ("retrieval.min_score", self.retrieval.min_score),
            ("retrieval.vector_weight", self.retrieval.vector_weight),
            ("graph.dedupe_threshold", self.graph.dedupe_threshold),
            (
                "grounding.grounding_threshold",
                self.grounding.grounding_threshold,
            ),
            (
                "grounding.rejection_threshold",
                self.grounding.rejection_threshold,
            ),
            (
                "consolidation.merge_threshold",
                self.consolidation.merge_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if self.grounding.recency_half_life_secs == 0 {
            bail!("grounding.recency_half_life_secs must be greater than zero");
        }
        if self.workflow.request_timeout_ms == 0 {
            bail!("workflow.request_timeout_ms must be greater than zero");
        }
        if self.workflow.max_chunk_chars == 0 {
            bail!("workflow.max_chunk_chars must be greater than zero");
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(parsed) = raw.parse::<T>() {
            *slot = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = MnemonConfig::default();
        assert_eq!(config.embedding.dimensions, 256);
        assert_eq!(config.retrieval.top_k, 10);
        assert!((config.retrieval.vector_weight - 0.7).abs() < f32::EPSILON);
        assert!((config.consolidation.merge_threshold - 0.92).abs() < f32::EPSILON);
        assert_eq!(config.grounding.recency_half_life_secs, 2_592_000);
        assert_eq!(config.workflow.request_timeout_ms, 30_000);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            [retrieval]
            top_k = 25

            [grounding]
            grounding_threshold = 0.5
        "#;
        let config = MnemonConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.retrieval.top_k, 25);
        assert!((config.grounding.grounding_threshold - 0.5).abs() < f32::EPSILON);
        // Untouched sections keep their defaults.
        assert_eq!(config.embedding.dimensions, 256);
        assert!((config.retrieval.min_score - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn env_override_wins() {
        std::env::set_var("MNEMON_CONSOLIDATION_PAIRWISE_LIMIT", "64");
        let mut config = MnemonConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("MNEMON_CONSOLIDATION_PAIRWISE_LIMIT");
        assert_eq!(config.consolidation.pairwise_limit, 64);
    }

    #[test]
    fn reflexive_types_env_is_comma_split() {
        std::env::set_var("MNEMON_GRAPH_REFLEXIVE_RELATION_TYPES", "same_as, alias_of");
        let mut config = MnemonConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("MNEMON_GRAPH_REFLEXIVE_RELATION_TYPES");
        assert_eq!(config.graph.reflexive_relation_types, vec!["same_as", "alias_of"]);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = MnemonConfig::default();
        config.consolidation.merge_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = MnemonConfig::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(MnemonConfig::from_toml_str("retrieval = 3").is_err());
    }
}
