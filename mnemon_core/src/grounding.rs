//! Statement grounding: evidence search, confidence scoring, and
//! contradiction detection.
//!
//! Confidence is a weighted average of evidence relevance, where each
//! piece of evidence is weighted by the source memory's importance times a
//! recency decay of `0.5^(age / half_life)`. A statement is grounded when
//! confidence clears the grounding threshold and no contradiction reaches
//! the rejection threshold.

use crate::backends::{EmbeddingProvider, ExtractionProvider, MemoryStore, VectorHit};
use crate::error::{EngineError, Result};
use crate::retrieval::VectorRetriever;
use crate::types::{
    Contradiction, Evidence, FactClaim, GroundingResult, PropertyValue, QueryResult, ResultOrigin,
};
use mnemon_config::GroundingConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GroundingEngine {
    retriever: Arc<VectorRetriever>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Option<Arc<dyn ExtractionProvider>>,
    memories: Arc<dyn MemoryStore>,
    config: GroundingConfig,
}

impl GroundingEngine {
    pub fn new(
        retriever: Arc<VectorRetriever>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Option<Arc<dyn ExtractionProvider>>,
        memories: Arc<dyn MemoryStore>,
        config: GroundingConfig,
    ) -> Self {
        Self {
            retriever,
            embedder,
            extractor,
            memories,
            config,
        }
    }

    fn recency_decay(&self, age_secs: u64) -> f32 {
        0.5f32.powf(age_secs as f32 / self.config.recency_half_life_secs as f32)
    }

    fn evidence_hits(&self, user_id: &str, statement: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let query = self
            .embedder
            .embed(statement)
            .map_err(|e| EngineError::dependency("embedding", e))?;
        // No score floor here: weak evidence still informs confidence.
        self.retriever
            .search(&query, Some(user_id), limit, 0.0, &HashMap::new())
    }

    /// Importance and recency weight for one evidence hit. Non-memory
    /// sources (chunks) get a neutral importance.
    fn hit_weight(&self, hit: &VectorHit, now: u64) -> f32 {
        let importance = if hit.origin == ResultOrigin::Memory {
            match self.memories.get(&hit.id) {
                Ok(Some(memory)) => memory.importance,
                Ok(None) => 0.5,
                Err(e) => {
                    warn!(memory = %hit.id, error = %e, "memory lookup failed, using neutral importance");
                    0.5
                }
            }
        } else {
            0.5
        };
        let age = now.saturating_sub(hit.timestamp);
        importance * self.recency_decay(age)
    }

    fn confidence_from_hits(&self, hits: &[VectorHit], now: u64) -> f32 {
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for hit in hits {
            let weight = self.hit_weight(hit, now);
            weighted += weight * hit.score.clamp(0.0, 1.0);
            total += weight;
        }
        if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn find_supporting_evidence(
        &self,
        user_id: &str,
        statement: &str,
    ) -> Result<Vec<Evidence>> {
        if statement.trim().is_empty() {
            return Err(EngineError::validation("statement must not be empty"));
        }
        let hits = self.evidence_hits(user_id, statement, self.config.max_evidence)?;
        Ok(hits.into_iter().map(evidence_from_hit).collect())
    }

    /// Structured claims for a hit: explicit `subject`/`predicate`/`object`
    /// metadata wins; otherwise claims are extracted from the content.
    fn claims_for_hit(&self, hit: &VectorHit) -> Vec<FactClaim> {
        if let (Some(subject), Some(predicate), Some(object)) = (
            hit.metadata.get("subject"),
            hit.metadata.get("predicate"),
            hit.metadata.get("object"),
        ) {
            return vec![FactClaim {
                subject: subject.clone(),
                predicate: predicate.clone(),
                object: object.clone(),
                confidence: 1.0,
            }];
        }
        match &self.extractor {
            Some(extractor) => match extractor.extract_claims(&hit.content) {
                Ok(claims) => claims,
                Err(e) => {
                    warn!(source = %hit.id, error = %e, "claim extraction failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    /// Stored facts that share a statement claim's subject and predicate
    /// but assert a different object.
    pub fn detect_contradictions(&self, user_id: &str, statement: &str) -> Result<Vec<Contradiction>> {
        let claims = match &self.extractor {
            Some(extractor) => extractor
                .extract_claims(statement)
                .map_err(|e| EngineError::dependency("claim extraction", e))?,
            None => Vec::new(),
        };
        if claims.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self.evidence_hits(user_id, statement, self.config.max_evidence * 4)?;
        let mut by_source: HashMap<String, Contradiction> = HashMap::new();
        for hit in &hits {
            for stored in self.claims_for_hit(hit) {
                for claim in &claims {
                    let same_key = stored.subject.eq_ignore_ascii_case(&claim.subject)
                        && stored.predicate.eq_ignore_ascii_case(&claim.predicate);
                    let same_object = stored.object.eq_ignore_ascii_case(&claim.object);
                    if same_key && !same_object {
                        // A key-level clash is strong evidence on its own,
                        // whatever the lexical overlap.
                        let score = hit.score.max(0.9);
                        let contradiction = Contradiction {
                            conflicting_statement: hit.content.clone(),
                            source: hit.id.clone(),
                            conflict_score: score,
                            explanation: Some(format!(
                                "statement asserts {} {} {}, but stored fact says {}",
                                claim.subject, claim.predicate, claim.object, stored.object
                            )),
                        };
                        by_source
                            .entry(hit.id.clone())
                            .and_modify(|existing| {
                                if score > existing.conflict_score {
                                    *existing = contradiction.clone();
                                }
                            })
                            .or_insert(contradiction);
                    }
                }
            }
        }
        let mut contradictions: Vec<Contradiction> = by_source.into_values().collect();
        contradictions.sort_by(|a, b| {
            b.conflict_score
                .partial_cmp(&a.conflict_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.source.cmp(&b.source))
        });
        Ok(contradictions)
    }

    pub fn verify_statement(
        &self,
        user_id: &str,
        statement: &str,
        now: u64,
    ) -> Result<GroundingResult> {
        if statement.trim().is_empty() {
            return Err(EngineError::validation("statement must not be empty"));
        }
        let hits = self.evidence_hits(user_id, statement, self.config.max_evidence)?;
        let confidence = self.confidence_from_hits(&hits, now);
        let contradictions = self.detect_contradictions(user_id, statement)?;
        let rejected = contradictions
            .iter()
            .any(|c| c.conflict_score >= self.config.rejection_threshold);
        let is_grounded = confidence >= self.config.grounding_threshold && !rejected;
        let explanation = if rejected {
            Some(format!(
                "rejected: {} contradicting fact(s) on record",
                contradictions.len()
            ))
        } else if is_grounded {
            Some(format!(
                "supported by {} piece(s) of evidence at confidence {confidence:.2}",
                hits.len()
            ))
        } else {
            Some(format!(
                "insufficient support: confidence {confidence:.2} below threshold {:.2}",
                self.config.grounding_threshold
            ))
        };
        debug!(confidence, is_grounded, contradictions = contradictions.len(), "statement verified");
        Ok(GroundingResult {
            is_grounded,
            confidence,
            evidence: hits.into_iter().map(evidence_from_hit).collect(),
            contradictions,
            explanation,
        })
    }

    /// Attach grounding to a query result: per-item confidence lands in
    /// item metadata, the top item's full verification becomes the
    /// result-level grounding summary.
    pub fn ground_query_result(
        &self,
        user_id: &str,
        mut result: QueryResult,
        now: u64,
    ) -> Result<QueryResult> {
        if result.items.is_empty() {
            result.grounding = Some(GroundingResult {
                is_grounded: false,
                confidence: 0.0,
                evidence: Vec::new(),
                contradictions: Vec::new(),
                explanation: Some("no results to ground".to_string()),
            });
            return Ok(result);
        }
        for item in &mut result.items {
            let hits = self.evidence_hits(user_id, &item.content, self.config.max_evidence)?;
            let confidence = self.confidence_from_hits(&hits, now);
            item.metadata.insert(
                "grounding_confidence".to_string(),
                PropertyValue::Number(confidence as f64),
            );
        }
        let top_content = result.items[0].content.clone();
        result.grounding = Some(self.verify_statement(user_id, &top_content, now)?);
        Ok(result)
    }
}

fn evidence_from_hit(hit: VectorHit) -> Evidence {
    Evidence {
        source: hit.id,
        content: hit.content,
        relevance: hit.score,
        timestamp: hit.timestamp,
        metadata: hit.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::VectorStore;
    use crate::embedded::{HashEmbedder, InMemoryMemoryStore, InMemoryVectorStore, PatternExtractor};
    use crate::types::{Memory, MemoryType};

    const NOW: u64 = 1_700_000_000;
    const DIMS: usize = 64;

    struct Fixture {
        engine: GroundingEngine,
        memories: Arc<InMemoryMemoryStore>,
        vectors: Arc<InMemoryVectorStore>,
        embedder: Arc<HashEmbedder>,
    }

    fn fixture() -> Fixture {
        let memories = Arc::new(InMemoryMemoryStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(HashEmbedder::new(DIMS));
        let retriever = Arc::new(VectorRetriever::new(vectors.clone(), DIMS));
        let engine = GroundingEngine::new(
            retriever,
            embedder.clone(),
            Some(Arc::new(PatternExtractor::new())),
            memories.clone(),
            GroundingConfig::default(),
        );
        Fixture {
            engine,
            memories,
            vectors,
            embedder,
        }
    }

    fn remember(fx: &Fixture, id: &str, content: &str, importance: f32, created_at: u64) {
        let mut memory = Memory::new(id, "u1", content, MemoryType::Factual, created_at);
        memory.importance = importance;
        memory.embedding = fx.embedder.embed(content).unwrap();
        fx.memories.add(&memory).unwrap();
        fx.vectors.index_memory(&memory).unwrap();
    }

    #[test]
    fn unsupported_statement_is_not_grounded() {
        let fx = fixture();
        let result = fx
            .engine
            .verify_statement("u1", "The moon is made of cheese", NOW)
            .unwrap();
        assert!(!result.is_grounded);
        assert_eq!(result.confidence, 0.0);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn supported_statement_is_grounded() {
        let fx = fixture();
        remember(&fx, "mem-1", "Paris is the capital of France", 0.9, NOW - 3_600);
        let result = fx
            .engine
            .verify_statement("u1", "Paris is the capital of France", NOW)
            .unwrap();
        assert!(result.is_grounded);
        assert!(result.confidence > 0.9);
        assert_eq!(result.evidence.len(), 1);
        assert!(result.contradictions.is_empty());
    }

    #[test]
    fn stale_evidence_decays() {
        let fresh = fixture();
        remember(&fresh, "mem-1", "Paris is the capital of France", 0.9, NOW - 3_600);
        let fresh_conf = fresh
            .engine
            .verify_statement("u1", "the capital of France", NOW)
            .unwrap()
            .confidence;

        // Same evidence, four half-lives old, next to a fresh unrelated
        // memory that dilutes the weighted average.
        let stale = fixture();
        let four_half_lives = NOW - 4 * GroundingConfig::default().recency_half_life_secs;
        remember(&stale, "mem-1", "Paris is the capital of France", 0.9, four_half_lives);
        remember(&stale, "mem-2", "groceries include milk and France bread", 0.9, NOW - 60);
        let stale_conf = stale
            .engine
            .verify_statement("u1", "the capital of France", NOW)
            .unwrap()
            .confidence;
        assert!(stale_conf < fresh_conf);
    }

    #[test]
    fn contradicting_fact_rejects_grounding() {
        let fx = fixture();
        remember(&fx, "mem-1", "Paris is the capital of France", 0.9, NOW - 3_600);
        let result = fx
            .engine
            .verify_statement("u1", "Paris is the capital of Germany", NOW)
            .unwrap();
        assert!(!result.is_grounded);
        assert_eq!(result.contradictions.len(), 1);
        assert!(result.contradictions[0].conflict_score >= 0.9);
        assert_eq!(result.contradictions[0].source, "mem-1");
    }

    #[test]
    fn structured_fact_metadata_wins_over_extraction() {
        let fx = fixture();
        let mut memory = Memory::new("mem-1", "u1", "travel notes about Paris", MemoryType::Factual, NOW - 60);
        memory.importance = 0.9;
        memory.embedding = fx.embedder.embed(&memory.content).unwrap();
        memory.metadata.insert("subject".to_string(), "Paris".to_string());
        memory.metadata.insert("predicate".to_string(), "capital_of".to_string());
        memory.metadata.insert("object".to_string(), "France".to_string());
        fx.memories.add(&memory).unwrap();
        fx.vectors.index_memory(&memory).unwrap();

        let contradictions = fx
            .engine
            .detect_contradictions("u1", "Paris is the capital of Germany")
            .unwrap();
        assert_eq!(contradictions.len(), 1);
        assert_eq!(contradictions[0].source, "mem-1");
    }

    #[test]
    fn agreeing_fact_is_not_a_contradiction() {
        let fx = fixture();
        remember(&fx, "mem-1", "Paris is the capital of France", 0.9, NOW - 3_600);
        let contradictions = fx
            .engine
            .detect_contradictions("u1", "Paris is the capital of France")
            .unwrap();
        assert!(contradictions.is_empty());
    }

    #[test]
    fn empty_statement_is_validation_error() {
        let fx = fixture();
        assert!(matches!(
            fx.engine.verify_statement("u1", "  ", NOW),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            fx.engine.find_supporting_evidence("u1", ""),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn ground_query_result_annotates_items() {
        let fx = fixture();
        remember(&fx, "mem-1", "Paris is the capital of France", 0.9, NOW - 3_600);
        let result = QueryResult {
            items: vec![crate::types::QueryResultItem {
                id: "mem-1".to_string(),
                content: "Paris is the capital of France".to_string(),
                score: 0.9,
                origin: ResultOrigin::Memory,
                metadata: HashMap::new(),
                related: Vec::new(),
            }],
            total_count: 1,
            execution_time: std::time::Duration::from_millis(1),
            grounding: None,
        };
        let grounded = fx.engine.ground_query_result("u1", result, NOW).unwrap();
        let summary = grounded.grounding.unwrap();
        assert!(summary.is_grounded);
        assert!(matches!(
            grounded.items[0].metadata.get("grounding_confidence"),
            Some(PropertyValue::Number(_))
        ));
    }
}
