//! Memory consolidation: collapse near-duplicate memories per user.
//!
//! Cosine-similar pairs (>= merge threshold) are clustered with union-find;
//! each cluster keeps one representative and absorbs the rest. The pass
//! holds a per-user lease so concurrent runs for the same user serialize,
//! and it is idempotent: a second run right after finds nothing to merge.

use crate::backends::{cosine_similarity, fnv1a, MemoryStore, VectorStore};
use crate::error::{EngineError, Result};
use crate::graph_index::{DisjointSet, LockTable};
use crate::types::Memory;
use mnemon_config::ConsolidationConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Clusters that were collapsed.
    pub memories_consolidated: usize,
    /// Non-representative memories deleted by those collapses.
    pub duplicates_removed: usize,
    /// Expired working memories pruned before clustering.
    pub expired_pruned: usize,
}

pub struct ConsolidationEngine {
    memories: Arc<dyn MemoryStore>,
    vectors: Arc<dyn VectorStore>,
    config: ConsolidationConfig,
    user_locks: LockTable,
}

impl ConsolidationEngine {
    pub fn new(
        memories: Arc<dyn MemoryStore>,
        vectors: Arc<dyn VectorStore>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            memories,
            vectors,
            config,
            user_locks: LockTable::new(),
        }
    }

    pub fn consolidate(&self, user_id: &str, now: u64) -> Result<ConsolidationReport> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        let lease = self.user_locks.handle(user_id);
        let _guard = lease.lock().unwrap();

        let all = self
            .memories
            .list_by_user(user_id, None, None)
            .map_err(|e| EngineError::dependency("memory listing", e))?;

        let mut report = ConsolidationReport::default();

        let expired: Vec<String> = all
            .iter()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id.clone())
            .collect();
        if !expired.is_empty() {
            self.memories
                .delete(&expired)
                .map_err(|e| EngineError::dependency("memory delete", e))?;
            self.vectors
                .delete(&expired)
                .map_err(|e| EngineError::dependency("vector delete", e))?;
            report.expired_pruned = expired.len();
            debug!(user = user_id, pruned = expired.len(), "pruned expired working memories");
        }

        let mut active: Vec<Memory> = all
            .into_iter()
            .filter(|m| !m.is_expired(now) && !m.embedding.is_empty())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        if active.len() < 2 {
            return Ok(report);
        }

        let mut dsu = DisjointSet::new(active.len());
        for (i, j) in self.candidate_pairs(&active) {
            if cosine_similarity(&active[i].embedding, &active[j].embedding)
                >= self.config.merge_threshold
            {
                dsu.union(i, j);
            }
        }

        let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..active.len() {
            clusters.entry(dsu.find(i)).or_default().push(i);
        }
        let mut roots: Vec<usize> = clusters
            .iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(root, _)| *root)
            .collect();
        roots.sort_unstable();

        for root in roots {
            let members = &clusters[&root];
            let rep_index = *members
                .iter()
                .max_by(|&&a, &&b| {
                    active[a]
                        .importance
                        .partial_cmp(&active[b].importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(active[a].created_at.cmp(&active[b].created_at))
                        .then(active[b].id.cmp(&active[a].id))
                })
                .unwrap();

            let mut representative = active[rep_index].clone();
            let mut removed = Vec::new();
            for &i in members {
                if i == rep_index {
                    continue;
                }
                let absorbed = &active[i];
                representative.access_count += absorbed.access_count;
                for tag in &absorbed.tags {
                    if !representative.tags.contains(tag) {
                        representative.tags.push(tag.clone());
                    }
                }
                for (key, value) in &absorbed.metadata {
                    representative
                        .metadata
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                removed.push(absorbed.id.clone());
            }
            representative.tags.sort();
            representative.updated_at = Some(now);

            self.memories
                .update(&representative)
                .map_err(|e| EngineError::dependency("memory update", e))?;
            self.vectors
                .index_memory(&representative)
                .map_err(|e| EngineError::dependency("vector index", e))?;
            self.memories
                .delete(&removed)
                .map_err(|e| EngineError::dependency("memory delete", e))?;
            self.vectors
                .delete(&removed)
                .map_err(|e| EngineError::dependency("vector delete", e))?;

            report.memories_consolidated += 1;
            report.duplicates_removed += removed.len();
        }

        info!(
            user = user_id,
            clusters = report.memories_consolidated,
            removed = report.duplicates_removed,
            "consolidation pass complete"
        );
        Ok(report)
    }

    /// Candidate index pairs. Small sets get the full pairwise grid; larger
    /// sets are pre-bucketed by their minimum content token hash so only
    /// plausibly similar memories are compared.
    fn candidate_pairs(&self, memories: &[Memory]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        if memories.len() <= self.config.pairwise_limit {
            for i in 0..memories.len() {
                for j in (i + 1)..memories.len() {
                    pairs.push((i, j));
                }
            }
            return pairs;
        }
        let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, memory) in memories.iter().enumerate() {
            buckets.entry(min_token_hash(&memory.content)).or_default().push(i);
        }
        for members in buckets.values() {
            for a in 0..members.len() {
                for b in (a + 1)..members.len() {
                    pairs.push((members[a], members[b]));
                }
            }
        }
        pairs
    }
}

fn min_token_hash(content: &str) -> u64 {
    content
        .split_whitespace()
        .map(|t| fnv1a(t.to_lowercase().as_bytes()))
        .min()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::EmbeddingProvider;
    use crate::embedded::{HashEmbedder, InMemoryMemoryStore, InMemoryVectorStore};
    use crate::types::MemoryType;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        engine: ConsolidationEngine,
        memories: Arc<InMemoryMemoryStore>,
        embedder: HashEmbedder,
    }

    fn fixture(config: ConsolidationConfig) -> Fixture {
        let memories = Arc::new(InMemoryMemoryStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        Fixture {
            engine: ConsolidationEngine::new(memories.clone(), vectors, config),
            memories,
            embedder: HashEmbedder::new(64),
        }
    }

    fn remember(fx: &Fixture, id: &str, user: &str, content: &str, importance: f32) -> Memory {
        let mut memory = Memory::new(id, user, content, MemoryType::Episodic, NOW - 1_000);
        memory.importance = importance;
        memory.embedding = fx.embedder.embed(content).unwrap();
        fx.memories.add(&memory).unwrap();
        memory
    }

    #[test]
    fn near_duplicates_collapse_to_highest_importance() {
        let fx = fixture(ConsolidationConfig::default());
        remember(&fx, "mem-1", "u1", "bought coffee at the corner shop", 0.3);
        let mut keeper = remember(&fx, "mem-2", "u1", "bought coffee at the corner shop", 0.8);
        keeper.tags = vec!["coffee".to_string()];
        fx.memories.update(&keeper).unwrap();
        remember(&fx, "mem-3", "u1", "finished reading a novel about whales", 0.5);

        let report = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(report.memories_consolidated, 1);
        assert_eq!(report.duplicates_removed, 1);

        assert!(fx.memories.get("mem-1").unwrap().is_none());
        let survivor = fx.memories.get("mem-2").unwrap().unwrap();
        assert_eq!(survivor.updated_at, Some(NOW));
        assert!(fx.memories.get("mem-3").unwrap().is_some());
    }

    #[test]
    fn consolidation_is_idempotent() {
        let fx = fixture(ConsolidationConfig::default());
        for i in 0..3 {
            remember(&fx, &format!("mem-{i}"), "u1", "weekly standup moved to nine", 0.5);
        }
        let first = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(first.duplicates_removed, 2);

        let second = fx.engine.consolidate("u1", NOW + 10).unwrap();
        assert_eq!(second, ConsolidationReport::default());
    }

    #[test]
    fn dissimilar_memories_are_untouched() {
        let fx = fixture(ConsolidationConfig::default());
        remember(&fx, "mem-1", "u1", "the garden needs watering tomorrow", 0.5);
        remember(&fx, "mem-2", "u1", "quarterly revenue grew eight percent", 0.5);
        let report = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(report, ConsolidationReport::default());
        assert_eq!(fx.memories.count(None).unwrap(), 2);
    }

    #[test]
    fn other_users_memories_are_isolated() {
        let fx = fixture(ConsolidationConfig::default());
        remember(&fx, "mem-1", "u1", "identical content here", 0.5);
        remember(&fx, "mem-2", "u2", "identical content here", 0.5);
        let report = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(report.duplicates_removed, 0);
        assert_eq!(fx.memories.count(None).unwrap(), 2);
    }

    #[test]
    fn expired_working_memories_are_pruned() {
        let fx = fixture(ConsolidationConfig::default());
        let mut scratch = Memory::new("mem-1", "u1", "temporary note", MemoryType::Working, NOW - 500);
        scratch.embedding = fx.embedder.embed("temporary note").unwrap();
        scratch.expires_at = Some(NOW - 10);
        fx.memories.add(&scratch).unwrap();

        let report = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(report.expired_pruned, 1);
        assert!(fx.memories.get("mem-1").unwrap().is_none());
    }

    #[test]
    fn bucketed_path_still_finds_duplicates() {
        let config = ConsolidationConfig {
            pairwise_limit: 1,
            ..ConsolidationConfig::default()
        };
        let fx = fixture(config);
        remember(&fx, "mem-1", "u1", "backup ran clean overnight", 0.5);
        remember(&fx, "mem-2", "u1", "backup ran clean overnight", 0.5);
        let report = fx.engine.consolidate("u1", NOW).unwrap();
        assert_eq!(report.duplicates_removed, 1);
    }

    #[test]
    fn merged_counters_and_tags_union() {
        let fx = fixture(ConsolidationConfig::default());
        let mut a = remember(&fx, "mem-1", "u1", "met the landlord on tuesday", 0.9);
        a.access_count = 3;
        a.tags = vec!["landlord".to_string()];
        fx.memories.update(&a).unwrap();
        let mut b = remember(&fx, "mem-2", "u1", "met the landlord on tuesday", 0.2);
        b.access_count = 2;
        b.tags = vec!["housing".to_string()];
        b.metadata.insert("place".to_string(), "hallway".to_string());
        fx.memories.update(&b).unwrap();

        fx.engine.consolidate("u1", NOW).unwrap();
        let survivor = fx.memories.get("mem-1").unwrap().unwrap();
        assert_eq!(survivor.access_count, 5);
        assert_eq!(survivor.tags, vec!["housing".to_string(), "landlord".to_string()]);
        assert_eq!(survivor.metadata.get("place"), Some(&"hallway".to_string()));
    }

    #[test]
    fn empty_user_id_rejected() {
        let fx = fixture(ConsolidationConfig::default());
        assert!(matches!(
            fx.engine.consolidate(" ", NOW),
            Err(EngineError::Validation(_))
        ));
    }
}
