//! Hybrid score fusion.
//!
//! `final = α · vector_score + (1 − α) · graph_proximity`, where proximity
//! is `1 / (1 + hops)`. An item missing from one branch contributes 0 for
//! that component. The ranker is pure: same inputs, same output order.

use crate::backends::VectorHit;
use crate::types::{Entity, ResultOrigin};
use std::collections::HashMap;
use tracing::debug;

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub id: String,
    pub content: String,
    pub origin: ResultOrigin,
    pub final_score: f32,
    pub vector_score: f32,
    pub graph_proximity: f32,
    /// Mention count for entities, access count for memories; tie-break.
    pub weight: u64,
}

pub fn proximity(hops: u32) -> f32 {
    1.0 / (1.0 + hops as f32)
}

pub struct HybridRanker {
    alpha: f32,
}

impl HybridRanker {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Fuse vector hits with graph neighborhood `(entity, hops)` pairs.
    /// An id surfaced by both branches gets both components; the best
    /// value wins if a branch reports it twice.
    pub fn fuse(&self, vector: &[VectorHit], graph: &[(Entity, u32)]) -> Vec<RankedItem> {
        let mut items: HashMap<String, RankedItem> = HashMap::new();
        for hit in vector {
            let entry = items.entry(hit.id.clone()).or_insert_with(|| RankedItem {
                id: hit.id.clone(),
                content: hit.content.clone(),
                origin: hit.origin,
                final_score: 0.0,
                vector_score: 0.0,
                graph_proximity: 0.0,
                weight: hit.weight,
            });
            if hit.score > entry.vector_score {
                entry.vector_score = hit.score;
            }
            entry.weight = entry.weight.max(hit.weight);
        }
        for (entity, hops) in graph {
            let entry = items.entry(entity.id.clone()).or_insert_with(|| RankedItem {
                id: entity.id.clone(),
                content: entity.name.clone(),
                origin: ResultOrigin::Entity,
                final_score: 0.0,
                vector_score: 0.0,
                graph_proximity: 0.0,
                weight: entity.mention_count,
            });
            let prox = proximity(*hops);
            if prox > entry.graph_proximity {
                entry.graph_proximity = prox;
            }
            entry.weight = entry.weight.max(entity.mention_count);
        }

        let mut ranked: Vec<RankedItem> = items
            .into_values()
            .map(|mut item| {
                item.final_score =
                    self.alpha * item.vector_score + (1.0 - self.alpha) * item.graph_proximity;
                item
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.weight.cmp(&a.weight))
                .then(a.id.cmp(&b.id))
        });
        debug!(
            vector = vector.len(),
            graph = graph.len(),
            fused = ranked.len(),
            "hybrid fusion complete"
        );
        ranked
    }
}
