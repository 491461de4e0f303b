//! Vector retrieval with defensive post-filtering.
//!
//! The retriever validates query dimensionality, re-applies the score
//! floor on whatever the backend returned, and fixes the ordering:
//! descending score, most recent timestamp, then id.

use crate::backends::{VectorHit, VectorStore};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    dimensions: usize,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, dimensions: usize) -> Self {
        Self { store, dimensions }
    }

    pub fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        top_k: usize,
        min_score: f32,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimensions {
            return Err(EngineError::validation(format!(
                "query embedding has {} dimensions, expected {}",
                query.len(),
                self.dimensions
            )));
        }
        if top_k == 0 {
            return Err(EngineError::validation("top_k must be greater than zero"));
        }
        let mut hits = self
            .store
            .search(query, user_id, top_k, min_score, filters)
            .map_err(|e| EngineError::dependency("vector search", e))?;
        // Backends are not trusted to honor the floor or the ordering.
        hits.retain(|h| h.score >= min_score);
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        debug!(hits = hits.len(), top_k, "vector search complete");
        Ok(hits)
    }
}
