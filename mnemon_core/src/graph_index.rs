//! GraphIndex: the single owner of knowledge-graph mutation.
//!
//! All writes serialize per entity through a lock table; multi-entity
//! operations (relationship upsert, merge) take their locks in sorted id
//! order so two overlapping operations can never deadlock. Merges are
//! prepared here and committed through `GraphStore::commit_merge` in one
//! atomic step, so readers never observe a dangling endpoint.

use crate::backends::{cosine_similarity, GraphStore};
use crate::error::{EngineError, Result};
use crate::types::{Entity, EntityId, Relationship};
use mnemon_config::GraphConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Keyed lock table. Handles are created on first use and kept for the
/// lifetime of the table; contention on the outer mutex is limited to the
/// handle lookup.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handles for a set of keys in sorted, deduplicated order. Callers
    /// must lock them in the returned order.
    pub fn handles_sorted(&self, keys: &[&str]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted: Vec<&str> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.into_iter().map(|k| self.handle(k)).collect()
    }
}

pub struct GraphIndex {
    store: Arc<dyn GraphStore>,
    config: GraphConfig,
    dimensions: usize,
    locks: LockTable,
    next_id: Mutex<u64>,
}

impl GraphIndex {
    pub fn new(store: Arc<dyn GraphStore>, config: GraphConfig, dimensions: usize) -> Self {
        Self {
            store,
            config,
            dimensions,
            locks: LockTable::new(),
            next_id: Mutex::new(1),
        }
    }

    fn alloc_id(&self) -> EntityId {
        let mut next = self.next_id.lock().unwrap();
        let id = format!("ent-{:06}", *next);
        *next += 1;
        id
    }

    fn is_reflexive(&self, relation_type: &str) -> bool {
        self.config
            .reflexive_relation_types
            .iter()
            .any(|t| t == relation_type)
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if !embedding.is_empty() && embedding.len() != self.dimensions {
            return Err(EngineError::validation(format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    /// Insert or replace an entity. An empty id gets a fresh `ent-<n>` id;
    /// re-upserting an existing id preserves its creation time.
    pub fn upsert_entity(&self, mut entity: Entity) -> Result<Entity> {
        if entity.name.trim().is_empty() {
            return Err(EngineError::validation("entity name must not be empty"));
        }
        self.validate_embedding(&entity.embedding)?;
        if entity.id.is_empty() {
            entity.id = self.alloc_id();
        }
        let handle = self.locks.handle(&entity.id);
        let _guard = handle.lock().unwrap();
        if let Some(existing) = self
            .store
            .get_entity(&entity.id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?
        {
            entity.created_at = existing.created_at;
        }
        self.store
            .upsert_entities(std::slice::from_ref(&entity))
            .map_err(|e| EngineError::dependency("graph upsert", e))?;
        Ok(entity)
    }

    /// Resolve a candidate against existing entities by name (and type);
    /// on a hit the existing entity absorbs the candidate (mention count,
    /// aliases, embedding backfill), otherwise the candidate is inserted.
    /// Returns the stored entity and whether it was newly created.
    pub fn resolve_or_insert(&self, candidate: Entity) -> Result<(Entity, bool)> {
        if candidate.name.trim().is_empty() {
            return Err(EngineError::validation("entity name must not be empty"));
        }
        self.validate_embedding(&candidate.embedding)?;
        let matches = self
            .store
            .find_by_name(&candidate.name)
            .map_err(|e| EngineError::dependency("graph lookup", e))?;
        let existing = matches
            .into_iter()
            .find(|e| e.entity_type == candidate.entity_type);
        match existing {
            Some(found) => {
                let handle = self.locks.handle(&found.id);
                let _guard = handle.lock().unwrap();
                // Re-read under the lock; the entity may have changed.
                let mut current = self
                    .store
                    .get_entity(&found.id)
                    .map_err(|e| EngineError::dependency("graph lookup", e))?
                    .ok_or_else(|| EngineError::not_found("entity", found.id.clone()))?;
                current.mention_count += candidate.mention_count.max(1);
                for alias in candidate
                    .aliases
                    .iter()
                    .chain(std::iter::once(&candidate.name))
                {
                    if !current.name.eq_ignore_ascii_case(alias)
                        && !current
                            .aliases
                            .iter()
                            .any(|a| a.eq_ignore_ascii_case(alias))
                    {
                        current.aliases.push(alias.clone());
                    }
                }
                if current.embedding.is_empty() && !candidate.embedding.is_empty() {
                    current.embedding = candidate.embedding;
                }
                if current.description.is_none() {
                    current.description = candidate.description;
                }
                current.updated_at = candidate.updated_at;
                self.store
                    .upsert_entities(std::slice::from_ref(&current))
                    .map_err(|e| EngineError::dependency("graph upsert", e))?;
                Ok((current, false))
            }
            None => Ok((self.upsert_entity(candidate)?, true)),
        }
    }

    /// Insert or update a relationship. Both endpoints must exist; self
    /// loops are allowed only for configured reflexive relation types.
    pub fn upsert_relationship(&self, mut rel: Relationship) -> Result<Relationship> {
        if rel.relation_type.trim().is_empty() {
            return Err(EngineError::validation("relation type must not be empty"));
        }
        if rel.source_entity_id == rel.target_entity_id && !self.is_reflexive(&rel.relation_type) {
            return Err(EngineError::conflict(format!(
                "self-loop not permitted for relation type '{}'",
                rel.relation_type
            )));
        }
        rel.confidence = rel.confidence.clamp(0.0, 1.0);
        let handles = self
            .locks
            .handles_sorted(&[rel.source_entity_id.as_str(), rel.target_entity_id.as_str()]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock().unwrap()).collect();
        for endpoint in [&rel.source_entity_id, &rel.target_entity_id] {
            let exists = self
                .store
                .get_entity(endpoint)
                .map_err(|e| EngineError::dependency("graph lookup", e))?
                .is_some();
            if !exists {
                return Err(EngineError::validation(format!(
                    "relationship endpoint '{endpoint}' does not exist"
                )));
            }
        }
        self.store
            .upsert_relationships(std::slice::from_ref(&rel))
            .map_err(|e| EngineError::dependency("graph upsert", e))?;
        Ok(rel)
    }

    pub fn get_entity(&self, id: &str) -> Result<Entity> {
        self.store
            .get_entity(id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?
            .ok_or_else(|| EngineError::not_found("entity", id))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        self.store
            .find_by_name(name)
            .map_err(|e| EngineError::dependency("graph lookup", e))
    }

    /// Merge `duplicate_ids` into `primary_id`. The merged entity keeps the
    /// primary's id and name; aliases union (including duplicate names),
    /// mention counts sum, the embedding becomes the mention-weighted
    /// centroid, and every relationship endpoint is rewritten. Committed
    /// atomically through the store.
    pub fn merge_entities(
        &self,
        primary_id: &str,
        duplicate_ids: &[EntityId],
        now: u64,
    ) -> Result<Entity> {
        let mut dup_ids: Vec<EntityId> = duplicate_ids.to_vec();
        dup_ids.sort();
        dup_ids.dedup();
        if dup_ids.is_empty() {
            return Err(EngineError::validation("no duplicate ids to merge"));
        }
        if dup_ids.iter().any(|id| id == primary_id) {
            return Err(EngineError::conflict(
                "primary entity cannot be merged into itself",
            ));
        }

        let mut all_keys: Vec<&str> = dup_ids.iter().map(String::as_str).collect();
        all_keys.push(primary_id);
        let handles = self.locks.handles_sorted(&all_keys);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock().unwrap()).collect();

        let mut primary = self.get_entity(primary_id)?;
        let mut duplicates = Vec::with_capacity(dup_ids.len());
        for id in &dup_ids {
            duplicates.push(self.get_entity(id)?);
        }

        // Alias union: duplicate names and aliases join the primary's
        // aliases; the primary's own name never appears as an alias.
        for dup in &duplicates {
            for alias in dup.aliases.iter().chain(std::iter::once(&dup.name)) {
                if !primary.name.eq_ignore_ascii_case(alias)
                    && !primary
                        .aliases
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(alias))
                {
                    primary.aliases.push(alias.clone());
                }
            }
            for (key, value) in &dup.properties {
                primary
                    .properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            if primary.description.is_none() {
                primary.description = dup.description.clone();
            }
        }
        primary.aliases.sort();

        // Mention-weighted centroid over the pre-merge counts; falls back
        // to a simple average when every weight is zero.
        let members: Vec<&Entity> = std::iter::once(&primary)
            .chain(duplicates.iter())
            .filter(|e| !e.embedding.is_empty())
            .collect();
        if !members.is_empty() {
            let dims = members[0].embedding.len();
            let total_weight: f64 = members.iter().map(|e| e.mention_count as f64).sum();
            let mut centroid = vec![0.0f64; dims];
            for member in &members {
                let weight = if total_weight > 0.0 {
                    member.mention_count as f64 / total_weight
                } else {
                    1.0 / members.len() as f64
                };
                for (slot, value) in centroid.iter_mut().zip(member.embedding.iter()) {
                    *slot += weight * *value as f64;
                }
            }
            let norm: f64 = centroid.iter().map(|v| v * v).sum::<f64>().sqrt();
            primary.embedding = if norm > 0.0 {
                centroid.iter().map(|v| (*v / norm) as f32).collect()
            } else {
                centroid.iter().map(|v| *v as f32).collect()
            };
        }

        primary.mention_count += duplicates.iter().map(|d| d.mention_count).sum::<u64>();
        primary.updated_at = now;

        let dup_set: HashSet<&str> = dup_ids.iter().map(String::as_str).collect();
        let mut rewritten: HashMap<(String, String, String), Relationship> = HashMap::new();
        let mut absorb = |mut rel: Relationship| {
            if dup_set.contains(rel.source_entity_id.as_str()) {
                rel.source_entity_id = primary.id.clone();
            }
            if dup_set.contains(rel.target_entity_id.as_str()) {
                rel.target_entity_id = primary.id.clone();
            }
            if rel.source_entity_id == rel.target_entity_id
                && !self.is_reflexive(&rel.relation_type)
            {
                return;
            }
            match rewritten.entry(rel.key()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(rel);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let kept = slot.get_mut();
                    if rel.confidence > kept.confidence {
                        kept.confidence = rel.confidence;
                    }
                    if rel.updated_at > kept.updated_at {
                        kept.updated_at = rel.updated_at;
                        if rel.extracted_context.is_some() {
                            kept.extracted_context = rel.extracted_context;
                        }
                    }
                    kept.created_at = kept.created_at.min(rel.created_at);
                }
            }
        };
        for rel in self
            .store
            .relationships_for(primary_id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?
        {
            absorb(rel);
        }
        for id in &dup_ids {
            for rel in self
                .store
                .relationships_for(id)
                .map_err(|e| EngineError::dependency("graph lookup", e))?
            {
                absorb(rel);
            }
        }
        let mut rewritten: Vec<Relationship> = rewritten.into_values().collect();
        rewritten.sort_by_key(|r| r.key());

        self.store
            .commit_merge(&primary, &dup_ids, &rewritten)
            .map_err(|e| EngineError::dependency("graph merge commit", e))?;
        info!(
            primary = %primary.id,
            merged = dup_ids.len(),
            relationships = rewritten.len(),
            "merged duplicate entities"
        );
        Ok(primary)
    }

    /// Duplicate discovery: entities sharing a normalized name whose
    /// embeddings agree above the dedupe threshold (or that both lack an
    /// embedding) form a group; the lowest id survives.
    pub fn find_duplicates(&self) -> Result<Vec<(EntityId, Vec<EntityId>)>> {
        let entities = self
            .store
            .all_entities()
            .map_err(|e| EngineError::dependency("graph lookup", e))?;
        let mut by_name: HashMap<String, Vec<&Entity>> = HashMap::new();
        for entity in &entities {
            by_name
                .entry(entity.name.trim().to_lowercase())
                .or_default()
                .push(entity);
        }

        let mut groups = Vec::new();
        for (_, mut members) in by_name {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| a.id.cmp(&b.id));
            let mut dsu = DisjointSet::new(members.len());
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    let a = &members[i].embedding;
                    let b = &members[j].embedding;
                    let duplicate = if a.is_empty() && b.is_empty() {
                        true
                    } else if a.is_empty() || b.is_empty() {
                        false
                    } else {
                        cosine_similarity(a, b) >= self.config.dedupe_threshold
                    };
                    if duplicate {
                        dsu.union(i, j);
                    }
                }
            }
            let mut clusters: HashMap<usize, Vec<&Entity>> = HashMap::new();
            for (i, member) in members.iter().enumerate() {
                clusters.entry(dsu.find(i)).or_default().push(member);
            }
            for cluster in clusters.into_values() {
                if cluster.len() < 2 {
                    continue;
                }
                // Members are already in ascending id order.
                let survivor = cluster[0].id.clone();
                let rest = cluster[1..].iter().map(|e| e.id.clone()).collect();
                groups.push((survivor, rest));
            }
        }
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(groups)
    }

    /// Merge every duplicate group found; returns the number of entities
    /// removed. Running it again right away finds nothing — idempotent.
    pub fn dedupe(&self, now: u64) -> Result<usize> {
        let groups = self.find_duplicates()?;
        let mut removed = 0;
        for (survivor, duplicates) in groups {
            debug!(survivor = %survivor, count = duplicates.len(), "merging duplicate group");
            removed += duplicates.len();
            self.merge_entities(&survivor, &duplicates, now)?;
        }
        Ok(removed)
    }
}

/// Union-find with path halving, shared by dedupe and consolidation
/// clustering.
pub(crate) struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Lower root wins so cluster representatives stay stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
