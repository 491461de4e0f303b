//! Bounded breadth-first traversal over the knowledge graph.
//!
//! Edges are walked in both directions. Every frontier expands its
//! neighbors in ascending entity-id order, which makes result ordering and
//! shortest-path tie-breaking deterministic.

use crate::backends::GraphStore;
use crate::error::{EngineError, Result};
use crate::types::{Entity, EntityId, Relationship};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub struct GraphTraversal {
    store: Arc<dyn GraphStore>,
}

impl GraphTraversal {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    fn require_entity(&self, id: &str) -> Result<Entity> {
        self.store
            .get_entity(id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?
            .ok_or_else(|| EngineError::not_found("entity", id))
    }

    fn neighbor_ids(&self, id: &str) -> Result<Vec<EntityId>> {
        let rels = self
            .store
            .relationships_for(id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?;
        let mut neighbors: Vec<EntityId> = rels
            .into_iter()
            .map(|r| {
                if r.source_entity_id == id {
                    r.target_entity_id
                } else {
                    r.source_entity_id
                }
            })
            .filter(|n| n != id)
            .collect();
        neighbors.sort();
        neighbors.dedup();
        Ok(neighbors)
    }

    /// Entities reachable within `max_depth` hops, paired with their hop
    /// distance. The start entity itself is not included. `max_depth == 0`
    /// yields an empty result.
    pub fn connected_with_depth(&self, id: &str, max_depth: u32) -> Result<Vec<(Entity, u32)>> {
        self.require_entity(id)?;
        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(id.to_string());
        let mut queue: VecDeque<(EntityId, u32)> = VecDeque::new();
        queue.push_back((id.to_string(), 0));
        let mut found = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for neighbor in self.neighbor_ids(&current)? {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                // Endpoints can outlive a racing delete; skip quietly.
                if let Some(entity) = self
                    .store
                    .get_entity(&neighbor)
                    .map_err(|e| EngineError::dependency("graph lookup", e))?
                {
                    found.push((entity, depth + 1));
                }
                queue.push_back((neighbor, depth + 1));
            }
        }
        Ok(found)
    }

    pub fn connected_entities(&self, id: &str, max_depth: u32) -> Result<Vec<Entity>> {
        Ok(self
            .connected_with_depth(id, max_depth)?
            .into_iter()
            .map(|(entity, _)| entity)
            .collect())
    }

    /// The subgraph induced by everything within `max_depth` hops of `id`:
    /// those entities plus every relationship whose endpoints are both in
    /// the set.
    pub fn subgraph(&self, id: &str, max_depth: u32) -> Result<(Vec<Entity>, Vec<Relationship>)> {
        let start = self.require_entity(id)?;
        let mut entities = vec![start];
        entities.extend(
            self.connected_with_depth(id, max_depth)?
                .into_iter()
                .map(|(entity, _)| entity),
        );
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut relationships = Vec::new();
        for entity in &entities {
            for rel in self
                .store
                .relationships_for(&entity.id)
                .map_err(|e| EngineError::dependency("graph lookup", e))?
            {
                if ids.contains(rel.source_entity_id.as_str())
                    && ids.contains(rel.target_entity_id.as_str())
                    && seen.insert(rel.key())
                {
                    relationships.push(rel);
                }
            }
        }
        relationships.sort_by_key(|r| r.key());
        Ok((entities, relationships))
    }

    /// Shortest path between two entities as a full entity sequence, or
    /// `None` when no path exists within `max_depth` hops. With multiple
    /// shortest paths the lexicographically smallest id sequence wins.
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_depth: u32,
    ) -> Result<Option<Vec<Entity>>> {
        let start = self.require_entity(from)?;
        self.require_entity(to)?;
        if from == to {
            return Ok(Some(vec![start]));
        }

        let mut parent: HashMap<EntityId, EntityId> = HashMap::new();
        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(from.to_string());
        let mut queue: VecDeque<(EntityId, u32)> = VecDeque::new();
        queue.push_back((from.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for neighbor in self.neighbor_ids(&current)? {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                parent.insert(neighbor.clone(), current.clone());
                if neighbor == to {
                    let mut ids = vec![neighbor];
                    while let Some(prev) = parent.get(ids.last().map(String::as_str).unwrap_or("")) {
                        ids.push(prev.clone());
                    }
                    ids.reverse();
                    let mut path = Vec::with_capacity(ids.len());
                    for id in ids {
                        path.push(self.require_entity(&id)?);
                    }
                    return Ok(Some(path));
                }
                queue.push_back((neighbor, depth + 1));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::InMemoryGraphStore;
    use crate::types::EntityType;

    fn build() -> (GraphTraversal, Arc<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::new());
        (GraphTraversal::new(store.clone()), store)
    }

    fn add_entity(store: &InMemoryGraphStore, id: &str) {
        let mut entity = Entity::new(id.to_uppercase(), EntityType::Concept, 100);
        entity.id = id.to_string();
        store.upsert_entities(&[entity]).unwrap();
    }

    fn connect(store: &InMemoryGraphStore, from: &str, to: &str) {
        store
            .upsert_relationships(&[Relationship::new(from, to, "related_to", 0.9, 100)])
            .unwrap();
    }

    /// a - b - c - d, plus a - e.
    fn chain() -> (GraphTraversal, Arc<InMemoryGraphStore>) {
        let (traversal, store) = build();
        for id in ["a", "b", "c", "d", "e"] {
            add_entity(&store, id);
        }
        connect(&store, "a", "b");
        connect(&store, "b", "c");
        connect(&store, "c", "d");
        connect(&store, "a", "e");
        (traversal, store)
    }

    #[test]
    fn connected_respects_depth_bound() {
        let (traversal, _store) = chain();
        let depth1: Vec<String> = traversal
            .connected_entities("a", 1)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(depth1, vec!["b", "e"]);

        let depth2: Vec<String> = traversal
            .connected_entities("a", 2)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(depth2, vec!["b", "e", "c"]);

        assert!(traversal.connected_entities("a", 0).unwrap().is_empty());
    }

    #[test]
    fn connected_reports_hop_distances() {
        let (traversal, _store) = chain();
        let with_depth = traversal.connected_with_depth("a", 3).unwrap();
        let by_id: HashMap<String, u32> = with_depth
            .into_iter()
            .map(|(e, d)| (e.id, d))
            .collect();
        assert_eq!(by_id["b"], 1);
        assert_eq!(by_id["e"], 1);
        assert_eq!(by_id["c"], 2);
        assert_eq!(by_id["d"], 3);
    }

    #[test]
    fn traversal_is_undirected() {
        let (traversal, _store) = chain();
        let from_d: Vec<String> = traversal
            .connected_entities("d", 1)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(from_d, vec!["c"]);
    }

    #[test]
    fn missing_start_is_not_found() {
        let (traversal, _store) = build();
        assert!(matches!(
            traversal.connected_entities("nope", 2),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn subgraph_is_induced() {
        let (traversal, store) = chain();
        // Extra edge between two depth-1 neighbors must appear even though
        // BFS never walks it.
        connect(&store, "b", "e");
        let (entities, relationships) = traversal.subgraph("a", 1).unwrap();
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "e"]);
        let keys: Vec<(String, String, String)> =
            relationships.iter().map(|r| r.key()).collect();
        assert!(keys.contains(&("a".into(), "b".into(), "related_to".into())));
        assert!(keys.contains(&("a".into(), "e".into(), "related_to".into())));
        assert!(keys.contains(&("b".into(), "e".into(), "related_to".into())));
        // c-d edges are outside the induced set.
        assert_eq!(relationships.len(), 3);
    }

    #[test]
    fn shortest_path_is_optimal() {
        let (traversal, store) = chain();
        // Long way around: a - x - y - d.
        for id in ["x", "y"] {
            add_entity(&store, id);
        }
        connect(&store, "a", "x");
        connect(&store, "x", "y");
        connect(&store, "y", "d");

        let path: Vec<String> = traversal
            .shortest_path("a", "d", 5)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(path, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn shortest_path_depth_bound_and_absence() {
        let (traversal, _store) = chain();
        assert!(traversal.shortest_path("a", "d", 2).unwrap().is_none());

        let (isolated, store) = build();
        add_entity(&store, "a");
        add_entity(&store, "z");
        assert!(isolated.shortest_path("a", "z", 5).unwrap().is_none());
    }

    #[test]
    fn shortest_path_to_self_is_singleton() {
        let (traversal, _store) = chain();
        let path = traversal.shortest_path("a", "a", 5).unwrap().unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].id, "a");
    }
}
