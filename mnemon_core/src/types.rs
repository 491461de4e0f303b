//! Core domain types for the Mnemon engine.
//!
//! All types are serde-serializable and deliberately wire-agnostic: nothing
//! here assumes a particular storage engine or transport. Timestamps are
//! unix seconds (`u64`); identifiers are opaque strings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub type EntityId = String;
pub type MemoryId = String;
pub type DocumentId = String;
pub type ChunkId = String;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Free-form property value attached to entities and query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
    Map(HashMap<String, PropertyValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Concept,
    Product,
    Technology,
    Other,
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
    /// Empty when the entity carries no embedding; otherwise must match the
    /// configured dimensionality.
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub mention_count: u64,
    #[serde(default)]
    pub source_document_id: Option<DocumentId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, now: u64) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            entity_type,
            description: None,
            properties: HashMap::new(),
            embedding: Vec::new(),
            aliases: Vec::new(),
            mention_count: 1,
            source_document_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A directed edge between two entities, keyed by
/// (source, target, relation_type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub relation_type: String,
    pub confidence: f32,
    #[serde(default)]
    pub extracted_context: Option<String>,
    #[serde(default)]
    pub source_document_id: Option<DocumentId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
        confidence: f32,
        now: u64,
    ) -> Self {
        Self {
            source_entity_id: source.into(),
            target_entity_id: target.into(),
            relation_type: relation_type.into(),
            confidence,
            extracted_context: None,
            source_document_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Natural key: a second upsert with the same key updates in place.
    pub fn key(&self) -> (String, String, String) {
        (
            self.source_entity_id.clone(),
            self.target_entity_id.clone(),
            self.relation_type.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Working,
    Episodic,
    Factual,
    Semantic,
}

impl MemoryType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "working" => Some(Self::Working),
            "episodic" => Some(Self::Episodic),
            "factual" => Some(Self::Factual),
            "semantic" => Some(Self::Semantic),
            _ => None,
        }
    }
}

/// A stored memory item owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Importance in [0, 1]; feeds grounding confidence weighting and
    /// consolidation representative selection.
    pub importance: f32,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub last_accessed_at: Option<u64>,
    /// Only `MemoryType::Working` memories may expire.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl Memory {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
        now: u64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            content: content.into(),
            memory_type,
            embedding: Vec::new(),
            importance: 0.5,
            access_count: 0,
            metadata: HashMap::new(),
            tags: Vec::new(),
            created_at: now,
            updated_at: None,
            last_accessed_at: None,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    /// Status moves forward only: Pending → Processing → {Indexed | Failed}.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Indexed) | (Processing, Failed) | (Pending, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source_uri: Option<String>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub extracted_entity_ids: Vec<EntityId>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Semantic,
    Graph,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub query: String,
    pub query_type: QueryType,
    pub top_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub memory_types: Option<Vec<MemoryType>>,
    #[serde(default)]
    pub filters: HashMap<String, String>,
    #[serde(default)]
    pub include_relationships: bool,
    /// Run grounding over the result set and attach evidence/confidence.
    #[serde(default)]
    pub include_grounding: bool,
}

impl QueryRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            query_type: QueryType::Hybrid,
            top_k: 10,
            min_score: None,
            memory_types: None,
            filters: HashMap::new(),
            include_relationships: false,
            include_grounding: false,
        }
    }
}

/// Where a query result item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Memory,
    Entity,
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedItem {
    pub id: EntityId,
    pub name: String,
    pub relation_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultItem {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub origin: ResultOrigin,
    #[serde(default)]
    pub metadata: HashMap<String, PropertyValue>,
    #[serde(default)]
    pub related: Vec<RelatedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub items: Vec<QueryResultItem>,
    pub total_count: usize,
    pub execution_time: Duration,
    #[serde(default)]
    pub grounding: Option<GroundingResult>,
}

/// A structured claim extracted from text, used for contradiction checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactClaim {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Id of the supporting memory or chunk.
    pub source: String,
    pub content: String,
    pub relevance: f32,
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub conflicting_statement: String,
    pub source: String,
    pub conflict_score: f32,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    pub is_grounded: bool,
    pub confidence: f32,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWorkflowResult {
    pub memory_id: MemoryId,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub is_grounded: bool,
    pub confidence: f32,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentWorkflowResult {
    pub document_id: DocumentId,
    pub chunks_created: usize,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub vectors_indexed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationWorkflowResult {
    pub memories_consolidated: usize,
    pub duplicates_removed: usize,
    pub entities_merged: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthStatus {
    pub is_healthy: bool,
    /// Per-collaborator health, keyed by collaborator name. BTreeMap keeps
    /// reporting order stable.
    pub services: BTreeMap<String, bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_roundtrip_bincode() {
        let mut entity = Entity::new("Paris", EntityType::Location, 1_700_000_000);
        entity.id = "ent-000001".to_string();
        entity.aliases = vec!["City of Light".to_string()];
        entity.embedding = vec![0.1, 0.2, 0.3];
        entity
            .properties
            .insert("population".to_string(), PropertyValue::Number(2_102_650.0));

        let bytes = bincode::serialize(&entity).unwrap();
        let back: Entity = bincode::deserialize(&bytes).unwrap();
        assert_eq!(entity, back);
    }

    #[test]
    fn nested_property_value_roundtrip() {
        let mut inner = HashMap::new();
        inner.insert("lat".to_string(), PropertyValue::Number(48.85));
        inner.insert("capital".to_string(), PropertyValue::Bool(true));
        let value = PropertyValue::Map(inner);

        let json = serde_json::to_string(&value).unwrap();
        let back: PropertyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn relationship_key_is_endpoint_and_type() {
        let a = Relationship::new("ent-1", "ent-2", "capital_of", 0.9, 10);
        let mut b = a.clone();
        b.confidence = 0.4;
        assert_eq!(a.key(), b.key());

        let c = Relationship::new("ent-1", "ent-2", "located_in", 0.9, 10);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn document_status_moves_forward_only() {
        use DocumentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Indexed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Indexed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Indexed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn working_memory_expiry() {
        let mut memory = Memory::new("mem-1", "u1", "scratch", MemoryType::Working, 100);
        memory.expires_at = Some(200);
        assert!(!memory.is_expired(150));
        assert!(memory.is_expired(200));
        assert!(memory.is_expired(300));

        let forever = Memory::new("mem-2", "u1", "fact", MemoryType::Factual, 100);
        assert!(!forever.is_expired(u64::MAX));
    }

    #[test]
    fn memory_type_parse() {
        assert_eq!(MemoryType::parse("Working"), Some(MemoryType::Working));
        assert_eq!(MemoryType::parse("SEMANTIC"), Some(MemoryType::Semantic));
        assert_eq!(MemoryType::parse("junk"), None);
    }

    #[test]
    fn workflow_results_roundtrip() {
        let result = MemoryWorkflowResult {
            memory_id: "mem-9".to_string(),
            entities_extracted: 3,
            relationships_created: 2,
            is_grounded: true,
            confidence: 0.83,
            duration: Duration::from_millis(42),
        };
        let bytes = bincode::serialize(&result).unwrap();
        let back: MemoryWorkflowResult = bincode::deserialize(&bytes).unwrap();
        assert_eq!(result, back);
    }
}
