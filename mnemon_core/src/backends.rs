//! Pluggable collaborator interfaces.
//!
//! The engine reaches every external concern (graph storage, vector storage,
//! memory/document persistence, embedding, extraction) through object-safe
//! `Send + Sync` traits held in a [`BackendRegistry`]. Implementations
//! return `anyhow::Result`; the engine wraps failures into its own error
//! taxonomy at component boundaries.

use crate::types::{
    Document, DocumentChunk, DocumentStatus, Entity, EntityId, EntityType, FactClaim, Memory,
    MemoryType, Relationship, ResultOrigin,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// One hit from a vector similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub origin: ResultOrigin,
    pub user_id: String,
    pub timestamp: u64,
    /// Access count for memories (0 for chunks); used as a fusion tie-break.
    pub weight: u64,
    pub metadata: HashMap<String, String>,
}

/// Knowledge-graph storage. `commit_merge` must apply its three phases
/// under one write lock so concurrent readers never observe a dangling
/// relationship endpoint.
pub trait GraphStore: Send + Sync {
    fn upsert_entities(&self, entities: &[Entity]) -> Result<()>;
    fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()>;
    fn get_entity(&self, id: &str) -> Result<Option<Entity>>;
    /// Case-insensitive match against entity names and aliases.
    fn find_by_name(&self, name: &str) -> Result<Vec<Entity>>;
    /// All relationships with `id` as either endpoint.
    fn relationships_for(&self, id: &str) -> Result<Vec<Relationship>>;
    fn all_entities(&self) -> Result<Vec<Entity>>;
    fn all_relationships(&self) -> Result<Vec<Relationship>>;
    fn delete_entities(&self, ids: &[EntityId]) -> Result<()>;
    fn commit_merge(
        &self,
        primary: &Entity,
        removed: &[EntityId],
        rewritten: &[Relationship],
    ) -> Result<()>;
}

pub trait VectorStore: Send + Sync {
    fn index_memory(&self, memory: &Memory) -> Result<()>;
    fn index_chunk(&self, chunk: &DocumentChunk, user_id: &str) -> Result<()>;
    /// Returns hits with cosine score >= `min_score`, best first. `filters`
    /// entries must all match the hit's metadata.
    fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        top_k: usize,
        min_score: f32,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<VectorHit>>;
    fn delete(&self, ids: &[String]) -> Result<()>;
    fn count(&self, user_id: Option<&str>) -> Result<usize>;
}

pub trait MemoryStore: Send + Sync {
    fn add(&self, memory: &Memory) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Memory>>;
    fn update(&self, memory: &Memory) -> Result<()>;
    fn delete(&self, ids: &[String]) -> Result<()>;
    fn list_by_user(
        &self,
        user_id: &str,
        memory_type: Option<MemoryType>,
        limit: Option<usize>,
    ) -> Result<Vec<Memory>>;
    fn count(&self, user_id: Option<&str>) -> Result<usize>;
}

pub trait DocumentStore: Send + Sync {
    fn add(&self, document: &Document) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Document>>;
    /// Must reject transitions `DocumentStatus::can_transition_to` forbids.
    fn update_status(&self, id: &str, status: DocumentStatus, now: u64) -> Result<()>;
    fn set_chunk_count(&self, id: &str, chunk_count: usize) -> Result<()>;
    fn add_chunk(&self, chunk: &DocumentChunk) -> Result<()>;
    fn chunks_for(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;
    fn list_by_user(
        &self,
        user_id: &str,
        status: Option<DocumentStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>>;
}

pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
    fn dimensions(&self) -> usize;
}

/// Candidate entity produced by extraction; ids are assigned by the
/// GraphIndex after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    pub confidence: f32,
    pub context: Option<String>,
}

/// Relationship draft keyed by entity names; the orchestrator maps names
/// to ids once candidates are upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDraft {
    pub source_name: String,
    pub target_name: String,
    pub relation_type: String,
    pub confidence: f32,
    pub context: Option<String>,
}

pub trait ExtractionProvider: Send + Sync {
    fn extract_entities(&self, text: &str) -> Result<Vec<EntityCandidate>>;
    fn extract_relationships(
        &self,
        text: &str,
        entities: &[EntityCandidate],
    ) -> Result<Vec<RelationshipDraft>>;
    fn extract_claims(&self, text: &str) -> Result<Vec<FactClaim>>;
    fn chunk_text(&self, text: &str, max_chars: usize) -> Vec<String> {
        chunk_text(text, max_chars)
    }
}

/// All collaborators the engine needs, wired once at startup.
#[derive(Clone)]
pub struct BackendRegistry {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    memories: Arc<dyn MemoryStore>,
    documents: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Option<Arc<dyn ExtractionProvider>>,
}

impl BackendRegistry {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        memories: Arc<dyn MemoryStore>,
        documents: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            graph,
            vector,
            memories,
            documents,
            embedder,
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ExtractionProvider>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn vector(&self) -> &Arc<dyn VectorStore> {
        &self.vector
    }

    pub fn memories(&self) -> &Arc<dyn MemoryStore> {
        &self.memories
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn extractor(&self) -> Option<&Arc<dyn ExtractionProvider>> {
        self.extractor.as_ref()
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// FNV-1a; stable across processes, unlike the std hasher.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Paragraph-first chunker: splits on blank lines, then greedily packs
/// sentences up to `max_chars`. An over-long sentence becomes its own chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        for sentence in split_sentences(paragraph) {
            if !current.is_empty() && current.len() + sentence.len() + 1 > max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
    }
    chunks
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = paragraph.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && bytes.get(i + 1).map_or(true, |&n| n == b' ' || n == b'\n')
        {
            let piece = paragraph[start..=i].trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            start = i + 1;
        }
    }
    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
