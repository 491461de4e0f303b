//! Embedded reference backends.
//!
//! In-memory implementations of every collaborator trait, plus a
//! deterministic token-hashing embedder and a rule-based extractor. These
//! back the embedded storage mode and the test suite; they are not meant
//! as production persistence.

use crate::backends::{
    cosine_similarity, fnv1a, DocumentStore, EmbeddingProvider, EntityCandidate,
    ExtractionProvider, GraphStore, MemoryStore, RelationshipDraft, VectorHit, VectorStore,
};
use crate::types::{
    Document, DocumentChunk, DocumentStatus, Entity, EntityId, EntityType, FactClaim, Memory,
    MemoryType, Relationship, ResultOrigin,
};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::RwLock;

type RelKey = (String, String, String);

#[derive(Default)]
struct GraphInner {
    entities: HashMap<EntityId, Entity>,
    relationships: HashMap<RelKey, Relationship>,
}

/// In-memory graph store. All mutation goes through one `RwLock`, which is
/// what makes `commit_merge` atomic with respect to readers.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn upsert_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("graph lock poisoned"))?;
        for entity in entities {
            inner.entities.insert(entity.id.clone(), entity.clone());
        }
        Ok(())
    }

    fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("graph lock poisoned"))?;
        for rel in relationships {
            let key = rel.key();
            let mut stored = rel.clone();
            if let Some(existing) = inner.relationships.get(&key) {
                stored.created_at = existing.created_at;
            }
            inner.relationships.insert(key, stored);
        }
        Ok(())
    }

    fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let inner = self.inner.read().map_err(|_| anyhow!("graph lock poisoned"))?;
        Ok(inner.entities.get(id).cloned())
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        let needle = name.trim().to_lowercase();
        let inner = self.inner.read().map_err(|_| anyhow!("graph lock poisoned"))?;
        let mut hits: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| {
                e.name.to_lowercase() == needle
                    || e.aliases.iter().any(|a| a.to_lowercase() == needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    fn relationships_for(&self, id: &str) -> Result<Vec<Relationship>> {
        let inner = self.inner.read().map_err(|_| anyhow!("graph lock poisoned"))?;
        let mut rels: Vec<Relationship> = inner
            .relationships
            .values()
            .filter(|r| r.source_entity_id == id || r.target_entity_id == id)
            .cloned()
            .collect();
        rels.sort_by_key(|r| r.key());
        Ok(rels)
    }

    fn all_entities(&self) -> Result<Vec<Entity>> {
        let inner = self.inner.read().map_err(|_| anyhow!("graph lock poisoned"))?;
        let mut all: Vec<Entity> = inner.entities.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let inner = self.inner.read().map_err(|_| anyhow!("graph lock poisoned"))?;
        let mut all: Vec<Relationship> = inner.relationships.values().cloned().collect();
        all.sort_by_key(|r| r.key());
        Ok(all)
    }

    fn delete_entities(&self, ids: &[EntityId]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("graph lock poisoned"))?;
        for id in ids {
            inner.entities.remove(id);
        }
        inner
            .relationships
            .retain(|_, r| !ids.contains(&r.source_entity_id) && !ids.contains(&r.target_entity_id));
        Ok(())
    }

    fn commit_merge(
        &self,
        primary: &Entity,
        removed: &[EntityId],
        rewritten: &[Relationship],
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("graph lock poisoned"))?;
        inner
            .relationships
            .retain(|_, r| {
                !removed.contains(&r.source_entity_id) && !removed.contains(&r.target_entity_id)
            });
        for id in removed {
            inner.entities.remove(id);
        }
        for rel in rewritten {
            inner.relationships.insert(rel.key(), rel.clone());
        }
        inner.entities.insert(primary.id.clone(), primary.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct VectorRecord {
    embedding: Vec<f32>,
    content: String,
    origin: ResultOrigin,
    user_id: String,
    timestamp: u64,
    weight: u64,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn index_memory(&self, memory: &Memory) -> Result<()> {
        if memory.embedding.is_empty() {
            bail!("memory {} has no embedding", memory.id);
        }
        let mut metadata = memory.metadata.clone();
        metadata.insert(
            "memory_type".to_string(),
            format!("{:?}", memory.memory_type).to_lowercase(),
        );
        let record = VectorRecord {
            embedding: memory.embedding.clone(),
            content: memory.content.clone(),
            origin: ResultOrigin::Memory,
            user_id: memory.user_id.clone(),
            timestamp: memory.created_at,
            weight: memory.access_count,
            metadata,
        };
        self.records
            .write()
            .map_err(|_| anyhow!("vector lock poisoned"))?
            .insert(memory.id.clone(), record);
        Ok(())
    }

    fn index_chunk(&self, chunk: &DocumentChunk, user_id: &str) -> Result<()> {
        if chunk.embedding.is_empty() {
            bail!("chunk {} has no embedding", chunk.id);
        }
        let mut metadata = HashMap::new();
        metadata.insert("document_id".to_string(), chunk.document_id.clone());
        metadata.insert("chunk_index".to_string(), chunk.chunk_index.to_string());
        let record = VectorRecord {
            embedding: chunk.embedding.clone(),
            content: chunk.content.clone(),
            origin: ResultOrigin::Chunk,
            user_id: user_id.to_string(),
            timestamp: chunk.created_at,
            weight: 0,
            metadata,
        };
        self.records
            .write()
            .map_err(|_| anyhow!("vector lock poisoned"))?
            .insert(chunk.id.clone(), record);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        top_k: usize,
        min_score: f32,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<VectorHit>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("vector lock poisoned"))?;
        let mut hits: Vec<VectorHit> = records
            .iter()
            .filter(|(_, r)| user_id.map_or(true, |u| r.user_id == u))
            .filter(|(_, r)| {
                filters
                    .iter()
                    .all(|(k, v)| r.metadata.get(k).map_or(false, |rv| rv == v))
            })
            .filter_map(|(id, r)| {
                let score = cosine_similarity(query, &r.embedding);
                if score >= min_score {
                    Some(VectorHit {
                        id: id.clone(),
                        score,
                        content: r.content.clone(),
                        origin: r.origin,
                        user_id: r.user_id.clone(),
                        timestamp: r.timestamp,
                        weight: r.weight,
                        metadata: r.metadata.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("vector lock poisoned"))?;
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }

    fn count(&self, user_id: Option<&str>) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("vector lock poisoned"))?;
        Ok(records
            .values()
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .count())
    }
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    memories: RwLock<HashMap<String, Memory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn add(&self, memory: &Memory) -> Result<()> {
        self.memories
            .write()
            .map_err(|_| anyhow!("memory lock poisoned"))?
            .insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let memories = self
            .memories
            .read()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        Ok(memories.get(id).cloned())
    }

    fn update(&self, memory: &Memory) -> Result<()> {
        let mut memories = self
            .memories
            .write()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        if !memories.contains_key(&memory.id) {
            bail!("memory {} does not exist", memory.id);
        }
        memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let mut memories = self
            .memories
            .write()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        for id in ids {
            memories.remove(id);
        }
        Ok(())
    }

    fn list_by_user(
        &self,
        user_id: &str,
        memory_type: Option<MemoryType>,
        limit: Option<usize>,
    ) -> Result<Vec<Memory>> {
        let memories = self
            .memories
            .read()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        let mut list: Vec<Memory> = memories
            .values()
            .filter(|m| m.user_id == user_id)
            .filter(|m| memory_type.map_or(true, |t| m.memory_type == t))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    fn count(&self, user_id: Option<&str>) -> Result<usize> {
        let memories = self
            .memories
            .read()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        Ok(memories
            .values()
            .filter(|m| user_id.map_or(true, |u| m.user_id == u))
            .count())
    }
}

#[derive(Default)]
struct DocumentInner {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Vec<DocumentChunk>>,
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<DocumentInner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn add(&self, document: &Document) -> Result<()> {
        self.inner
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Document>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        Ok(inner.documents.get(id).cloned())
    }

    fn update_status(&self, id: &str, status: DocumentStatus, now: u64) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        let document = inner
            .documents
            .get_mut(id)
            .ok_or_else(|| anyhow!("document {id} does not exist"))?;
        if !document.status.can_transition_to(status) {
            bail!(
                "illegal document status transition {:?} -> {:?}",
                document.status,
                status
            );
        }
        document.status = status;
        document.updated_at = Some(now);
        Ok(())
    }

    fn set_chunk_count(&self, id: &str, chunk_count: usize) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        let document = inner
            .documents
            .get_mut(id)
            .ok_or_else(|| anyhow!("document {id} does not exist"))?;
        document.chunk_count = chunk_count;
        Ok(())
    }

    fn add_chunk(&self, chunk: &DocumentChunk) -> Result<()> {
        self.inner
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?
            .chunks
            .entry(chunk.document_id.clone())
            .or_default()
            .push(chunk.clone());
        Ok(())
    }

    fn chunks_for(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        let mut chunks = inner.chunks.get(document_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    fn list_by_user(
        &self,
        user_id: &str,
        status: Option<DocumentStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        let mut list: Vec<Document> = inner
            .documents
            .values()
            .filter(|d| d.user_id == user_id)
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            list.truncate(limit);
        }
        Ok(list)
    }
}

/// Deterministic bag-of-words embedder: each token hashes into one of
/// `dimensions` buckets, the vector is L2-normalized. Texts sharing tokens
/// get positive cosine similarity, which is enough for the embedded mode
/// and for exercising retrieval-dependent logic offline.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "from", "he", "her", "his", "in", "is",
    "it", "its", "of", "on", "or", "she", "that", "the", "their", "they", "this", "to", "was",
    "we", "with",
];

/// Relation patterns the rule-based extractor understands, checked in order.
/// `"<subject> is the capital of <object>"` style phrases become claims with
/// a normalized predicate.
const INFIX_PATTERNS: &[(&str, &str)] = &[
    (" is located in ", "located_in"),
    (" lives in ", "lives_in"),
    (" works at ", "works_at"),
    (" works for ", "works_at"),
    (" was founded by ", "founded_by"),
];

/// Rule-based extractor for the embedded mode: claims come from a small set
/// of copula patterns, entities from claim endpoints plus capitalized spans.
#[derive(Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn strip_edges(raw: &str) -> &str {
    raw.trim()
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .trim()
}

fn strip_article(raw: &str) -> &str {
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = raw.strip_prefix(article) {
            return rest;
        }
    }
    raw
}

fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn claim_from_sentence(sentence: &str) -> Option<FactClaim> {
    // "<subject> is the <role> of <object>"
    if let Some(pos) = sentence.find(" is the ") {
        let subject = strip_edges(&sentence[..pos]);
        let rest = &sentence[pos + " is the ".len()..];
        if let Some(of_pos) = rest.find(" of ") {
            let role = strip_edges(&rest[..of_pos]).to_lowercase().replace(' ', "_");
            let object = strip_edges(strip_article(&rest[of_pos + " of ".len()..]));
            if !subject.is_empty() && !role.is_empty() && !object.is_empty() {
                return Some(FactClaim {
                    subject: subject.to_string(),
                    predicate: format!("{role}_of"),
                    object: object.to_string(),
                    confidence: 0.8,
                });
            }
        }
    }
    for (infix, predicate) in INFIX_PATTERNS {
        if let Some(pos) = sentence.find(infix) {
            let subject = strip_edges(&sentence[..pos]);
            let object = strip_edges(strip_article(&sentence[pos + infix.len()..]));
            if !subject.is_empty() && !object.is_empty() {
                return Some(FactClaim {
                    subject: subject.to_string(),
                    predicate: (*predicate).to_string(),
                    object: object.to_string(),
                    confidence: 0.8,
                });
            }
        }
    }
    // Bare copula, low confidence.
    if let Some(pos) = sentence.find(" is ") {
        let subject = strip_edges(&sentence[..pos]);
        let object = strip_edges(strip_article(&sentence[pos + " is ".len()..]));
        if !subject.is_empty() && !object.is_empty() {
            return Some(FactClaim {
                subject: subject.to_string(),
                predicate: "is".to_string(),
                object: object.to_string(),
                confidence: 0.5,
            });
        }
    }
    None
}

fn entity_type_for(name: &str, claims: &[FactClaim]) -> EntityType {
    let lower = name.to_lowercase();
    for claim in claims {
        let is_subject = claim.subject.to_lowercase() == lower;
        let is_object = claim.object.to_lowercase() == lower;
        match claim.predicate.as_str() {
            "capital_of" | "located_in" => {
                if is_subject || is_object {
                    return EntityType::Location;
                }
            }
            "lives_in" => {
                if is_subject {
                    return EntityType::Person;
                }
                if is_object {
                    return EntityType::Location;
                }
            }
            "works_at" => {
                if is_subject {
                    return EntityType::Person;
                }
                if is_object {
                    return EntityType::Organization;
                }
            }
            "founded_by" => {
                if is_object {
                    return EntityType::Person;
                }
                if is_subject {
                    return EntityType::Organization;
                }
            }
            _ => {}
        }
    }
    EntityType::Other
}

fn capitalized_spans(sentence: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in sentence.split_whitespace() {
        let cleaned = strip_edges(word);
        let is_cap = cleaned
            .chars()
            .next()
            .map_or(false, |c| c.is_uppercase())
            && !STOPWORDS.contains(&cleaned.to_lowercase().as_str());
        if is_cap {
            current.push(cleaned);
        } else if !current.is_empty() {
            spans.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        spans.push(current.join(" "));
    }
    spans
}

impl ExtractionProvider for PatternExtractor {
    fn extract_entities(&self, text: &str) -> Result<Vec<EntityCandidate>> {
        let claims = self.extract_claims(text)?;
        let mut seen: HashMap<String, EntityCandidate> = HashMap::new();
        for claim in &claims {
            for name in [&claim.subject, &claim.object] {
                let key = name.to_lowercase();
                seen.entry(key).or_insert_with(|| EntityCandidate {
                    name: name.clone(),
                    entity_type: entity_type_for(name, &claims),
                    aliases: Vec::new(),
                    confidence: 0.8,
                    context: None,
                });
            }
        }
        for sentence in sentences(text) {
            for span in capitalized_spans(sentence) {
                let key = span.to_lowercase();
                seen.entry(key).or_insert_with(|| EntityCandidate {
                    name: span.clone(),
                    entity_type: entity_type_for(&span, &claims),
                    aliases: Vec::new(),
                    confidence: 0.7,
                    context: Some(sentence.to_string()),
                });
            }
        }
        let mut candidates: Vec<EntityCandidate> = seen.into_values().collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }

    fn extract_relationships(
        &self,
        text: &str,
        entities: &[EntityCandidate],
    ) -> Result<Vec<RelationshipDraft>> {
        let known: Vec<String> = entities.iter().map(|e| e.name.to_lowercase()).collect();
        let mut drafts = Vec::new();
        for sentence in sentences(text) {
            if let Some(claim) = claim_from_sentence(sentence) {
                if claim.predicate == "is" {
                    continue;
                }
                if known.contains(&claim.subject.to_lowercase())
                    && known.contains(&claim.object.to_lowercase())
                {
                    drafts.push(RelationshipDraft {
                        source_name: claim.subject,
                        target_name: claim.object,
                        relation_type: claim.predicate,
                        confidence: claim.confidence,
                        context: Some(sentence.to_string()),
                    });
                }
            }
        }
        Ok(drafts)
    }

    fn extract_claims(&self, text: &str) -> Result<Vec<FactClaim>> {
        Ok(sentences(text)
            .into_iter()
            .filter_map(claim_from_sentence)
            .collect())
    }
}
