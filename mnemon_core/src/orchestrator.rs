//! Workflow orchestration.
//!
//! Four workflows (query, add-memory, document indexing, consolidation)
//! plus a health probe. Each workflow declares its steps as required or
//! optional: a required failure surfaces `EngineError::Dependency`, an
//! optional failure is logged and degrades the result. Every workflow runs
//! under a per-request deadline and honors a [`CancelToken`].

use crate::backends::{
    chunk_text, BackendRegistry, DocumentStore as _, EmbeddingProvider as _, EntityCandidate,
    ExtractionProvider as _, GraphStore as _, MemoryStore as _, VectorHit, VectorStore as _,
};
use crate::consolidation::ConsolidationEngine;
use crate::error::{EngineError, Result};
use crate::graph_index::GraphIndex;
use crate::grounding::GroundingEngine;
use crate::hybrid::HybridRanker;
use crate::retrieval::VectorRetriever;
use crate::traversal::GraphTraversal;
use crate::types::{
    unix_now, ConsolidationWorkflowResult, Document, DocumentChunk, DocumentStatus,
    DocumentWorkflowResult, Entity, GroundingResult, Memory, MemoryType, MemoryWorkflowResult,
    PropertyValue, QueryRequest, QueryResult, QueryResultItem, QueryType, RelatedItem,
    Relationship, ResultOrigin, ServiceHealthStatus,
};
use mnemon_config::MnemonConfig;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Request-scoped cancellation, built on a watch channel. Cloning shares
/// the underlying flag; any clone can cancel all of them.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` is called; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    graph: Arc<GraphIndex>,
    traversal: Arc<GraphTraversal>,
    retriever: Arc<VectorRetriever>,
    ranker: HybridRanker,
    grounding: Arc<GroundingEngine>,
    consolidation: Arc<ConsolidationEngine>,
    config: MnemonConfig,
    next_memory_id: Mutex<u64>,
    next_document_id: Mutex<u64>,
}

impl Orchestrator {
    pub fn new(registry: Arc<BackendRegistry>, config: MnemonConfig) -> Self {
        let dimensions = config.embedding.dimensions;
        let graph = Arc::new(GraphIndex::new(
            registry.graph().clone(),
            config.graph.clone(),
            dimensions,
        ));
        let traversal = Arc::new(GraphTraversal::new(registry.graph().clone()));
        let retriever = Arc::new(VectorRetriever::new(registry.vector().clone(), dimensions));
        let ranker = HybridRanker::new(config.retrieval.vector_weight);
        let grounding = Arc::new(GroundingEngine::new(
            retriever.clone(),
            registry.embedder().clone(),
            registry.extractor().cloned(),
            registry.memories().clone(),
            config.grounding.clone(),
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(
            registry.memories().clone(),
            registry.vector().clone(),
            config.consolidation.clone(),
        ));
        Self {
            registry,
            graph,
            traversal,
            retriever,
            ranker,
            grounding,
            consolidation,
            config,
            next_memory_id: Mutex::new(1),
            next_document_id: Mutex::new(1),
        }
    }

    pub fn graph_index(&self) -> &Arc<GraphIndex> {
        &self.graph
    }

    pub fn traversal(&self) -> &Arc<GraphTraversal> {
        &self.traversal
    }

    pub fn grounding_engine(&self) -> &Arc<GroundingEngine> {
        &self.grounding
    }

    fn alloc_memory_id(&self) -> String {
        let mut next = self.next_memory_id.lock().unwrap();
        let id = format!("mem-{:06}", *next);
        *next += 1;
        id
    }

    fn alloc_document_id(&self) -> String {
        let mut next = self.next_document_id.lock().unwrap();
        let id = format!("doc-{:06}", *next);
        *next += 1;
        id
    }

    /// Run a workflow body under the request deadline and cancel token.
    async fn guard<T>(
        &self,
        cancel: &CancelToken,
        body: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let deadline = Duration::from_millis(self.config.workflow.request_timeout_ms);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::cancelled("request cancelled")),
            outcome = tokio::time::timeout(deadline, body) => match outcome {
                Ok(result) => result,
                Err(_) => Err(EngineError::cancelled("request deadline exceeded")),
            },
        }
    }

    // ---- query -----------------------------------------------------------

    pub async fn execute_query_workflow(
        &self,
        request: QueryRequest,
        cancel: &CancelToken,
    ) -> Result<QueryResult> {
        if request.user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        if request.query.trim().is_empty() {
            return Err(EngineError::validation("query must not be empty"));
        }
        if request.top_k == 0 {
            return Err(EngineError::validation("top_k must be greater than zero"));
        }
        let started = Instant::now();
        self.guard(cancel, self.run_query(request, started)).await
    }

    async fn run_query(&self, request: QueryRequest, started: Instant) -> Result<QueryResult> {
        let embedder = self.registry.embedder().clone();
        let query_text = request.query.clone();
        let query_vec = tokio::task::spawn_blocking(move || embedder.embed(&query_text))
            .await
            .map_err(|e| EngineError::dependency("embedding", anyhow::Error::from(e)))?
            .map_err(|e| EngineError::dependency("embedding", e))?;

        let vector_task = {
            let retriever = self.retriever.clone();
            let query_vec = query_vec.clone();
            let request = request.clone();
            let min_score = request
                .min_score
                .unwrap_or(self.config.retrieval.min_score);
            tokio::task::spawn_blocking(move || -> Result<Vec<VectorHit>> {
                if request.query_type == QueryType::Graph {
                    return Ok(Vec::new());
                }
                let mut hits = retriever.search(
                    &query_vec,
                    Some(&request.user_id),
                    request.top_k,
                    min_score,
                    &request.filters,
                )?;
                if let Some(types) = &request.memory_types {
                    let wanted: Vec<String> =
                        types.iter().map(|t| format!("{t:?}").to_lowercase()).collect();
                    hits.retain(|h| {
                        h.origin != ResultOrigin::Memory
                            || h.metadata
                                .get("memory_type")
                                .map_or(false, |t| wanted.contains(t))
                    });
                }
                Ok(hits)
            })
        };

        let graph_task = {
            let graph = self.graph.clone();
            let traversal = self.traversal.clone();
            let extractor = self.registry.extractor().cloned();
            let request = request.clone();
            let max_depth = self.config.retrieval.max_depth;
            tokio::task::spawn_blocking(move || -> Result<Vec<(Entity, u32)>> {
                if request.query_type == QueryType::Semantic {
                    return Ok(Vec::new());
                }
                let mut seeds: Vec<Entity> = Vec::new();
                if let Some(extractor) = &extractor {
                    let candidates = extractor
                        .extract_entities(&request.query)
                        .map_err(|e| EngineError::dependency("entity extraction", e))?;
                    for candidate in candidates {
                        seeds.extend(graph.find_by_name(&candidate.name)?);
                    }
                }
                let mut by_id: HashMap<String, (Entity, u32)> = HashMap::new();
                for seed in seeds {
                    for (entity, depth) in traversal.connected_with_depth(&seed.id, max_depth)? {
                        by_id
                            .entry(entity.id.clone())
                            .and_modify(|(_, d)| *d = (*d).min(depth))
                            .or_insert((entity, depth));
                    }
                    by_id.insert(seed.id.clone(), (seed, 0));
                }
                let mut items: Vec<(Entity, u32)> = by_id.into_values().collect();
                items.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
                Ok(items)
            })
        };

        let (vector_out, graph_out) = tokio::join!(vector_task, graph_task);

        let vector_hits = vector_out
            .map_err(|e| EngineError::dependency("vector search", anyhow::Error::from(e)))??;
        let graph_items = match graph_out {
            Ok(Ok(items)) => items,
            Ok(Err(e)) if request.query_type == QueryType::Hybrid => {
                warn!(error = %e, "graph branch degraded, continuing vector-only");
                Vec::new()
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(EngineError::dependency(
                    "graph traversal",
                    anyhow::Error::from(e),
                ))
            }
        };

        let ranked = self.ranker.fuse(&vector_hits, &graph_items);
        let total_count = ranked.len();
        let mut items: Vec<QueryResultItem> = ranked
            .into_iter()
            .take(request.top_k)
            .map(|r| {
                let mut metadata = HashMap::new();
                metadata.insert(
                    "vector_score".to_string(),
                    PropertyValue::Number(r.vector_score as f64),
                );
                metadata.insert(
                    "graph_proximity".to_string(),
                    PropertyValue::Number(r.graph_proximity as f64),
                );
                QueryResultItem {
                    id: r.id,
                    content: r.content,
                    score: r.final_score,
                    origin: r.origin,
                    metadata,
                    related: Vec::new(),
                }
            })
            .collect();

        if request.include_relationships {
            for item in items.iter_mut().filter(|i| i.origin == ResultOrigin::Entity) {
                match self.related_items(&item.id) {
                    Ok(related) => item.related = related,
                    Err(e) => warn!(entity = %item.id, error = %e, "related-item lookup degraded"),
                }
            }
        }

        let mut result = QueryResult {
            items,
            total_count,
            execution_time: started.elapsed(),
            grounding: None,
        };
        if request.include_grounding {
            let now = unix_now();
            match self
                .grounding
                .ground_query_result(&request.user_id, result.clone(), now)
            {
                Ok(grounded) => result = grounded,
                Err(e) => {
                    warn!(error = %e, "grounding degraded");
                    result.grounding = Some(GroundingResult {
                        is_grounded: false,
                        confidence: 0.0,
                        evidence: Vec::new(),
                        contradictions: Vec::new(),
                        explanation: Some("grounding unavailable".to_string()),
                    });
                }
            }
        }
        info!(
            user = %request.user_id,
            returned = result.items.len(),
            total = result.total_count,
            "query workflow complete"
        );
        Ok(result)
    }

    fn related_items(&self, entity_id: &str) -> Result<Vec<RelatedItem>> {
        let rels = self
            .registry
            .graph()
            .relationships_for(entity_id)
            .map_err(|e| EngineError::dependency("graph lookup", e))?;
        let mut related = Vec::new();
        for rel in rels.into_iter().take(5) {
            let other = if rel.source_entity_id == entity_id {
                rel.target_entity_id.clone()
            } else {
                rel.source_entity_id.clone()
            };
            if let Some(entity) = self
                .registry
                .graph()
                .get_entity(&other)
                .map_err(|e| EngineError::dependency("graph lookup", e))?
            {
                related.push(RelatedItem {
                    id: entity.id,
                    name: entity.name,
                    relation_type: rel.relation_type,
                    confidence: rel.confidence,
                });
            }
        }
        Ok(related)
    }

    // ---- add memory ------------------------------------------------------

    pub async fn execute_add_memory_workflow(
        &self,
        user_id: &str,
        content: &str,
        metadata: HashMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<MemoryWorkflowResult> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(EngineError::validation("content must not be empty"));
        }
        self.guard(cancel, self.run_add_memory(user_id, content, metadata))
            .await
    }

    async fn run_add_memory(
        &self,
        user_id: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MemoryWorkflowResult> {
        let started = Instant::now();
        let now = unix_now();

        let embedder = self.registry.embedder().clone();
        let text = content.to_string();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| EngineError::dependency("embedding", anyhow::Error::from(e)))?
            .map_err(|e| EngineError::dependency("embedding", e))?;

        let memory_type = metadata
            .get("memory_type")
            .and_then(|raw| MemoryType::parse(raw))
            .unwrap_or(MemoryType::Episodic);
        let importance = metadata
            .get("importance")
            .and_then(|raw| raw.parse::<f32>().ok())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5);
        let expires_at = if memory_type == MemoryType::Working {
            metadata
                .get("ttl_secs")
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(|ttl| now + ttl)
        } else {
            None
        };

        let mut memory = Memory::new(self.alloc_memory_id(), user_id, content, memory_type, now);
        memory.importance = importance;
        memory.embedding = embedding;
        memory.metadata = metadata;
        memory.expires_at = expires_at;

        self.registry
            .memories()
            .add(&memory)
            .map_err(|e| EngineError::dependency("memory store", e))?;
        self.registry
            .vector()
            .index_memory(&memory)
            .map_err(|e| EngineError::dependency("vector index", e))?;

        // Optional: graph enrichment.
        let (entities_extracted, relationships_created) =
            match self.enrich_graph(content, None, now) {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(memory = %memory.id, error = %e, "graph enrichment degraded");
                    (0, 0)
                }
            };

        // Optional: grounding.
        let (is_grounded, confidence) =
            match self.grounding.verify_statement(user_id, content, now) {
                Ok(grounding) => (grounding.is_grounded, grounding.confidence),
                Err(e) => {
                    warn!(memory = %memory.id, error = %e, "grounding degraded");
                    (false, 0.0)
                }
            };

        info!(
            memory = %memory.id,
            entities = entities_extracted,
            relationships = relationships_created,
            is_grounded,
            "add-memory workflow complete"
        );
        Ok(MemoryWorkflowResult {
            memory_id: memory.id,
            entities_extracted,
            relationships_created,
            is_grounded,
            confidence,
            duration: started.elapsed(),
        })
    }

    /// Extract entities and relationships from `text` and upsert them.
    /// Returns (entities extracted, relationships created).
    fn enrich_graph(
        &self,
        text: &str,
        source_document_id: Option<&str>,
        now: u64,
    ) -> Result<(usize, usize)> {
        let extractor = match self.registry.extractor() {
            Some(extractor) => extractor,
            None => return Ok((0, 0)),
        };
        let candidates = extractor
            .extract_entities(text)
            .map_err(|e| EngineError::dependency("entity extraction", e))?;
        if candidates.is_empty() {
            return Ok((0, 0));
        }
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        let embeddings = self
            .registry
            .embedder()
            .embed_batch(&names)
            .map_err(|e| EngineError::dependency("embedding", e))?;

        let mut ids_by_name: HashMap<String, String> = HashMap::new();
        for (candidate, embedding) in candidates.iter().zip(embeddings) {
            let mut entity = Entity::new(candidate.name.clone(), candidate.entity_type, now);
            entity.aliases = candidate.aliases.clone();
            entity.embedding = embedding;
            entity.description = candidate.context.clone();
            entity.source_document_id = source_document_id.map(str::to_string);
            let (stored, _created) = self.graph.resolve_or_insert(entity)?;
            ids_by_name.insert(candidate.name.to_lowercase(), stored.id);
        }

        let drafts = extractor
            .extract_relationships(text, &candidates)
            .map_err(|e| EngineError::dependency("relation extraction", e))?;
        let mut created = 0;
        for draft in drafts {
            let (Some(source), Some(target)) = (
                ids_by_name.get(&draft.source_name.to_lowercase()),
                ids_by_name.get(&draft.target_name.to_lowercase()),
            ) else {
                continue;
            };
            let mut rel = Relationship::new(
                source.clone(),
                target.clone(),
                draft.relation_type,
                draft.confidence,
                now,
            );
            rel.extracted_context = draft.context;
            rel.source_document_id = source_document_id.map(str::to_string);
            match self.graph.upsert_relationship(rel) {
                Ok(_) => created += 1,
                Err(e) => debug!(error = %e, "relationship draft skipped"),
            }
        }
        Ok((candidates.len(), created))
    }

    // ---- document indexing -----------------------------------------------

    pub async fn execute_document_indexing_workflow(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        metadata: HashMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<DocumentWorkflowResult> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(EngineError::validation("document content must not be empty"));
        }
        self.guard(
            cancel,
            self.run_document_indexing(user_id, title, content, metadata),
        )
        .await
    }

    async fn run_document_indexing(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<DocumentWorkflowResult> {
        let started = Instant::now();
        let now = unix_now();
        let document = Document {
            id: self.alloc_document_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            source_uri: metadata.get("source_uri").cloned(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            metadata,
            created_at: now,
            updated_at: None,
        };
        self.registry
            .documents()
            .add(&document)
            .map_err(|e| EngineError::dependency("document store", e))?;
        self.registry
            .documents()
            .update_status(&document.id, DocumentStatus::Processing, now)
            .map_err(|e| EngineError::dependency("document store", e))?;

        match self.index_document_chunks(&document, now).await {
            Ok(result) => {
                self.registry
                    .documents()
                    .update_status(&document.id, DocumentStatus::Indexed, unix_now())
                    .map_err(|e| EngineError::dependency("document store", e))?;
                info!(
                    document = %document.id,
                    chunks = result.chunks_created,
                    entities = result.entities_extracted,
                    "document workflow complete"
                );
                Ok(DocumentWorkflowResult {
                    duration: started.elapsed(),
                    ..result
                })
            }
            Err(e) => {
                // Best effort: the failed state must stick even if the
                // status write itself errors.
                if let Err(status_err) = self.registry.documents().update_status(
                    &document.id,
                    DocumentStatus::Failed,
                    unix_now(),
                ) {
                    warn!(document = %document.id, error = %status_err, "failed-status write lost");
                }
                Err(e)
            }
        }
    }

    async fn index_document_chunks(
        &self,
        document: &Document,
        now: u64,
    ) -> Result<DocumentWorkflowResult> {
        let max_chars = self.config.workflow.max_chunk_chars;
        let chunks: Vec<String> = match self.registry.extractor() {
            Some(extractor) => extractor.chunk_text(&document.content, max_chars),
            None => chunk_text(&document.content, max_chars),
        };
        if chunks.is_empty() {
            return Err(EngineError::validation("document produced no chunks"));
        }

        let embedder = self.registry.embedder().clone();
        let chunk_texts = chunks.clone();
        let embeddings = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = chunk_texts.iter().map(String::as_str).collect();
            embedder.embed_batch(&refs)
        })
        .await
        .map_err(|e| EngineError::dependency("embedding", anyhow::Error::from(e)))?
        .map_err(|e| EngineError::dependency("embedding", e))?;

        // Entity extraction runs over the whole document; a document is
        // Indexed only once its entities are committed.
        let (entities_extracted, relationships_created) =
            self.enrich_graph(&document.content, Some(&document.id), now)?;
        let candidates: Vec<EntityCandidate> = match self.registry.extractor() {
            Some(extractor) => extractor
                .extract_entities(&document.content)
                .map_err(|e| EngineError::dependency("entity extraction", e))?,
            None => Vec::new(),
        };

        let mut vectors_indexed = 0;
        for (index, (text, embedding)) in chunks.iter().zip(embeddings).enumerate() {
            let extracted_entity_ids = candidates
                .iter()
                .filter(|c| text.to_lowercase().contains(&c.name.to_lowercase()))
                .filter_map(|c| {
                    self.graph
                        .find_by_name(&c.name)
                        .ok()
                        .and_then(|matches| matches.into_iter().next())
                        .map(|e| e.id)
                })
                .collect();
            let chunk = DocumentChunk {
                id: format!("{}-chunk-{index:04}", document.id),
                document_id: document.id.clone(),
                content: text.clone(),
                chunk_index: index,
                embedding,
                extracted_entity_ids,
                created_at: now,
            };
            self.registry
                .documents()
                .add_chunk(&chunk)
                .map_err(|e| EngineError::dependency("document store", e))?;
            self.registry
                .vector()
                .index_chunk(&chunk, &document.user_id)
                .map_err(|e| EngineError::dependency("vector index", e))?;
            vectors_indexed += 1;
        }
        self.registry
            .documents()
            .set_chunk_count(&document.id, chunks.len())
            .map_err(|e| EngineError::dependency("document store", e))?;

        Ok(DocumentWorkflowResult {
            document_id: document.id.clone(),
            chunks_created: chunks.len(),
            entities_extracted,
            relationships_created,
            vectors_indexed,
            duration: Duration::default(),
        })
    }

    // ---- consolidation ---------------------------------------------------

    pub async fn execute_consolidation_workflow(
        &self,
        user_id: &str,
        cancel: &CancelToken,
    ) -> Result<ConsolidationWorkflowResult> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("user id must not be empty"));
        }
        self.guard(cancel, self.run_consolidation(user_id)).await
    }

    async fn run_consolidation(&self, user_id: &str) -> Result<ConsolidationWorkflowResult> {
        let started = Instant::now();
        let now = unix_now();

        let memory_task = {
            let consolidation = self.consolidation.clone();
            let user = user_id.to_string();
            tokio::task::spawn_blocking(move || consolidation.consolidate(&user, now))
        };
        let graph_task = {
            let graph = self.graph.clone();
            tokio::task::spawn_blocking(move || graph.dedupe(now))
        };
        let (memory_out, graph_out) = tokio::join!(memory_task, graph_task);
        let report = memory_out
            .map_err(|e| EngineError::dependency("memory consolidation", anyhow::Error::from(e)))??;
        let entities_merged = graph_out
            .map_err(|e| EngineError::dependency("entity dedupe", anyhow::Error::from(e)))??;

        info!(
            user = user_id,
            clusters = report.memories_consolidated,
            removed = report.duplicates_removed,
            entities = entities_merged,
            "consolidation workflow complete"
        );
        Ok(ConsolidationWorkflowResult {
            memories_consolidated: report.memories_consolidated,
            duplicates_removed: report.duplicates_removed,
            entities_merged,
            duration: started.elapsed(),
        })
    }

    // ---- health ----------------------------------------------------------

    pub async fn get_health_status(&self) -> ServiceHealthStatus {
        let mut services = BTreeMap::new();
        services.insert(
            "graph_store".to_string(),
            self.registry.graph().get_entity("health-probe").is_ok(),
        );
        services.insert(
            "vector_store".to_string(),
            self.registry.vector().count(None).is_ok(),
        );
        services.insert(
            "memory_store".to_string(),
            self.registry.memories().count(None).is_ok(),
        );
        services.insert(
            "document_store".to_string(),
            self.registry.documents().get("health-probe").is_ok(),
        );
        services.insert(
            "embedding_provider".to_string(),
            self.registry.embedder().dimensions() > 0,
        );
        let failing: Vec<&str> = services
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        let is_healthy = failing.is_empty();
        let message = if is_healthy {
            None
        } else {
            Some(format!("unhealthy services: {}", failing.join(", ")))
        };
        ServiceHealthStatus {
            is_healthy,
            services,
            message,
        }
    }
}
