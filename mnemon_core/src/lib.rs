//! Mnemon core: a hybrid retrieval and grounding engine.
//!
//! The engine combines vector similarity search with knowledge-graph
//! traversal, fuses both into a single ranking, grounds statements against
//! stored evidence (with contradiction detection), and periodically
//! consolidates near-duplicate memories and entities.
//!
//! External concerns (storage, embedding, extraction) are reached through
//! the traits in [`backends`]; the [`embedded`] module provides in-memory
//! implementations for the embedded mode and tests. Workflows are driven
//! by the [`orchestrator::Orchestrator`].

pub mod backends;
pub mod consolidation;
pub mod embedded;
pub mod error;
pub mod graph_index;
pub mod grounding;
pub mod hybrid;
pub mod orchestrator;
pub mod retrieval;
pub mod traversal;
pub mod types;

pub use backends::{BackendRegistry, VectorHit};
pub use error::{EngineError, Result};
pub use graph_index::GraphIndex;
pub use grounding::GroundingEngine;
pub use hybrid::HybridRanker;
pub use orchestrator::{CancelToken, Orchestrator};
pub use retrieval::VectorRetriever;
pub use traversal::GraphTraversal;
