//! docgraph - hybrid retrieval over a knowledge graph of document chunks.
//!
//! Documents are cut into chunks, embedded, and stored in a graph next to
//! the entities and relations extracted from them. A query is answered by
//! fusing vector similarity with full-text relevance, re-ranking the fused
//! candidates against their stored embeddings, and appending chunks that
//! are reachable through related entities as graph context.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docgraph::{
//!     DataDir, EmbeddedGraphStore, Retriever, RetryingStore,
//!     config::RetrievalConfig, embedding::HashEmbedder, retry::RetryPolicy,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = EmbeddedGraphStore::open(
//!     &data_dir.graph_db(),
//!     &data_dir.tantivy_dir().unwrap(),
//! )
//! .unwrap();
//! let store = Arc::new(RetryingStore::new(store, RetryPolicy::default()));
//!
//! let retriever = Retriever::new(
//!     store,
//!     Arc::new(HashEmbedder::new(256)),
//!     RetrievalConfig::default(),
//! );
//! for r in retriever.retrieve("who supplies acme?").unwrap() {
//!     println!("{} {:?} {}", r.id, r.source, r.text);
//! }
//! ```

pub mod builder;
pub mod chunking;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod expand;
pub mod extraction;
pub mod fusion;
pub mod gather;
pub mod graph_db;
pub mod indexes;
pub mod ingestion;
pub mod llm;
pub mod mcp;
pub mod memory_store;
pub mod model;
pub mod retriever;
pub mod retry;
pub mod store;
pub mod tantivy_index;
pub mod walker;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use graph_db::EmbeddedGraphStore;
pub use memory_store::MemoryGraphStore;
pub use model::{Chunk, RetrievedChunk, Source};
pub use retriever::{QueryOptions, Retriever};
pub use retry::RetryingStore;
pub use store::{Capability, GraphStore};
