//! Index provisioning.
//!
//! Creation is "create if not exists" on the store side, so calling
//! [`IndexManager::ensure_indexes`] repeatedly is safe. A store that cannot
//! offer an index is reported, not treated as a failure: retrieval falls
//! back to weaker query paths instead.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::Result,
    store::{Capability, GraphStore},
};

pub const DEFAULT_VECTOR_INDEX: &str = "chunk_embedding_idx";
pub const DEFAULT_FULLTEXT_INDEX: &str = "chunk_text_fts";

/// Outcome of one index request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum IndexStatus {
    Supported,
    Unsupported(String),
    Failed(String),
    /// Not requested (no vector dimension was given).
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub fulltext: IndexStatus,
    pub vector: IndexStatus,
}

/// Index names used for provisioning and querying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    pub vector: String,
    pub fulltext: String,
}

impl Default for IndexNames {
    fn default() -> Self {
        Self {
            vector: DEFAULT_VECTOR_INDEX.to_string(),
            fulltext: DEFAULT_FULLTEXT_INDEX.to_string(),
        }
    }
}

pub struct IndexManager {
    store: Arc<dyn GraphStore>,
    names: IndexNames,
}

impl IndexManager {
    pub fn new(store: Arc<dyn GraphStore>, names: IndexNames) -> Self {
        Self { store, names }
    }

    /// Provision the full-text index and, when `dimension` is given, the
    /// vector index.
    ///
    /// Only connectivity failures are returned as errors.
    pub fn ensure_indexes(&self, dimension: Option<usize>) -> Result<IndexReport> {
        let fulltext = probe(
            "full-text",
            &self.names.fulltext,
            self.store.create_fulltext_index(&self.names.fulltext),
        )?;

        let vector = match dimension {
            Some(dim) => probe(
                "vector",
                &self.names.vector,
                self.store.create_vector_index(&self.names.vector, dim),
            )?,
            None => IndexStatus::Skipped,
        };

        Ok(IndexReport { fulltext, vector })
    }
}

fn probe(
    kind: &str,
    name: &str,
    outcome: Result<Capability>,
) -> Result<IndexStatus> {
    match outcome {
        Ok(Capability::Supported(())) => {
            debug!(kind, name, "index ready");
            Ok(IndexStatus::Supported)
        }
        Ok(Capability::Unsupported(reason)) => {
            warn!(kind, name, %reason, "index unsupported by store");
            Ok(IndexStatus::Unsupported(reason))
        }
        Err(e) if e.is_connectivity() => Err(e),
        Err(e) => {
            warn!(kind, name, error = %e, "index creation failed");
            Ok(IndexStatus::Failed(e.to_string()))
        }
    }
}
