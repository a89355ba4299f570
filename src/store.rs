//! The graph store boundary.
//!
//! Every component takes an explicit store handle (`Arc<dyn GraphStore>`)
//! in its constructor. Optional capabilities (index creation and index
//! queries) answer with [`Capability`] instead of failing, so a fallback is
//! an ordinary branch at the call site.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::{
    error::Result,
    model::{Chunk, Entity, Mention, Relation, ScoredHit},
};

/// Outcome of asking the store for an optional capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability<T = ()> {
    Supported(T),
    /// The store (or its edition) does not offer this capability.
    Unsupported(String),
}

impl<T> Capability<T> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }

    pub fn supported(self) -> Option<T> {
        match self {
            Capability::Supported(value) => Some(value),
            Capability::Unsupported(_) => None,
        }
    }
}

/// Node and edge counts, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub chunks: usize,
    pub embedded_chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub mentions: usize,
}

/// A persistent graph database as seen by retrieval and ingestion.
///
/// Writes are merge-on-key: writing a record whose key already exists
/// replaces it in place, so re-running a batch is safe. Edge writes whose
/// endpoints are missing are skipped, never an error.
///
/// Transient failures (unreachable, timed out) are reported as
/// [`Error::Unavailable`](crate::Error::Unavailable).
pub trait GraphStore: Send + Sync {
    /// Create the full-text index over chunk text if it does not exist.
    fn create_fulltext_index(&self, name: &str) -> Result<Capability>;

    /// Create the vector index over chunk embeddings if it does not exist.
    fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<Capability>;

    /// Nearest chunks to `vector`, by descending score, at most `k`.
    fn query_vector_index(
        &self,
        name: &str,
        k: usize,
        vector: &[f32],
    ) -> Result<Capability<Vec<ScoredHit>>>;

    /// Full-text matches for `text`, by descending score, at most `k`.
    fn query_fulltext_index(
        &self,
        name: &str,
        text: &str,
        k: usize,
    ) -> Result<Capability<Vec<ScoredHit>>>;

    /// Chunks whose text literally contains `needle`, at most `k`, each
    /// scored `1.0`. Always available; linear in the number of chunks.
    fn scan_chunks_containing(
        &self,
        needle: &str,
        k: usize,
    ) -> Result<Vec<ScoredHit>>;

    /// Stored embeddings for the given chunk ids, in one read. Ids without
    /// an embedding (or without a chunk) are absent from the map.
    fn chunk_embeddings(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>>;

    /// Stored text for the given chunk ids, in one read.
    fn chunk_texts(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    /// Merge chunks on id. Text, order and embedding are written together.
    ///
    /// A full-text index kept outside the graph is updated after the graph
    /// write commits, so a failure there can leave it stale until the same
    /// chunks are merged again.
    fn merge_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Merge entities on id.
    fn merge_entities(&self, entities: &[Entity]) -> Result<()>;

    /// Merge relations whose endpoints both exist. Returns how many of the
    /// given relations had both endpoints (and are therefore now present).
    fn merge_relations(&self, relations: &[Relation]) -> Result<usize>;

    /// Merge mention edges whose chunk and entity both exist. Returns how
    /// many of the given mentions are now present.
    fn merge_mentions(&self, mentions: &[Mention]) -> Result<usize>;

    /// Entities mentioned by any of the given chunks.
    fn mentioned_entities(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeSet<String>>;

    /// Entities one RELATES edge away, in either direction.
    fn related_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>>;

    /// Chunks that mention any of the given entities.
    fn mentioning_chunks(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>>;

    fn stats(&self) -> Result<GraphStats>;
}

/// Order hits by descending score, then ascending id, and keep `k`.
pub(crate) fn rank_hits(mut hits: Vec<ScoredHit>, k: usize) -> Vec<ScoredHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
