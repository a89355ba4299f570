//! Candidate gathering from the vector and full-text signals.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::Result,
    indexes::IndexNames,
    model::ScoredHit,
    store::{Capability, GraphStore},
};

/// Hits from both signals for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gathered {
    pub vector: Vec<ScoredHit>,
    pub text: Vec<ScoredHit>,
}

pub struct CandidateGatherer {
    store: Arc<dyn GraphStore>,
    names: IndexNames,
}

impl CandidateGatherer {
    pub fn new(store: Arc<dyn GraphStore>, names: IndexNames) -> Self {
        Self { store, names }
    }

    /// Nearest chunks by embedding. Contributes nothing (rather than
    /// failing) when the index is missing, unsupported, or errors.
    pub fn vector_candidates(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredHit>> {
        if query_vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        match self
            .store
            .query_vector_index(&self.names.vector, k, query_vector)
        {
            Ok(Capability::Supported(hits)) => Ok(hits),
            Ok(Capability::Unsupported(reason)) => {
                debug!(%reason, "vector search unsupported, no vector signal");
                Ok(Vec::new())
            }
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => {
                warn!(error = %e, "vector search failed, no vector signal");
                Ok(Vec::new())
            }
        }
    }

    /// Full-text matches, falling back to a literal substring scan scored
    /// `1.0` when the full-text index cannot answer.
    pub fn fulltext_candidates(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<ScoredHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        match self
            .store
            .query_fulltext_index(&self.names.fulltext, query_text, k)
        {
            Ok(Capability::Supported(hits)) => return Ok(hits),
            Ok(Capability::Unsupported(reason)) => {
                debug!(%reason, "full-text search unsupported, scanning");
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!(error = %e, "full-text search failed, scanning");
            }
        }

        if query_text.is_empty() {
            return Ok(Vec::new());
        }
        self.store.scan_chunks_containing(query_text, k)
    }

    /// Run both queries concurrently and join.
    pub fn gather(
        &self,
        query_text: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Gathered> {
        let (vector, text) = rayon::join(
            || self.vector_candidates(query_vector, k),
            || self.fulltext_candidates(query_text, k),
        );
        let gathered = Gathered {
            vector: vector?,
            text: text?,
        };
        debug!(
            vector = gathered.vector.len(),
            text = gathered.text.len(),
            "gathered candidates"
        );
        Ok(gathered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{indexes::IndexManager, memory_store::MemoryGraphStore, model::Chunk};

    fn seeded(store: MemoryGraphStore) -> Arc<MemoryGraphStore> {
        let mut a = Chunk::new("a", "d", "graph retrieval with entities", 0);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = Chunk::new("b", "d", "vector search over embeddings", 1);
        b.embedding = Some(vec![0.0, 1.0]);
        store.merge_chunks(&[a, b]).unwrap();

        let store = Arc::new(store);
        IndexManager::new(store.clone(), IndexNames::default())
            .ensure_indexes(Some(2))
            .unwrap();
        store
    }

    fn gatherer(store: Arc<MemoryGraphStore>) -> CandidateGatherer {
        CandidateGatherer::new(store, IndexNames::default())
    }

    #[test]
    fn gathers_both_signals() {
        let g = gatherer(seeded(MemoryGraphStore::new()));
        let got = g.gather("graph", &[1.0, 0.0], 5).unwrap();
        assert_eq!(got.vector[0].id, "a");
        assert_eq!(got.text.len(), 1);
        assert_eq!(got.text[0].id, "a");
    }

    #[test]
    fn empty_query_vector_contributes_nothing() {
        let g = gatherer(seeded(MemoryGraphStore::new()));
        assert!(g.vector_candidates(&[], 5).unwrap().is_empty());
    }

    #[test]
    fn vector_errors_degrade_to_empty() {
        // Dimension mismatch is a store error, not a connectivity one.
        let g = gatherer(seeded(MemoryGraphStore::new()));
        assert!(g.vector_candidates(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());

        let bare = gatherer(Arc::new(MemoryGraphStore::new()));
        assert!(bare.vector_candidates(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn unsupported_fulltext_falls_back_to_substring() {
        let g = gatherer(seeded(MemoryGraphStore::new().without_fulltext()));
        let hits = g.fulltext_candidates("vector search", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].score, 1.0);

        assert!(g.fulltext_candidates("no such phrase", 5).unwrap().is_empty());
    }

    #[test]
    fn missing_fulltext_index_falls_back_to_substring() {
        let store = MemoryGraphStore::new();
        store
            .merge_chunks(&[Chunk::new("x", "d", "plain text", 0)])
            .unwrap();
        let g = gatherer(Arc::new(store));
        let hits = g.fulltext_candidates("plain", 5).unwrap();
        assert_eq!(hits[0].id, "x");
    }

    #[test]
    fn connectivity_errors_surface() {
        let store = seeded(MemoryGraphStore::new());
        store.fail_next(1);
        let g = gatherer(store);
        assert!(g.fulltext_candidates("graph", 5).unwrap_err().is_connectivity());
    }
}
