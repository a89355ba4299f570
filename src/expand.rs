//! Graph expansion: `Chunk -MENTIONS-> Entity <-RELATES-> Entity <-MENTIONS- Chunk`.
//!
//! Each hop is three batched store reads. Chunks found this way are
//! context: they follow every direct hit and carry no score.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    error::Result,
    model::{Candidate, RetrievedChunk, Source},
    store::GraphStore,
};

pub const DEFAULT_EXPAND_HOPS: usize = 2;

pub struct GraphExpander {
    store: Arc<dyn GraphStore>,
}

impl GraphExpander {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Chunks reachable from `start_ids` within `max_hops` RELATES steps,
    /// mapped to the hop at which each was first found. Start chunks are
    /// never included.
    pub fn traverse(
        &self,
        start_ids: &[String],
        max_hops: usize,
    ) -> Result<BTreeMap<String, usize>> {
        let mut found = BTreeMap::new();
        if max_hops == 0 || start_ids.is_empty() {
            return Ok(found);
        }

        let seen_chunks: BTreeSet<&String> = start_ids.iter().collect();
        let mut visited = self.store.mentioned_entities(start_ids)?;
        let mut frontier: Vec<String> = visited.iter().cloned().collect();

        for hop in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }
            let next: Vec<String> = self
                .store
                .related_entities(&frontier)?
                .into_iter()
                .filter(|e| !visited.contains(e))
                .collect();
            if next.is_empty() {
                break;
            }
            visited.extend(next.iter().cloned());

            for chunk_id in self.store.mentioning_chunks(&next)? {
                if !seen_chunks.contains(&chunk_id) {
                    found.entry(chunk_id).or_insert(hop);
                }
            }
            debug!(hop, entities = next.len(), chunks = found.len(), "expanded hop");
            frontier = next;
        }

        Ok(found)
    }

    /// Append graph context after the ranked candidates.
    ///
    /// Every candidate seeds the walk. Context is ordered by hop, then id.
    /// Only connectivity failures are returned; any other store error
    /// leaves the ranked list as it is.
    pub fn expand(
        &self,
        candidates: Vec<Candidate>,
        hops: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let seeds: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let mut results: Vec<RetrievedChunk> =
            candidates.into_iter().map(RetrievedChunk::from).collect();

        if hops == 0 || seeds.is_empty() {
            return Ok(results);
        }

        match self.context(&seeds, hops) {
            Ok(context) => results.extend(context),
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => warn!(error = %e, "graph expansion failed, skipping context"),
        }
        Ok(results)
    }

    fn context(&self, seeds: &[String], hops: usize) -> Result<Vec<RetrievedChunk>> {
        let found = self.traverse(seeds, hops)?;
        if found.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = found.keys().cloned().collect();
        let mut texts = self.store.chunk_texts(&ids)?;

        let mut ordered: Vec<(usize, String)> =
            found.into_iter().map(|(id, hop)| (hop, id)).collect();
        ordered.sort();

        Ok(ordered
            .into_iter()
            .filter_map(|(hop, id)| {
                let text = texts.remove(&id)?;
                Some(RetrievedChunk {
                    id,
                    text,
                    score: None,
                    source: Source::GraphContext { hops: hop },
                })
            })
            .collect())
    }
}
