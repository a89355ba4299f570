//! An in-process [`GraphStore`] backed by ordered maps.
//!
//! Used by tests and by callers that want retrieval over a small corpus
//! without touching disk. Both index capabilities can be switched off to
//! exercise the fallback paths.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use crate::{
    error::{Error, Result},
    fusion::cosine_similarity,
    model::{Chunk, Entity, Mention, Relation, ScoredHit},
    store::{Capability, GraphStats, GraphStore, rank_hits},
};

#[derive(Default)]
struct Graph {
    chunks: BTreeMap<String, Chunk>,
    entities: BTreeMap<String, Entity>,
    relations: BTreeSet<Relation>,
    mentions: BTreeSet<Mention>,
    fulltext_indexes: BTreeSet<String>,
    vector_indexes: BTreeMap<String, usize>,
}

pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
    fulltext: bool,
    vector: bool,
    failures: AtomicU32,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            fulltext: true,
            vector: true,
            failures: AtomicU32::new(0),
        }
    }

    /// Report full-text indexing as unsupported.
    pub fn without_fulltext(mut self) -> Self {
        self.fulltext = false;
        self
    }

    /// Report vector indexing as unsupported.
    pub fn without_vector(mut self) -> Self {
        self.vector = false;
        self
    }

    /// Make the next `n` store calls fail with [`Error::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Graph>> {
        self.check_available()?;
        self.graph
            .read()
            .map_err(|_| Error::Unavailable("graph lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Graph>> {
        self.check_available()?;
        self.graph
            .write()
            .map_err(|_| Error::Unavailable("graph lock poisoned".into()))
    }
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraphStore")
            .field("fulltext", &self.fulltext)
            .field("vector", &self.vector)
            .finish_non_exhaustive()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl GraphStore for MemoryGraphStore {
    fn create_fulltext_index(&self, name: &str) -> Result<Capability> {
        if !self.fulltext {
            return Ok(Capability::Unsupported(
                "full-text indexing disabled".into(),
            ));
        }
        self.write()?.fulltext_indexes.insert(name.to_string());
        Ok(Capability::Supported(()))
    }

    fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<Capability> {
        if !self.vector {
            return Ok(Capability::Unsupported(
                "vector indexing disabled".into(),
            ));
        }
        self.write()?
            .vector_indexes
            .entry(name.to_string())
            .or_insert(dimension);
        Ok(Capability::Supported(()))
    }

    fn query_vector_index(
        &self,
        name: &str,
        k: usize,
        vector: &[f32],
    ) -> Result<Capability<Vec<ScoredHit>>> {
        if !self.vector {
            return Ok(Capability::Unsupported(
                "vector indexing disabled".into(),
            ));
        }
        let graph = self.read()?;
        let Some(&dimension) = graph.vector_indexes.get(name) else {
            return Err(Error::NotFound {
                kind: "vector index",
                name: name.to_string(),
            });
        };
        if vector.len() != dimension {
            return Err(Error::Config(format!(
                "query vector has dimension {}, index {name} expects {dimension}",
                vector.len()
            )));
        }

        let hits = graph
            .chunks
            .values()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                (embedding.len() == dimension).then(|| {
                    ScoredHit::new(
                        chunk.id.clone(),
                        chunk.text.clone(),
                        cosine_similarity(vector, embedding),
                    )
                })
            })
            .collect();
        Ok(Capability::Supported(rank_hits(hits, k)))
    }

    fn query_fulltext_index(
        &self,
        name: &str,
        text: &str,
        k: usize,
    ) -> Result<Capability<Vec<ScoredHit>>> {
        if !self.fulltext {
            return Ok(Capability::Unsupported(
                "full-text indexing disabled".into(),
            ));
        }
        let graph = self.read()?;
        if !graph.fulltext_indexes.contains(name) {
            return Err(Error::NotFound {
                kind: "full-text index",
                name: name.to_string(),
            });
        }

        let terms: BTreeSet<String> = tokens(text).collect();
        if terms.is_empty() {
            return Ok(Capability::Supported(Vec::new()));
        }

        // Score is the number of query-term occurrences in the chunk.
        let hits = graph
            .chunks
            .values()
            .filter_map(|chunk| {
                let count =
                    tokens(&chunk.text).filter(|t| terms.contains(t)).count();
                (count > 0).then(|| {
                    ScoredHit::new(
                        chunk.id.clone(),
                        chunk.text.clone(),
                        count as f32,
                    )
                })
            })
            .collect();
        Ok(Capability::Supported(rank_hits(hits, k)))
    }

    fn scan_chunks_containing(
        &self,
        needle: &str,
        k: usize,
    ) -> Result<Vec<ScoredHit>> {
        let graph = self.read()?;
        Ok(graph
            .chunks
            .values()
            .filter(|chunk| chunk.text.contains(needle))
            .take(k)
            .map(|chunk| ScoredHit::new(chunk.id.clone(), chunk.text.clone(), 1.0))
            .collect())
    }

    fn chunk_embeddings(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let graph = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let embedding = graph.chunks.get(id)?.embedding.clone()?;
                Some((id.clone(), embedding))
            })
            .collect())
    }

    fn chunk_texts(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let graph = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let chunk = graph.chunks.get(id)?;
                Some((id.clone(), chunk.text.clone()))
            })
            .collect())
    }

    fn merge_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut graph = self.write()?;
        for chunk in chunks {
            graph.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    fn merge_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut graph = self.write()?;
        for entity in entities {
            graph.entities.insert(entity.id.clone(), entity.clone());
        }
        Ok(())
    }

    fn merge_relations(&self, relations: &[Relation]) -> Result<usize> {
        let mut graph = self.write()?;
        let mut present = 0;
        for relation in relations {
            if graph.entities.contains_key(&relation.src)
                && graph.entities.contains_key(&relation.dst)
            {
                graph.relations.insert(relation.clone());
                present += 1;
            }
        }
        Ok(present)
    }

    fn merge_mentions(&self, mentions: &[Mention]) -> Result<usize> {
        let mut graph = self.write()?;
        let mut present = 0;
        for mention in mentions {
            if graph.chunks.contains_key(&mention.chunk_id)
                && graph.entities.contains_key(&mention.entity_id)
            {
                graph.mentions.insert(mention.clone());
                present += 1;
            }
        }
        Ok(present)
    }

    fn mentioned_entities(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        let graph = self.read()?;
        let wanted: BTreeSet<&String> = chunk_ids.iter().collect();
        Ok(graph
            .mentions
            .iter()
            .filter(|m| wanted.contains(&m.chunk_id))
            .map(|m| m.entity_id.clone())
            .collect())
    }

    fn related_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        let graph = self.read()?;
        let wanted: BTreeSet<&String> = entity_ids.iter().collect();
        let mut related = BTreeSet::new();
        for relation in &graph.relations {
            if wanted.contains(&relation.src) {
                related.insert(relation.dst.clone());
            }
            if wanted.contains(&relation.dst) {
                related.insert(relation.src.clone());
            }
        }
        Ok(related)
    }

    fn mentioning_chunks(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        let graph = self.read()?;
        let wanted: BTreeSet<&String> = entity_ids.iter().collect();
        Ok(graph
            .mentions
            .iter()
            .filter(|m| wanted.contains(&m.entity_id))
            .map(|m| m.chunk_id.clone())
            .collect())
    }

    fn stats(&self) -> Result<GraphStats> {
        let graph = self.read()?;
        Ok(GraphStats {
            chunks: graph.chunks.len(),
            embedded_chunks: graph
                .chunks
                .values()
                .filter(|c| c.embedding.is_some())
                .count(),
            entities: graph.entities.len(),
            relations: graph.relations.len(),
            mentions: graph.mentions.len(),
        })
    }
}
