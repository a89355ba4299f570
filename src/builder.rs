//! Graph construction: merge-on-key writes of chunks, entities, relations
//! and mention edges. Re-running any batch leaves the same end state.

use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    model::{Chunk, Entity, ExtractionPayload, Mention, ParsedPayload},
    store::GraphStore,
};

/// What one extraction upsert wrote and what it skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub entities: usize,
    /// Entities dropped for an empty id or a malformed record.
    pub entities_skipped: usize,
    pub relations: usize,
    /// Relations with a missing endpoint or a malformed record.
    pub relations_skipped: usize,
    pub mentions: usize,
    /// Mentions whose chunk does not exist.
    pub mentions_skipped: usize,
}

impl UpsertReport {
    /// Add the elements dropped while parsing a payload to the skip counts.
    pub fn with_malformed(mut self, parsed: &ParsedPayload) -> Self {
        self.entities_skipped += parsed.malformed_entities;
        self.relations_skipped += parsed.malformed_relations;
        self
    }
}

impl std::ops::AddAssign for UpsertReport {
    fn add_assign(&mut self, other: Self) {
        self.entities += other.entities;
        self.entities_skipped += other.entities_skipped;
        self.relations += other.relations;
        self.relations_skipped += other.relations_skipped;
        self.mentions += other.mentions;
        self.mentions_skipped += other.mentions_skipped;
    }
}

pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Embed every chunk's text in one provider call, then merge the chunks
    /// with their embeddings.
    pub fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "{} returned {} vectors for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }

        let embedded: Vec<Chunk> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Chunk {
                embedding: Some(vector),
                ..chunk.clone()
            })
            .collect();
        self.store.merge_chunks(&embedded)?;

        debug!(count = embedded.len(), embedder = self.embedder.name(), "upserted chunks");
        Ok(embedded.len())
    }

    /// Merge the payload's entities, then its relations, then a mention
    /// edge from `chunk_id` to every payload entity.
    ///
    /// Edges with a missing endpoint are skipped and counted.
    pub fn upsert_entities_and_relations(
        &self,
        chunk_id: &str,
        payload: &ExtractionPayload,
    ) -> Result<UpsertReport> {
        let (entities, blank): (Vec<&Entity>, Vec<&Entity>) =
            payload.entities.iter().partition(|e| !e.id.is_empty());
        let entities: Vec<Entity> = entities.into_iter().cloned().collect();

        self.store.merge_entities(&entities)?;
        let relations = self.store.merge_relations(&payload.relations)?;

        let mentions: Vec<Mention> = entities
            .iter()
            .map(|e| e.id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|entity_id| Mention {
                chunk_id: chunk_id.to_string(),
                entity_id: entity_id.to_string(),
            })
            .collect();
        let mentions_written = self.store.merge_mentions(&mentions)?;

        let report = UpsertReport {
            entities: entities.len(),
            entities_skipped: blank.len(),
            relations,
            relations_skipped: payload.relations.len() - relations,
            mentions: mentions_written,
            mentions_skipped: mentions.len() - mentions_written,
        };
        info!(
            chunk = chunk_id,
            entities = report.entities,
            relations = report.relations,
            relations_skipped = report.relations_skipped,
            mentions = report.mentions,
            mentions_skipped = report.mentions_skipped,
            "upserted extraction"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::HashEmbedder,
        memory_store::MemoryGraphStore,
        model::Relation,
    };

    fn builder() -> (Arc<MemoryGraphStore>, GraphBuilder) {
        let store = Arc::new(MemoryGraphStore::new());
        let builder =
            GraphBuilder::new(store.clone(), Arc::new(HashEmbedder::new(16)));
        (store, builder)
    }

    fn entity(id: &str) -> Entity {
        Entity {
            id: id.into(),
            name: id.into(),
            kind: "org".into(),
        }
    }

    fn relation(src: &str, dst: &str) -> Relation {
        Relation {
            src: src.into(),
            dst: dst.into(),
            kind: "partner_of".into(),
        }
    }

    #[test]
    fn upsert_chunks_embeds_and_overwrites() {
        let (store, builder) = builder();
        builder
            .upsert_chunks(&[Chunk::new("c1", "d", "first text", 0)])
            .unwrap();
        builder
            .upsert_chunks(&[Chunk::new("c1", "d", "second text", 0)])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.embedded_chunks, 1);

        let ids = ["c1".to_string()];
        assert_eq!(store.chunk_texts(&ids).unwrap()["c1"], "second text");
        let expected = HashEmbedder::new(16).embed_one("second text").unwrap();
        assert_eq!(store.chunk_embeddings(&ids).unwrap()["c1"], expected);
    }

    #[test]
    fn extraction_upsert_is_idempotent() {
        let (store, builder) = builder();
        builder
            .upsert_chunks(&[Chunk::new("c1", "d", "Acme and Globex", 0)])
            .unwrap();
        let payload = ExtractionPayload {
            entities: vec![entity("acme"), entity("globex")],
            relations: vec![relation("acme", "globex")],
        };

        let first = builder.upsert_entities_and_relations("c1", &payload).unwrap();
        let second = builder.upsert_entities_and_relations("c1", &payload).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.mentions, 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.relations, 1);
        assert_eq!(stats.mentions, 2);
    }

    #[test]
    fn relation_to_unknown_entity_is_skipped() {
        let (store, builder) = builder();
        let payload = ExtractionPayload {
            entities: vec![entity("acme")],
            relations: vec![relation("acme", "never_upserted")],
        };
        let report = builder.upsert_entities_and_relations("c1", &payload).unwrap();

        assert_eq!(report.relations, 0);
        assert_eq!(report.relations_skipped, 1);
        assert_eq!(store.stats().unwrap().relations, 0);
    }

    #[test]
    fn mentions_of_missing_chunk_are_dropped() {
        let (store, builder) = builder();
        let payload = ExtractionPayload {
            entities: vec![entity("acme")],
            relations: vec![],
        };
        let report = builder
            .upsert_entities_and_relations("not_ingested", &payload)
            .unwrap();

        assert_eq!(report.entities, 1);
        assert_eq!(report.mentions, 0);
        assert_eq!(report.mentions_skipped, 1);
        assert_eq!(store.stats().unwrap().entities, 1);
    }

    #[test]
    fn blank_entity_ids_are_skipped() {
        let (_store, builder) = builder();
        let payload = ExtractionPayload {
            entities: vec![entity(""), entity("acme")],
            relations: vec![],
        };
        let report = builder.upsert_entities_and_relations("c1", &payload).unwrap();
        assert_eq!(report.entities, 1);
        assert_eq!(report.entities_skipped, 1);
    }

    #[test]
    fn reports_accumulate() {
        let mut total = UpsertReport::default();
        total += UpsertReport {
            entities: 2,
            relations: 1,
            ..Default::default()
        };
        total += UpsertReport {
            entities: 1,
            relations_skipped: 3,
            ..Default::default()
        };
        assert_eq!(total.entities, 3);
        assert_eq!(total.relations, 1);
        assert_eq!(total.relations_skipped, 3);
    }
}
