//! The on-disk [`GraphStore`]: redb tables for nodes and edges, a tantivy
//! index for chunk text.
//!
//! Embedding binary format per entry:
//! - 4 bytes: dimension D (u32 LE)
//! - D * 4 bytes: f32 LE values
//!
//! The vector capability is an exhaustive cosine scan over stored
//! embeddings of the index's dimension.

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::Mutex,
};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    fusion::cosine_similarity,
    model::{Chunk, Entity, Mention, Relation, ScoredHit},
    store::{Capability, GraphStats, GraphStore, rank_hits},
    tantivy_index::ChunkTextIndex,
};

const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("chunk_embeddings");
const ENTITIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("entities");
/// Keyed by `(src, dst, type)`.
const RELATIONS: TableDefinition<(&str, &str, &str), ()> =
    TableDefinition::new("relations");
/// Entity adjacency ignoring direction and relation type.
const NEIGHBORS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("entity_neighbors");
/// chunk id -> entity ids
const MENTIONS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("mentions");
/// entity id -> chunk ids
const MENTIONED_BY: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("mentioned_by");
const VECTOR_INDEXES: TableDefinition<&str, u64> =
    TableDefinition::new("vector_indexes");
const FULLTEXT_INDEXES: TableDefinition<&str, ()> =
    TableDefinition::new("fulltext_indexes");

const HEADER_SIZE: usize = 4;

#[derive(Serialize, Deserialize)]
struct StoredChunk {
    doc_id: String,
    text: String,
    order: u32,
}

fn encode_embedding(data: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(data));
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(data));
    bytes
}

/// `None` when the entry is truncated or its length disagrees with its
/// header.
fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    // The body may not be 4-byte aligned inside the page, so no cast.
    Some(
        body.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

pub struct EmbeddedGraphStore {
    db: Database,
    text_index: ChunkTextIndex,
    text_writes: Mutex<()>,
}

impl EmbeddedGraphStore {
    /// Open or create the graph database at `path`, with its full-text
    /// index under `tantivy_dir`.
    pub fn open(path: &Path, tantivy_dir: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(ENTITIES)?;
        txn.open_table(RELATIONS)?;
        txn.open_multimap_table(NEIGHBORS)?;
        txn.open_multimap_table(MENTIONS)?;
        txn.open_multimap_table(MENTIONED_BY)?;
        txn.open_table(VECTOR_INDEXES)?;
        txn.open_table(FULLTEXT_INDEXES)?;
        txn.commit()?;

        Ok(Self {
            db,
            text_index: ChunkTextIndex::open(tantivy_dir)?,
            text_writes: Mutex::new(()),
        })
    }

    fn has_fulltext_index(&self, name: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FULLTEXT_INDEXES)?;
        Ok(table.get(name)?.is_some())
    }

    fn any_fulltext_index(&self) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FULLTEXT_INDEXES)?;
        Ok(!table.is_empty()?)
    }

    fn index_text<'a>(
        &self,
        chunks: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<usize> {
        let _guard = self
            .text_writes
            .lock()
            .map_err(|_| Error::Unavailable("text index lock poisoned".into()))?;
        self.text_index.upsert_all(chunks)
    }

    fn all_chunks(&self) -> Result<Vec<(String, StoredChunk)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), serde_json::from_slice(v.value())?));
        }
        Ok(result)
    }

    fn lookup_multimap(
        &self,
        definition: MultimapTableDefinition<'static, &'static str, &'static str>,
        keys: &[String],
    ) -> Result<BTreeSet<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(definition)?;
        let mut result = BTreeSet::new();
        for key in keys {
            for value in table.get(key.as_str())? {
                result.insert(value?.value().to_string());
            }
        }
        Ok(result)
    }
}

impl std::fmt::Debug for EmbeddedGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedGraphStore").finish_non_exhaustive()
    }
}

impl GraphStore for EmbeddedGraphStore {
    fn create_fulltext_index(&self, name: &str) -> Result<Capability> {
        let created = {
            let txn = self.db.begin_write()?;
            let created = {
                let mut table = txn.open_table(FULLTEXT_INDEXES)?;
                table.insert(name, ())?.is_none()
            };
            txn.commit()?;
            created
        };

        if created {
            let chunks = self.all_chunks()?;
            let indexed = self.index_text(
                chunks.iter().map(|(id, c)| (id.as_str(), c.text.as_str())),
            )?;
            debug!(name, indexed, "created full-text index");
        }
        Ok(Capability::Supported(()))
    }

    fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<Capability> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTOR_INDEXES)?;
            if table.get(name)?.is_none() {
                table.insert(name, dimension as u64)?;
            }
        }
        txn.commit()?;
        Ok(Capability::Supported(()))
    }

    fn query_vector_index(
        &self,
        name: &str,
        k: usize,
        vector: &[f32],
    ) -> Result<Capability<Vec<ScoredHit>>> {
        let txn = self.db.begin_read()?;
        let indexes = txn.open_table(VECTOR_INDEXES)?;
        let Some(dimension) = indexes.get(name)?.map(|v| v.value() as usize)
        else {
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

        let embeddings = txn.open_table(EMBEDDINGS)?;
        let mut scored = Vec::new();
        for entry in embeddings.iter()? {
            let (id, bytes) = entry?;
            let Some(stored) = decode_embedding(bytes.value()) else {
                continue;
            };
            if stored.len() == dimension {
                let score = cosine_similarity(vector, &stored);
                scored.push(ScoredHit::new(id.value(), String::new(), score));
            }
        }
        let mut hits = rank_hits(scored, k);

        let chunks = txn.open_table(CHUNKS)?;
        for hit in &mut hits {
            if let Some(v) = chunks.get(hit.id.as_str())? {
                let chunk: StoredChunk = serde_json::from_slice(v.value())?;
                hit.text = chunk.text;
            }
        }
        Ok(Capability::Supported(hits))
    }

    fn query_fulltext_index(
        &self,
        name: &str,
        text: &str,
        k: usize,
    ) -> Result<Capability<Vec<ScoredHit>>> {
        if !self.has_fulltext_index(name)? {
            return Err(Error::NotFound {
                kind: "full-text index",
                name: name.to_string(),
            });
        }
        Ok(Capability::Supported(self.text_index.search(text, k)?))
    }

    fn scan_chunks_containing(
        &self,
        needle: &str,
        k: usize,
    ) -> Result<Vec<ScoredHit>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut hits = Vec::new();
        for entry in table.iter()? {
            if hits.len() >= k {
                break;
            }
            let (id, v) = entry?;
            let chunk: StoredChunk = serde_json::from_slice(v.value())?;
            if chunk.text.contains(needle) {
                hits.push(ScoredHit::new(id.value(), chunk.text, 1.0));
            }
        }
        Ok(hits)
    }

    fn chunk_embeddings(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut result = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(v) = table.get(id.as_str())?
                && let Some(embedding) = decode_embedding(v.value())
            {
                result.insert(id.clone(), embedding);
            }
        }
        Ok(result)
    }

    fn chunk_texts(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(v) = table.get(id.as_str())? {
                let chunk: StoredChunk = serde_json::from_slice(v.value())?;
                result.insert(id.clone(), chunk.text);
            }
        }
        Ok(result)
    }

    fn merge_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;
            for chunk in chunks {
                let record = serde_json::to_vec(&StoredChunk {
                    doc_id: chunk.doc_id.clone(),
                    text: chunk.text.clone(),
                    order: chunk.order,
                })?;
                table.insert(chunk.id.as_str(), record.as_slice())?;

                match &chunk.embedding {
                    Some(data) => {
                        let bytes = encode_embedding(data);
                        embeddings.insert(chunk.id.as_str(), bytes.as_slice())?;
                    }
                    None => {
                        embeddings.remove(chunk.id.as_str())?;
                    }
                }
            }
        }
        txn.commit()?;

        // Graph first, then tantivy. Merging again repairs a failed text write.
        if self.any_fulltext_index()? {
            self.index_text(
                chunks.iter().map(|c| (c.id.as_str(), c.text.as_str())),
            )?;
        }
        Ok(())
    }

    fn merge_entities(&self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTITIES)?;
            for entity in entities {
                let record = serde_json::to_vec(entity)?;
                table.insert(entity.id.as_str(), record.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn merge_relations(&self, relations: &[Relation]) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut present = 0;
        {
            let entities = txn.open_table(ENTITIES)?;
            let mut table = txn.open_table(RELATIONS)?;
            let mut neighbors = txn.open_multimap_table(NEIGHBORS)?;
            for r in relations {
                if entities.get(r.src.as_str())?.is_none()
                    || entities.get(r.dst.as_str())?.is_none()
                {
                    continue;
                }
                table.insert((r.src.as_str(), r.dst.as_str(), r.kind.as_str()), ())?;
                neighbors.insert(r.src.as_str(), r.dst.as_str())?;
                neighbors.insert(r.dst.as_str(), r.src.as_str())?;
                present += 1;
            }
        }
        txn.commit()?;
        Ok(present)
    }

    fn merge_mentions(&self, mentions: &[Mention]) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut present = 0;
        {
            let chunks = txn.open_table(CHUNKS)?;
            let entities = txn.open_table(ENTITIES)?;
            let mut forward = txn.open_multimap_table(MENTIONS)?;
            let mut backward = txn.open_multimap_table(MENTIONED_BY)?;
            for m in mentions {
                if chunks.get(m.chunk_id.as_str())?.is_none()
                    || entities.get(m.entity_id.as_str())?.is_none()
                {
                    continue;
                }
                forward.insert(m.chunk_id.as_str(), m.entity_id.as_str())?;
                backward.insert(m.entity_id.as_str(), m.chunk_id.as_str())?;
                present += 1;
            }
        }
        txn.commit()?;
        Ok(present)
    }

    fn mentioned_entities(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.lookup_multimap(MENTIONS, chunk_ids)
    }

    fn related_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.lookup_multimap(NEIGHBORS, entity_ids)
    }

    fn mentioning_chunks(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.lookup_multimap(MENTIONED_BY, entity_ids)
    }

    fn stats(&self) -> Result<GraphStats> {
        let txn = self.db.begin_read()?;
        Ok(GraphStats {
            chunks: txn.open_table(CHUNKS)?.len()? as usize,
            embedded_chunks: txn.open_table(EMBEDDINGS)?.len()? as usize,
            entities: txn.open_table(ENTITIES)?.len()? as usize,
            relations: txn.open_table(RELATIONS)?.len()? as usize,
            mentions: txn.open_multimap_table(MENTIONS)?.len()? as usize,
        })
    }
}
