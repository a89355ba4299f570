//! Records stored in the graph and values that flow through a query.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bounded span of source-document text, the atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        doc_id: impl Into<String>,
        text: impl Into<String>,
        order: u32,
    ) -> Self {
        Self {
            id: id.into(),
            doc_id: doc_id.into(),
            text: text.into(),
            order,
            embedding: None,
        }
    }
}

/// A named thing extracted from chunk text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A directed, typed edge between two entities.
///
/// Merge key is the whole `(src, dst, type)` triple.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Relation {
    pub src: String,
    pub dst: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A `Chunk -> Entity` edge: the chunk references the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mention {
    pub chunk_id: String,
    pub entity_id: String,
}

/// Entities and relations extracted from one chunk.
///
/// Deserializes from the JSON shape the extraction prompt asks for:
/// `{"entities": [{id, name, type}], "relations": [{src, dst, type}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl ExtractionPayload {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    /// Read a payload one element at a time.
    ///
    /// An entity or relation that does not deserialize is dropped and
    /// counted; its neighbours are kept. A missing or non-array
    /// `entities`/`relations` field reads as empty.
    pub fn from_value_lenient(value: &Value) -> ParsedPayload {
        let (entities, malformed_entities) = elements::<Entity>(value.get("entities"));
        let (relations, malformed_relations) = elements::<Relation>(value.get("relations"));
        ParsedPayload {
            payload: ExtractionPayload {
                entities,
                relations,
            },
            malformed_entities,
            malformed_relations,
        }
    }
}

fn elements<'a, T: Deserialize<'a>>(field: Option<&'a Value>) -> (Vec<T>, usize) {
    let Some(Value::Array(items)) = field else {
        return (Vec::new(), 0);
    };
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0;
    for item in items {
        match T::deserialize(item) {
            Ok(element) => kept.push(element),
            Err(_) => dropped += 1,
        }
    }
    (kept, dropped)
}

/// A payload plus the count of elements that had to be dropped from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPayload {
    pub payload: ExtractionPayload,
    pub malformed_entities: usize,
    pub malformed_relations: usize,
}

/// One row returned by a vector, full-text, or substring query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub id: String,
    pub text: String,
    pub score: f32,
}

impl ScoredHit {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }
}

/// A fused candidate. Produced per query, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub text: String,
    /// Normalized vector score, if the vector source returned this id.
    pub vector_score: Option<f32>,
    /// Normalized full-text score, if the text source returned this id.
    pub text_score: Option<f32>,
    pub fused_score: f32,
    /// Cosine between the query vector and the stored chunk embedding.
    pub rerank_score: Option<f32>,
}

impl Candidate {
    /// The score used for final ordering.
    pub fn best_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// How a returned chunk was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// Matched the query through the vector or full-text signal.
    Direct,
    /// Reached through entity relationships from a direct hit.
    GraphContext { hops: usize },
}

/// One entry of the final ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    /// `None` for graph context, which is never scored.
    pub score: Option<f32>,
    pub source: Source,
}

impl From<Candidate> for RetrievedChunk {
    fn from(candidate: Candidate) -> Self {
        let score = candidate.best_score();
        Self {
            id: candidate.id,
            text: candidate.text,
            score: Some(score),
            source: Source::Direct,
        }
    }
}
