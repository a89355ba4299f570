//! Retry of transient store failures.
//!
//! [`RetryingStore`] wraps any [`GraphStore`] and retries calls that fail
//! with [`Error::Unavailable`], sleeping `backoff * 2^(attempt - 1)` between
//! attempts. Once retries are exhausted the failure becomes
//! [`Error::Connectivity`]. Every other error passes through untouched.

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use tracing::warn;

use crate::{
    error::{Error, Result},
    model::{Chunk, Entity, Mention, Relation, ScoredHit},
    store::{Capability, GraphStats, GraphStore},
};

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: GraphStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut(&S) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call(&self.inner) {
                Err(Error::Unavailable(message)) => {
                    if attempt > self.policy.max_retries {
                        return Err(Error::Connectivity {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "graph store unavailable, retrying"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

impl<S: GraphStore> GraphStore for RetryingStore<S> {
    fn create_fulltext_index(&self, name: &str) -> Result<Capability> {
        self.with_retry("create_fulltext_index", |s| {
            s.create_fulltext_index(name)
        })
    }

    fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<Capability> {
        self.with_retry("create_vector_index", |s| {
            s.create_vector_index(name, dimension)
        })
    }

    fn query_vector_index(
        &self,
        name: &str,
        k: usize,
        vector: &[f32],
    ) -> Result<Capability<Vec<ScoredHit>>> {
        self.with_retry("query_vector_index", |s| {
            s.query_vector_index(name, k, vector)
        })
    }

    fn query_fulltext_index(
        &self,
        name: &str,
        text: &str,
        k: usize,
    ) -> Result<Capability<Vec<ScoredHit>>> {
        self.with_retry("query_fulltext_index", |s| {
            s.query_fulltext_index(name, text, k)
        })
    }

    fn scan_chunks_containing(
        &self,
        needle: &str,
        k: usize,
    ) -> Result<Vec<ScoredHit>> {
        self.with_retry("scan_chunks_containing", |s| {
            s.scan_chunks_containing(needle, k)
        })
    }

    fn chunk_embeddings(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        self.with_retry("chunk_embeddings", |s| s.chunk_embeddings(ids))
    }

    fn chunk_texts(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        self.with_retry("chunk_texts", |s| s.chunk_texts(ids))
    }

    fn merge_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.with_retry("merge_chunks", |s| s.merge_chunks(chunks))
    }

    fn merge_entities(&self, entities: &[Entity]) -> Result<()> {
        self.with_retry("merge_entities", |s| s.merge_entities(entities))
    }

    fn merge_relations(&self, relations: &[Relation]) -> Result<usize> {
        self.with_retry("merge_relations", |s| s.merge_relations(relations))
    }

    fn merge_mentions(&self, mentions: &[Mention]) -> Result<usize> {
        self.with_retry("merge_mentions", |s| s.merge_mentions(mentions))
    }

    fn mentioned_entities(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.with_retry("mentioned_entities", |s| {
            s.mentioned_entities(chunk_ids)
        })
    }

    fn related_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.with_retry("related_entities", |s| s.related_entities(entity_ids))
    }

    fn mentioning_chunks(
        &self,
        entity_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        self.with_retry("mentioning_chunks", |s| {
            s.mentioning_chunks(entity_ids)
        })
    }

    fn stats(&self) -> Result<GraphStats> {
        self.with_retry("stats", |s| s.stats())
    }
}
