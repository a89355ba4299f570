//! Hybrid retrieval: gather, fuse, re-rank, then expand through the graph.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::RetrievalConfig,
    embedding::Embedder,
    error::Result,
    expand::GraphExpander,
    fusion::Merger,
    gather::CandidateGatherer,
    model::RetrievedChunk,
    store::GraphStore,
};

/// Per-query overrides. Unset fields use the retriever's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub alpha: Option<f32>,
    pub expand_hops: Option<usize>,
    pub candidate_k: Option<usize>,
}

/// Query parameters after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolved {
    top_k: usize,
    alpha: f32,
    expand_hops: usize,
    fan_out: usize,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    gatherer: CandidateGatherer,
    merger: Merger,
    expander: GraphExpander,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            gatherer: CandidateGatherer::new(store.clone(), config.index_names.clone()),
            merger: Merger::new(store.clone()),
            expander: GraphExpander::new(store),
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve with the configured defaults.
    pub fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retrieve_with(query, &QueryOptions::default())
    }

    /// Ranked direct hits followed by graph context, at most `top_k` in
    /// total.
    ///
    /// Context only fills the slots direct hits leave free. Once the
    /// vector signal alone returns `top_k` chunks, which an exhaustive
    /// vector index does whenever that many chunks are embedded, no
    /// context is returned. Ask for a larger `top_k` than the number of
    /// direct hits wanted to leave room for it.
    ///
    /// Errors only when the store is unreachable. A failing embedder drops
    /// the vector signal and the query runs on full-text alone.
    pub fn retrieve_with(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        let params = self.resolve(options);
        if params.top_k == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        debug!(?params, "resolved query parameters");

        let query_vector = match self.embedder.embed_one(query) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, embedder = self.embedder.name(), "query embedding failed, using full-text only");
                Vec::new()
            }
        };

        let gathered = self.gatherer.gather(query, &query_vector, params.fan_out)?;
        let ranked = self.merger.merge_and_rerank(
            &query_vector,
            &gathered.vector,
            &gathered.text,
            params.alpha,
            params.top_k,
        )?;
        let direct = ranked.len();

        let mut results = self.expander.expand(ranked, params.expand_hops)?;
        results.truncate(params.top_k);

        info!(
            direct,
            context = results.len() - direct.min(results.len()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );
        Ok(results)
    }

    fn resolve(&self, options: &QueryOptions) -> Resolved {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let alpha = options
            .alpha
            .filter(|a| !a.is_nan())
            .unwrap_or(self.config.alpha)
            .clamp(0.0, 1.0);
        let candidate_k = options.candidate_k.unwrap_or(self.config.candidate_k);
        Resolved {
            top_k,
            alpha,
            expand_hops: options.expand_hops.unwrap_or(self.config.expand_hops),
            fan_out: candidate_k.max(top_k),
        }
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::HashEmbedder,
        error::Error,
        indexes::{IndexManager, IndexNames},
        memory_store::MemoryGraphStore,
        model::{Chunk, Entity, Mention, Relation, Source},
    };

    struct Broken;

    impl Embedder for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> Option<usize> {
            Some(2)
        }

        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("offline".into()))
        }
    }

    fn store_with(texts: &[(&str, &str)]) -> Arc<MemoryGraphStore> {
        let embedder = HashEmbedder::new(32);
        let store = MemoryGraphStore::new();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, (id, text))| {
                let mut c = Chunk::new(*id, "doc", *text, i as u32);
                c.embedding = Some(embedder.embed_one(text).unwrap());
                c
            })
            .collect();
        store.merge_chunks(&chunks).unwrap();

        let store = Arc::new(store);
        IndexManager::new(store.clone(), IndexNames::default())
            .ensure_indexes(Some(32))
            .unwrap();
        store
    }

    fn retriever(store: Arc<MemoryGraphStore>) -> Retriever {
        Retriever::new(store, Arc::new(HashEmbedder::new(32)), RetrievalConfig::default())
    }

    fn ids(results: &[RetrievedChunk]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn top_k_zero_is_empty() {
        let r = retriever(store_with(&[("a", "rust graph")]));
        let opts = QueryOptions {
            top_k: Some(0),
            ..QueryOptions::default()
        };
        assert!(r.retrieve_with("rust", &opts).unwrap().is_empty());
    }

    #[test]
    fn best_lexical_and_semantic_match_ranks_first() {
        let r = retriever(store_with(&[
            ("a", "tokio runtime schedules async tasks"),
            ("b", "redb stores tables on disk"),
            ("c", "tantivy indexes text for search"),
        ]));
        let results = r.retrieve("redb tables").unwrap();
        assert_eq!(results[0].id, "b");
        assert!(matches!(results[0].source, Source::Direct));
        assert!(results[0].score.is_some());
    }

    #[test]
    fn embedder_failure_falls_back_to_fulltext() {
        let store = store_with(&[("a", "alpha beta"), ("b", "gamma delta")]);
        let r = Retriever::new(store, Arc::new(Broken), RetrievalConfig::default());
        let results = r.retrieve("gamma").unwrap();
        assert_eq!(ids(&results), vec!["b"]);
    }

    /// c1 mentions acme, c2 mentions widget, and acme makes widgets.
    fn linked_store() -> Arc<MemoryGraphStore> {
        let store = store_with(&[
            ("c1", "acme quarterly earnings"),
            ("c2", "widgets shipped overseas"),
            ("c3", "harbor logistics report"),
        ]);
        let entity = |id: &str| Entity {
            id: id.into(),
            name: id.into(),
            kind: "org".into(),
        };
        let mention = |chunk: &str, entity: &str| Mention {
            chunk_id: chunk.into(),
            entity_id: entity.into(),
        };
        store.merge_entities(&[entity("acme"), entity("widget")]).unwrap();
        store
            .merge_relations(&[Relation {
                src: "acme".into(),
                dst: "widget".into(),
                kind: "makes".into(),
            }])
            .unwrap();
        store
            .merge_mentions(&[mention("c1", "acme"), mention("c2", "widget")])
            .unwrap();
        store
    }

    #[test]
    fn context_follows_direct_hits_within_top_k() {
        // Without a vector signal only c1 matches directly.
        let r = Retriever::new(linked_store(), Arc::new(Broken), RetrievalConfig::default());
        let opts = QueryOptions {
            top_k: Some(2),
            ..QueryOptions::default()
        };
        let results = r.retrieve_with("earnings", &opts).unwrap();
        assert_eq!(ids(&results), vec!["c1", "c2"]);
        assert_eq!(results[1].source, Source::GraphContext { hops: 1 });
        assert_eq!(results[1].score, None);
    }

    #[test]
    fn direct_hits_that_fill_top_k_leave_no_context() {
        // Every chunk is embedded, so the vector scan alone returns top_k.
        let r = retriever(linked_store());
        let opts = QueryOptions {
            top_k: Some(2),
            ..QueryOptions::default()
        };
        let results = r.retrieve_with("earnings", &opts).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.source == Source::Direct));
    }

    #[test]
    fn unreachable_store_surfaces() {
        let store = store_with(&[("a", "alpha")]);
        store.fail_next(10);
        let r = retriever(store);
        let err = r.retrieve("alpha").unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn options_resolve_against_config() {
        let r = retriever(store_with(&[]));
        let p = r.resolve(&QueryOptions::default());
        assert_eq!((p.top_k, p.alpha, p.expand_hops, p.fan_out), (12, 0.6, 2, 12));

        let p = r.resolve(&QueryOptions {
            top_k: Some(30),
            alpha: Some(f32::NAN),
            expand_hops: Some(0),
            candidate_k: Some(5),
        });
        assert_eq!((p.top_k, p.alpha, p.expand_hops, p.fan_out), (30, 0.6, 0, 30));

        let p = r.resolve(&QueryOptions {
            alpha: Some(3.0),
            ..QueryOptions::default()
        });
        assert_eq!(p.alpha, 1.0);
    }
}
