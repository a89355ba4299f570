//! Score fusion and embedding re-ranking.
//!
//! 1. Normalize each source independently: `score / max(score)`
//! 2. Union the ids and fuse: `alpha * vector + (1 - alpha) * text`
//! 3. Load stored embeddings for the fused set in one read
//! 4. Re-score with cosine(query, stored embedding) where one exists
//! 5. Sort by the best available score, ties by ascending id, truncate

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use crate::{
    error::Result,
    model::{Candidate, ScoredHit},
    store::GraphStore,
};

/// Default weight of the vector signal against the full-text signal.
pub const DEFAULT_ALPHA: f32 = 0.6;

/// Normalize one source's scores into `[0, 1]` by its maximum.
///
/// An all-zero source keeps its scores as-is (divisor `1.0`). Negative and
/// NaN scores count as zero. When an id repeats, its first row wins.
pub fn normalize(hits: &[ScoredHit]) -> HashMap<String, f32> {
    if hits.is_empty() {
        return HashMap::new();
    }

    let max = hits.iter().map(|h| clamp_score(h.score)).fold(0.0, f32::max);
    let divisor = if max == 0.0 { 1.0 } else { max };

    let mut normalized = HashMap::with_capacity(hits.len());
    for hit in hits {
        normalized
            .entry(hit.id.clone())
            .or_insert(clamp_score(hit.score) / divisor);
    }
    normalized
}

fn clamp_score(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score.max(0.0) }
}

/// Fuse vector and full-text hits into candidates ordered by fused score.
///
/// Text for each id comes from whichever list contains it first, vector
/// hits before full-text hits.
pub fn fuse(
    vector_hits: &[ScoredHit],
    text_hits: &[ScoredHit],
    alpha: f32,
) -> Vec<Candidate> {
    let alpha = if alpha.is_nan() {
        DEFAULT_ALPHA
    } else {
        alpha.clamp(0.0, 1.0)
    };
    let v_norm = normalize(vector_hits);
    let f_norm = normalize(text_hits);

    let mut texts: HashMap<&str, &str> = HashMap::new();
    for hit in vector_hits.iter().chain(text_hits) {
        texts.entry(hit.id.as_str()).or_insert(hit.text.as_str());
    }

    let mut candidates: Vec<Candidate> = texts
        .into_iter()
        .map(|(id, text)| {
            let vector_score = v_norm.get(id).copied();
            let text_score = f_norm.get(id).copied();
            let fused_score = alpha * vector_score.unwrap_or(0.0)
                + (1.0 - alpha) * text_score.unwrap_or(0.0);
            Candidate {
                id: id.to_string(),
                text: text.to_string(),
                vector_score,
                text_score,
                fused_score,
                rerank_score: None,
            }
        })
        .collect();

    sort_candidates(&mut candidates);
    candidates
}

/// Cosine similarity; `0.0` when either vector has zero norm.
///
/// Vectors must have the same length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine over mismatched dimensions");

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Attach `rerank_score` from stored embeddings and re-sort.
///
/// Candidates without an embedding of the query's dimension keep their
/// fused score and receive no rerank score.
pub fn rerank(
    query_vector: &[f32],
    mut candidates: Vec<Candidate>,
    embeddings: &HashMap<String, Vec<f32>>,
) -> Vec<Candidate> {
    for candidate in &mut candidates {
        candidate.rerank_score = embeddings
            .get(&candidate.id)
            .filter(|stored| stored.len() == query_vector.len())
            .map(|stored| cosine_similarity(query_vector, stored));
    }

    sort_candidates(&mut candidates);
    candidates
}

/// Descending by best available score, then ascending id.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.best_score()
            .partial_cmp(&a.best_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Fuses gathered candidates and re-ranks them against stored embeddings.
pub struct Merger {
    store: Arc<dyn GraphStore>,
}

impl Merger {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Run fusion, the batched embedding read, and re-ranking.
    ///
    /// Only a connectivity failure of the embedding read is returned as an
    /// error; any other failure falls back to fused-score ordering.
    pub fn merge_and_rerank(
        &self,
        query_vector: &[f32],
        vector_hits: &[ScoredHit],
        text_hits: &[ScoredHit],
        alpha: f32,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        let fused = fuse(vector_hits, text_hits, alpha);
        debug!(
            vector = vector_hits.len(),
            text = text_hits.len(),
            fused = fused.len(),
            "fused candidate sources"
        );

        let mut ranked = if fused.is_empty() || query_vector.is_empty() {
            fused
        } else {
            let ids: Vec<String> = fused.iter().map(|c| c.id.clone()).collect();
            match self.store.chunk_embeddings(&ids) {
                Ok(embeddings) => {
                    debug!(
                        found = embeddings.len(),
                        requested = ids.len(),
                        "loaded stored embeddings"
                    );
                    rerank(query_vector, fused, &embeddings)
                }
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "embedding read failed, keeping fused order");
                    fused
                }
            }
        };

        ranked.truncate(top_k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory_store::MemoryGraphStore, model::Chunk};

    fn hit(id: &str, score: f32) -> ScoredHit {
        ScoredHit::new(id, format!("text of {id}"), score)
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn normalize_bounds_and_max_is_one() {
        let hits = [hit("a", 3.0), hit("b", 1.5), hit("c", 0.0)];
        let norm = normalize(&hits);
        assert!(norm.values().all(|&s| (0.0..=1.0).contains(&s)));
        assert_eq!(norm["a"], 1.0);
        assert_eq!(norm["b"], 0.5);
        assert_eq!(norm["c"], 0.0);
    }

    #[test]
    fn normalize_all_zero_keeps_scores() {
        let norm = normalize(&[hit("a", 0.0), hit("b", 0.0)]);
        assert_eq!(norm["a"], 0.0);
        assert_eq!(norm["b"], 0.0);
    }

    #[test]
    fn normalize_negative_scores_count_as_zero() {
        let norm = normalize(&[hit("a", 0.8), hit("b", -0.4)]);
        assert_eq!(norm["a"], 1.0);
        assert_eq!(norm["b"], 0.0);
    }

    #[test]
    fn fuse_matches_worked_example() {
        let vector = [hit("c1", 0.9), hit("c3", 0.3)];
        let text = [hit("c2", 1.0), hit("c1", 0.4)];

        let fused = fuse(&vector, &text, 0.6);
        assert_eq!(ids(&fused), vec!["c1", "c2", "c3"]);

        let score = |id: &str| {
            fused.iter().find(|c| c.id == id).unwrap().fused_score
        };
        assert!((score("c1") - 0.76).abs() < 1e-6);
        assert!((score("c2") - 0.4).abs() < 1e-6);
        assert!((score("c3") - 0.2).abs() < 1e-5);

        let c1 = &fused[0];
        assert_eq!(c1.vector_score, Some(1.0));
        assert!((c1.text_score.unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn fuse_takes_text_from_first_source() {
        let vector = [ScoredHit::new("x", "from vector", 1.0)];
        let text = [ScoredHit::new("x", "from text", 1.0)];
        let fused = fuse(&vector, &text, 0.5);
        assert_eq!(fused[0].text, "from vector");
    }

    #[test]
    fn fuse_both_sources_empty() {
        assert!(fuse(&[], &[], 0.6).is_empty());
    }

    #[test]
    fn raising_alpha_promotes_vector_leaning_candidate() {
        // "v" is strong on vectors, "t" on text.
        let vector = [hit("v", 1.0), hit("t", 0.2)];
        let text = [hit("t", 1.0), hit("v", 0.3)];

        let rank_of = |alpha: f32, id: &str| {
            fuse(&vector, &text, alpha)
                .iter()
                .position(|c| c.id == id)
                .unwrap()
        };

        assert_eq!(rank_of(0.2, "v"), 1);
        assert_eq!(rank_of(0.8, "v"), 0);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let text = [hit("b", 1.0), hit("a", 1.0), hit("c", 1.0)];
        let first = fuse(&[], &text, 0.6);
        let second = fuse(&[], &text, 0.6);
        assert_eq!(ids(&first), vec!["a", "b", "c"]);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(
            (cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6
        );
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn rerank_uses_stored_embeddings_and_keeps_missing_fused() {
        let vector = [hit("c1", 0.9), hit("c3", 0.3)];
        let text = [hit("c2", 1.0), hit("c1", 0.4)];
        let fused = fuse(&vector, &text, 0.6);

        // c3 points exactly along the query; c1 is orthogonal; c2 has none.
        let embeddings = HashMap::from([
            ("c1".to_string(), vec![0.0, 1.0]),
            ("c3".to_string(), vec![2.0, 0.0]),
        ]);
        let ranked = rerank(&[1.0, 0.0], fused, &embeddings);

        assert_eq!(ids(&ranked), vec!["c3", "c2", "c1"]);
        let c2 = ranked.iter().find(|c| c.id == "c2").unwrap();
        assert_eq!(c2.rerank_score, None);
        assert!((c2.best_score() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn rerank_ignores_mismatched_dimensions() {
        let fused = fuse(&[hit("a", 1.0)], &[], 1.0);
        let embeddings = HashMap::from([("a".to_string(), vec![1.0, 0.0, 0.0])]);
        let ranked = rerank(&[1.0, 0.0], fused, &embeddings);
        assert_eq!(ranked[0].rerank_score, None);
        assert_eq!(ranked[0].best_score(), 1.0);
    }

    #[test]
    fn merger_reads_embeddings_from_store_and_truncates() {
        let store = Arc::new(MemoryGraphStore::new());
        let mut c1 = Chunk::new("c1", "d", "one", 0);
        c1.embedding = Some(vec![0.0, 1.0]);
        let mut c3 = Chunk::new("c3", "d", "three", 2);
        c3.embedding = Some(vec![1.0, 0.0]);
        store
            .merge_chunks(&[c1, Chunk::new("c2", "d", "two", 1), c3])
            .unwrap();

        let merger = Merger::new(store);
        let vector = [hit("c1", 0.9), hit("c3", 0.3)];
        let text = [hit("c2", 1.0), hit("c1", 0.4)];

        let ranked = merger
            .merge_and_rerank(&[1.0, 0.0], &vector, &text, 0.6, 2)
            .unwrap();
        assert_eq!(ids(&ranked), vec!["c3", "c2"]);
    }

    #[test]
    fn merger_without_query_vector_keeps_fused_order() {
        let store = Arc::new(MemoryGraphStore::new());
        let merger = Merger::new(store);
        let vector = [hit("c1", 0.9), hit("c3", 0.3)];
        let text = [hit("c2", 1.0), hit("c1", 0.4)];

        let ranked = merger.merge_and_rerank(&[], &vector, &text, 0.6, 2).unwrap();
        assert_eq!(ids(&ranked), vec!["c1", "c2"]);
        assert!(ranked.iter().all(|c| c.rerank_score.is_none()));
    }

    #[test]
    fn merger_is_stable_across_runs() {
        let store = Arc::new(MemoryGraphStore::new());
        let merger = Merger::new(store);
        let text = [hit("z", 0.5), hit("y", 0.5), hit("x", 0.5)];

        let a = merger.merge_and_rerank(&[1.0], &[], &text, 0.6, 10).unwrap();
        let b = merger.merge_and_rerank(&[1.0], &[], &text, 0.6, 10).unwrap();
        assert_eq!(ids(&a), vec!["x", "y", "z"]);
        assert_eq!(ids(&a), ids(&b));
    }
}
