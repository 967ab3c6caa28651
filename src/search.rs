//! Similarity ranking over a caller-supplied snapshot of records

use std::sync::Arc;

use serde::Serialize;

use crate::embedding::{ensure_text, Embedder};
use crate::error::Result;
use crate::memory::Memory;
use crate::similarity::cosine_similarity;

/// Anything that may carry a fingerprint and can therefore be ranked
pub trait Searchable {
    fn fingerprint(&self) -> Option<&[f32]>;
}

impl Searchable for Memory {
    fn fingerprint(&self) -> Option<&[f32]> {
        self.fingerprint.as_deref()
    }
}

impl<T: Searchable + ?Sized> Searchable for &T {
    fn fingerprint(&self) -> Option<&[f32]> {
        (**self).fingerprint()
    }
}

/// A ranked candidate and its cosine similarity to the query
#[derive(Debug, Clone)]
pub struct SearchHit<'a, T> {
    pub record: &'a T,
    pub score: f64,
}

/// Score, filter, sort and truncate candidates against a query fingerprint.
///
/// Candidates without a fingerprint are skipped. Ties keep input order.
pub fn rank<'a, T: Searchable>(
    query: &[f32],
    candidates: &'a [T],
    top_k: usize,
    similarity_threshold: f64,
) -> Vec<SearchHit<'a, T>> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit<'a, T>> = candidates
        .iter()
        .filter_map(|candidate| {
            let fingerprint = candidate.fingerprint()?;
            let score = cosine_similarity(query, fingerprint);
            (score >= similarity_threshold).then_some(SearchHit {
                record: candidate,
                score,
            })
        })
        .collect();

    // sort_by is stable, so equal scores retain their relative order
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}

/// Semantic search engine: embeds the query and ranks candidates
#[derive(Clone)]
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Rank `candidates` by similarity to `query`.
    ///
    /// Blank queries fail with `InvalidInput`; embedding failures propagate
    /// unchanged. The query is embedded even when there are no candidates.
    pub async fn search<'a, T: Searchable>(
        &self,
        query: &str,
        candidates: &'a [T],
        top_k: usize,
        similarity_threshold: f64,
    ) -> Result<Vec<SearchHit<'a, T>>> {
        ensure_text(query)?;

        let query_fingerprint = self.embedder.embed(query).await?;
        let hits = rank(&query_fingerprint, candidates, top_k, similarity_threshold);

        tracing::debug!(
            candidates = candidates.len(),
            hits = hits.len(),
            top_k,
            similarity_threshold,
            "Ranked search candidates"
        );

        Ok(hits)
    }
}

/// How much of a workspace is reachable by semantic search
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchStats {
    pub total_memories: usize,
    pub searchable_memories: usize,
    pub embedding_coverage: f64,
}

impl SearchStats {
    /// Compute coverage over active records only
    pub fn from_memories<'a>(memories: impl IntoIterator<Item = &'a Memory>) -> Self {
        let (total, searchable) = memories
            .into_iter()
            .filter(|m| m.is_active())
            .fold((0usize, 0usize), |(total, searchable), m| {
                (total + 1, searchable + usize::from(m.is_searchable()))
            });

        Self {
            total_memories: total,
            searchable_memories: searchable,
            embedding_coverage: if total > 0 {
                searchable as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_err;

    #[derive(Debug)]
    struct Candidate {
        name: &'static str,
        fingerprint: Option<Vec<f32>>,
    }

    impl Searchable for Candidate {
        fn fingerprint(&self) -> Option<&[f32]> {
            self.fingerprint.as_deref()
        }
    }

    fn candidate(name: &'static str, fingerprint: Option<Vec<f32>>) -> Candidate {
        Candidate { name, fingerprint }
    }

    fn names<'a>(hits: &[SearchHit<'a, Candidate>]) -> Vec<&'static str> {
        hits.iter().map(|h| h.record.name).collect()
    }

    /// Returns a fixed vector and counts calls
    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            ensure_text(text)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }

        async fn embed_batch(&self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::embedding("model crashed"))
        }

        async fn embed_batch(&self, _texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
            Err(Error::embedding("model crashed"))
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    fn fixed(vector: Vec<f32>) -> Arc<FixedEmbedder> {
        Arc::new(FixedEmbedder {
            vector,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn rank_sorts_filters_and_truncates() {
        let candidates = vec![
            candidate("orthogonal", Some(vec![0.0, 1.0])),
            candidate("close", Some(vec![1.0, 0.2])),
            candidate("exact", Some(vec![2.0, 0.0])),
            candidate("opposite", Some(vec![-1.0, 0.0])),
            candidate("unembedded", None),
        ];

        let hits = rank(&[1.0, 0.0], &candidates, 10, 0.3);
        assert_eq!(names(&hits), vec!["exact", "close"]);

        let hits = rank(&[1.0, 0.0], &candidates, 1, 0.3);
        assert_eq!(names(&hits), vec!["exact"]);

        let hits = rank(&[1.0, 0.0], &candidates, 10, -1.0);
        assert_eq!(names(&hits), vec!["exact", "close", "orthogonal", "opposite"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let candidates = vec![
            candidate("first", Some(vec![1.0, 1.0])),
            candidate("best", Some(vec![1.0, 0.0])),
            candidate("second", Some(vec![1.0, 1.0])),
            candidate("third", Some(vec![1.0, 1.0])),
        ];

        let hits = rank(&[1.0, 0.0], &candidates, 10, 0.0);
        assert_eq!(names(&hits), vec!["best", "first", "second", "third"]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let candidates = vec![candidate("exact", Some(vec![1.0, 0.0]))];
        assert_eq!(rank(&[1.0, 0.0], &candidates, 5, 1.0).len(), 1);
    }

    #[test]
    fn zero_top_k_is_empty() {
        let candidates = vec![candidate("exact", Some(vec![1.0, 0.0]))];
        assert!(rank(&[1.0, 0.0], &candidates, 0, 0.0).is_empty());
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        let candidates = vec![
            candidate("wide", Some(vec![1.0, 0.0, 0.0])),
            candidate("match", Some(vec![1.0, 0.0])),
        ];

        let hits = rank(&[1.0, 0.0], &candidates, 10, -1.0);
        assert_eq!(names(&hits), vec!["match", "wide"]);
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn scores_are_non_increasing_and_threshold_is_monotonic() {
        let embedder = HashEmbedder::new(32);
        let corpus = [
            "rust ownership and borrowing",
            "borrow checker errors",
            "weather forecast for tomorrow",
            "ownership rules in rust",
            "cooking pasta",
            "lifetimes and borrowing",
        ];
        let candidates: Vec<Candidate> = corpus
            .iter()
            .map(|t| candidate(*t, Some(embedder.embed_text(t).unwrap())))
            .collect();
        let query = embedder.embed_text("rust borrowing").unwrap();

        let mut previous = usize::MAX;
        for threshold in [-1.0, -0.5, 0.0, 0.1, 0.3, 0.6, 0.9, 1.0] {
            let hits = rank(&query, &candidates, 100, threshold);
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
            assert!(hits.iter().all(|h| h.score >= threshold));
            assert!(hits.len() <= previous);
            previous = hits.len();
        }

        for top_k in 0..8 {
            let passing = rank(&query, &candidates, usize::MAX, 0.1).len();
            let hits = rank(&query, &candidates, top_k, 0.1);
            assert!(hits.len() <= top_k && hits.len() <= passing);
        }
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_embedding() {
        let embedder = fixed(vec![1.0, 0.0]);
        let engine = SearchEngine::new(embedder.clone());
        let candidates = vec![candidate("exact", Some(vec![1.0, 0.0]))];

        let err = assert_err!(engine.search("", &candidates, 10, 0.3).await);
        assert!(err.is_invalid_input());
        let err = assert_err!(engine.search("  \n", &candidates, 10, 0.3).await);
        assert!(err.is_invalid_input());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_candidates_still_embed_query() {
        let embedder = fixed(vec![1.0, 0.0]);
        let engine = SearchEngine::new(embedder.clone());
        let candidates: Vec<Candidate> = Vec::new();

        let hits = engine.search("x", &candidates, 10, 0.3).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embedding_failure_fails_search() {
        let engine = SearchEngine::new(Arc::new(BrokenEmbedder));
        let candidates = vec![candidate("exact", Some(vec![1.0, 0.0]))];

        let err = assert_err!(engine.search("query", &candidates, 10, 0.3).await);
        assert!(err.is_embedding());
    }

    #[tokio::test]
    async fn search_ranks_memories_by_meaning() {
        let embedder = Arc::new(HashEmbedder::new(256));
        let engine = SearchEngine::new(embedder.clone());
        let owner = uuid::Uuid::new_v4();

        let mut memories = Vec::new();
        for text in ["deploy the service with docker", "grocery list: milk and eggs"] {
            let fingerprint = embedder.embed(text).await.unwrap();
            memories.push(Memory::new("ws", owner, "fact", "misc", text).with_fingerprint(fingerprint));
        }

        let hits = engine
            .search("docker service deploy", &memories, 5, 0.3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "deploy the service with docker");
    }

    #[test]
    fn stats_cover_active_records_only() {
        let owner = uuid::Uuid::new_v4();
        let searchable = Memory::new("ws", owner, "fact", "a", "one").with_fingerprint(vec![1.0]);
        let unsearchable = Memory::new("ws", owner, "fact", "a", "two");
        let mut deleted = Memory::new("ws", owner, "fact", "a", "three").with_fingerprint(vec![1.0]);
        deleted.lifecycle = crate::memory::Lifecycle::Deleted;

        let stats = SearchStats::from_memories([&searchable, &unsearchable, &deleted]);
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.searchable_memories, 1);
        assert!((stats.embedding_coverage - 0.5).abs() < 1e-9);

        let empty = SearchStats::from_memories(std::iter::empty());
        assert_eq!(empty.embedding_coverage, 0.0);
    }
}
