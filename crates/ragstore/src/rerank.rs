//! Post-retrieval reranking.

use async_trait::async_trait;
use ragstore_core::{Result, SearchResult};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Re-scores and reorders search results for a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        cancel: &CancellationToken,
        query: &str,
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>>;
}

/// Default rank constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Reciprocal Rank Fusion: a result at 1-based rank `r` scores `1 / (k + r)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReciprocalRankFusionReranker {
    pub k: f32,
}

impl Default for ReciprocalRankFusionReranker {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl ReciprocalRankFusionReranker {
    /// A non-positive `k` falls back to [`DEFAULT_RRF_K`].
    pub fn new(k: f32) -> Self {
        if k > 0.0 && k.is_finite() {
            Self { k }
        } else {
            Self::default()
        }
    }

    fn rrf(&self, rank: usize) -> f32 {
        1.0 / (self.k + (rank + 1) as f32)
    }

    /// Merge ranked lists by summing each document's RRF scores.
    ///
    /// The first occurrence of a document supplies its fields.
    pub fn combine_ranked_lists(&self, lists: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        for list in lists {
            for (rank, mut r) in list.into_iter().enumerate() {
                let score = self.rrf(rank);
                match merged.get_mut(&r.id) {
                    Some(existing) => existing.score += score,
                    None => {
                        r.score = score;
                        merged.insert(r.id.clone(), r);
                    }
                }
            }
        }
        let mut combined: Vec<_> = merged.into_values().collect();
        sort_desc(&mut combined);
        combined
    }
}

#[async_trait]
impl Reranker for ReciprocalRankFusionReranker {
    async fn rerank(
        &self,
        _cancel: &CancellationToken,
        _query: &str,
        mut results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        for (rank, r) in results.iter_mut().enumerate() {
            r.score = self.rrf(rank);
        }
        Ok(results)
    }
}

type ScoreFn = dyn Fn(&str, &SearchResult) -> f32 + Send + Sync;

/// Reranks with a caller-supplied scoring function. Higher is better.
pub struct CustomScorerReranker {
    score: Box<ScoreFn>,
}

impl CustomScorerReranker {
    pub fn new<F>(score: F) -> Self
    where
        F: Fn(&str, &SearchResult) -> f32 + Send + Sync + 'static,
    {
        Self {
            score: Box::new(score),
        }
    }
}

#[async_trait]
impl Reranker for CustomScorerReranker {
    async fn rerank(
        &self,
        _cancel: &CancellationToken,
        query: &str,
        mut results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        for r in &mut results {
            r.score = (self.score)(query, r);
        }
        sort_desc(&mut results);
        Ok(results)
    }
}

fn sort_desc(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstore_core::Metadata;

    fn result(id: &str, text: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            text: text.to_string(),
            document_name: "doc".to_string(),
            embedding: Vec::new(),
            metadata: Metadata::new(),
            score: 0.0,
        }
    }

    #[test]
    fn test_rrf_k_fallback() {
        assert_eq!(ReciprocalRankFusionReranker::new(0.0).k, 60.0);
        assert_eq!(ReciprocalRankFusionReranker::new(-1.0).k, 60.0);
        assert_eq!(ReciprocalRankFusionReranker::new(10.0).k, 10.0);
    }

    #[tokio::test]
    async fn test_rrf_rerank_keeps_order() {
        let rrf = ReciprocalRankFusionReranker::default();
        let out = rrf
            .rerank(
                &CancellationToken::new(),
                "q",
                vec![result("x", ""), result("y", "")],
            )
            .await
            .unwrap();
        assert_eq!(out[0].id, "x");
        assert!((out[0].score - 1.0 / 61.0).abs() < 1e-7);
        assert!((out[1].score - 1.0 / 62.0).abs() < 1e-7);
    }

    #[test]
    fn test_combine_ranked_lists() {
        let rrf = ReciprocalRankFusionReranker::default();
        let combined = rrf.combine_ranked_lists(vec![
            vec![result("a", ""), result("b", "")],
            vec![result("b", ""), result("c", "")],
        ]);
        let ids: Vec<_> = combined.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((combined[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-7);
    }

    #[test]
    fn test_combine_ties_break_by_id() {
        let rrf = ReciprocalRankFusionReranker::default();
        let combined =
            rrf.combine_ranked_lists(vec![vec![result("z", "")], vec![result("m", "")]]);
        assert_eq!(combined[0].id, "m");
        assert!(rrf.combine_ranked_lists(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_custom_scorer_sorts_descending() {
        let reranker = CustomScorerReranker::new(|query, r| {
            r.text.matches(query).count() as f32
        });
        let out = reranker
            .rerank(
                &CancellationToken::new(),
                "dog",
                vec![
                    result("a", "cat"),
                    result("b", "dog dog"),
                    result("c", "dog"),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(out[0].score, 2.0);
    }
}
