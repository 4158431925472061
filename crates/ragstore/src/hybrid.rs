//! Weighted fusion of vector and keyword rankings.
//!
//! Vector scores are turned into similarities (`1 - distance`) and divided by
//! the best similarity seen; keyword scores are divided by the best BM25
//! score seen. A leg whose maximum is not positive contributes zero. Each
//! document's fused score is the weighted sum of its normalized leg scores.
//! Ties on the fused score keep the vector leg's order: lower vector rank
//! first, then lower keyword rank (a missing rank sorts last), then ascending
//! document id. With `vector_weight = 1` this reproduces pure vector search
//! order even when every normalized vector score is zero.

use crate::bm25::Bm25;
use ragstore_core::{Error, HybridSearchResult, Result, SearchResult};
use ragstore_store::Filters;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Widest candidate list a single leg contributes.
pub const MAX_CANDIDATES: usize = 100;

/// Candidates fetched per leg for a final `limit`.
pub fn candidate_limit(limit: usize) -> usize {
    limit.saturating_mul(3).min(MAX_CANDIDATES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchOptions {
    pub limit: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Raw BM25 score a keyword candidate needs to enter fusion. 0 keeps
    /// every candidate.
    pub min_keyword_score: f32,
    #[serde(skip)]
    pub filters: Filters,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            min_keyword_score: 0.0,
            filters: Filters::new(),
        }
    }
}

impl HybridSearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_weights(mut self, vector: f32, keyword: f32) -> Self {
        self.vector_weight = vector;
        self.keyword_weight = keyword;
        self
    }

    pub fn with_min_keyword_score(mut self, min: f32) -> Self {
        self.min_keyword_score = min;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Weights scaled to sum to 1.
    ///
    /// Negative, non-finite and all-zero weights are rejected.
    pub fn normalized_weights(&self) -> Result<(f32, f32)> {
        let (v, k) = (self.vector_weight, self.keyword_weight);
        if !v.is_finite() || !k.is_finite() {
            return Err(Error::validation("search weights must be finite"));
        }
        if v < 0.0 || k < 0.0 {
            return Err(Error::validation(format!(
                "search weights cannot be negative (vector_weight={v}, keyword_weight={k})"
            )));
        }
        let total = v + k;
        if total == 0.0 {
            return Err(Error::validation(
                "at least one of vector_weight or keyword_weight must be non-zero",
            ));
        }
        Ok((v / total, k / total))
    }

    /// The keyword score floor, or `None` when no floor applies.
    pub fn keyword_floor(&self) -> Result<Option<f32>> {
        let min = self.min_keyword_score;
        if !min.is_finite() || min < 0.0 {
            return Err(Error::validation(format!(
                "min_keyword_score must be a finite non-negative number, got {min}"
            )));
        }
        Ok((min > 0.0).then_some(min))
    }
}

/// Drop keyword candidates whose raw score is below `min`.
pub fn apply_keyword_floor(keyword: &mut Vec<SearchResult>, min: Option<f32>) {
    if let Some(min) = min {
        keyword.retain(|r| r.score >= min);
    }
}

/// Rank `docs` by BM25 against `query`, best first, keeping at most `limit`.
///
/// Every document is kept, including those sharing no term with the query.
pub fn rank_keyword(docs: Vec<SearchResult>, query: &str, limit: usize) -> Vec<SearchResult> {
    let bm25 = Bm25::new(&docs.iter().map(|d| d.text.as_str()).collect::<Vec<_>>());
    let scores = bm25.scores(query);
    let mut ranked: Vec<SearchResult> = docs
        .into_iter()
        .zip(scores)
        .map(|(mut d, s)| {
            d.score = s;
            d
        })
        .collect();
    ranked.sort_by(|a, b| by_score_desc(a.score, b.score).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(limit);
    ranked
}

/// Merge two ranked legs into one list of at most `limit` results.
///
/// `vector` holds backend distances in `score`, `keyword` holds BM25 scores.
/// Ranks are the 0-based positions within each input list.
pub fn fuse(
    vector: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    vector_weight: f32,
    keyword_weight: f32,
    limit: usize,
) -> Vec<HybridSearchResult> {
    let max_sim = vector
        .iter()
        .map(|r| 1.0 - r.score)
        .fold(0.0f32, f32::max);
    let max_kw = keyword.iter().map(|r| r.score).fold(0.0f32, f32::max);

    let mut merged: HashMap<String, HybridSearchResult> = HashMap::new();

    for (rank, r) in vector.into_iter().enumerate() {
        let norm = if max_sim > 0.0 {
            (1.0 - r.score) / max_sim
        } else {
            0.0
        };
        merged.entry(r.id.clone()).or_insert(HybridSearchResult {
            result: SearchResult {
                score: norm * vector_weight,
                ..r
            },
            vector_score: Some(norm),
            keyword_score: None,
            vector_rank: Some(rank),
            keyword_rank: None,
        });
    }

    for (rank, r) in keyword.into_iter().enumerate() {
        let norm = if max_kw > 0.0 { r.score / max_kw } else { 0.0 };
        let weighted = norm * keyword_weight;
        match merged.get_mut(&r.id) {
            Some(existing) => {
                if existing.keyword_rank.is_none() {
                    existing.result.score += weighted;
                    existing.keyword_score = Some(norm);
                    existing.keyword_rank = Some(rank);
                }
            }
            None => {
                merged.insert(
                    r.id.clone(),
                    HybridSearchResult {
                        result: SearchResult {
                            score: weighted,
                            ..r
                        },
                        vector_score: None,
                        keyword_score: Some(norm),
                        vector_rank: None,
                        keyword_rank: Some(rank),
                    },
                );
            }
        }
    }

    let mut combined: Vec<HybridSearchResult> = merged.into_values().collect();
    combined.sort_by(|a, b| {
        by_score_desc(a.score(), b.score())
            .then_with(|| by_rank(a.vector_rank, b.vector_rank))
            .then_with(|| by_rank(a.keyword_rank, b.keyword_rank))
            .then_with(|| a.id().cmp(b.id()))
    });
    combined.truncate(limit);
    combined
}

fn by_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Present ranks ascending, missing ranks last.
fn by_rank(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
