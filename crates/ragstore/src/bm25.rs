//! BM25 keyword scoring over an in-memory corpus.

use std::collections::HashMap;

/// Term-frequency saturation.
pub const K1: f32 = 1.5;
/// Document-length normalization.
pub const B: f32 = 0.75;

/// Lowercase `text` and split it on runs of anything that is not an ASCII
/// letter or digit.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scores documents of one corpus against queries.
///
/// The corpus is tokenized once on construction. Terms that appear in no
/// document contribute nothing to any score.
pub struct Bm25 {
    docs: Vec<HashMap<String, u32>>,
    lengths: Vec<usize>,
    avg_len: f32,
}

impl Bm25 {
    pub fn new<S: AsRef<str>>(corpus: &[S]) -> Self {
        let mut docs = Vec::with_capacity(corpus.len());
        let mut lengths = Vec::with_capacity(corpus.len());
        for text in corpus {
            let tokens = tokenize(text.as_ref());
            lengths.push(tokens.len());
            let mut tf = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_insert(0u32) += 1;
            }
            docs.push(tf);
        }
        let total: usize = lengths.iter().sum();
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total as f32 / docs.len() as f32
        };
        Self {
            docs,
            lengths,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// `ln((N - n + 0.5) / (n + 0.5))`, or `None` when no document has the term.
    ///
    /// Negative for terms present in more than half of the corpus.
    pub fn idf(&self, term: &str) -> Option<f32> {
        let n = self.docs.iter().filter(|d| d.contains_key(term)).count();
        if n == 0 {
            return None;
        }
        let big_n = self.docs.len() as f64;
        let n = n as f64;
        Some(((big_n - n + 0.5) / (n + 0.5)).ln() as f32)
    }

    /// One score per corpus document, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return vec![0.0; self.docs.len()];
        }

        let idfs: Vec<(String, f32)> = terms
            .into_iter()
            .filter_map(|t| self.idf(&t).map(|idf| (t, idf)))
            .collect();

        self.docs
            .iter()
            .zip(&self.lengths)
            .map(|(tf_map, &len)| {
                let len_norm = if self.avg_len > 0.0 {
                    len as f32 / self.avg_len
                } else {
                    0.0
                };
                idfs.iter()
                    .map(|(term, idf)| {
                        let tf = tf_map.get(term).copied().unwrap_or(0) as f32;
                        idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len_norm))
                    })
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== Tokenizer Tests ==========

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! foo_bar-42"),
            vec!["hello", "world", "foo", "bar", "42"]
        );
    }

    #[test]
    fn test_tokenize_empty_and_punctuation() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ...!!! ").is_empty());
    }

    #[test]
    fn test_tokenize_non_ascii_is_separator() {
        assert_eq!(tokenize("café au lait"), vec!["caf", "au", "lait"]);
    }

    // ========== Scoring Tests ==========

    #[test]
    fn test_idf_absent_term() {
        let bm = Bm25::new(&["dog runs fast", "cat sleeps"]);
        assert_eq!(bm.idf("bird"), None);
    }

    #[test]
    fn test_idf_values() {
        let bm = Bm25::new(&["dog", "cat", "cat", "cat"]);
        // N=4, n=1: ln(3.5 / 1.5)
        let dog = bm.idf("dog").unwrap();
        assert!((dog - (3.5f32 / 1.5).ln()).abs() < 1e-6);
        // n=3: ln(1.5 / 3.5) < 0
        assert!(bm.idf("cat").unwrap() < 0.0);
    }

    #[test]
    fn test_rare_term_scores_positive() {
        let bm = Bm25::new(&["dog runs fast", "cat sleeps", "cat eats", "bird sings"]);
        let scores = bm.scores("dog");
        assert!(scores[0] > 0.0);
        assert!(scores[1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_higher_tf_scores_at_least_as_high() {
        let corpus = [
            "apple apple apple banana",
            "apple banana cherry date",
            "cherry date elder fig",
            "grape honeydew kiwi lemon",
            "mango nectarine olive pear",
        ];
        let bm = Bm25::new(&corpus);
        let scores = bm.scores("apple");
        assert!(scores[0] >= scores[1]);
        assert!(scores[1] > scores[2]);
    }

    #[test]
    fn test_monotonic_in_term_frequency() {
        for tf in 1..6 {
            let more = vec!["rust"; tf + 1].join(" ");
            let less = vec!["rust"; tf].join(" ");
            let pad = "x ".repeat(10);
            let corpus = [
                format!("{more} {pad}"),
                format!("{less} {pad}"),
                "a b c".to_string(),
                "d e f".to_string(),
                "g h i".to_string(),
            ];
            let scores = Bm25::new(&corpus).scores("rust");
            assert!(scores[0] >= scores[1], "tf={tf}: {scores:?}");
        }
    }

    #[test]
    fn test_empty_query_and_corpus() {
        let bm = Bm25::new(&["a b", "c d"]);
        assert_eq!(bm.scores("   "), vec![0.0, 0.0]);

        let empty: Bm25 = Bm25::new::<&str>(&[]);
        assert!(empty.is_empty());
        assert!(empty.scores("anything").is_empty());
    }

    #[test]
    fn test_half_corpus_term_has_zero_idf() {
        let bm = Bm25::new(&["dog runs fast", "cat sleeps"]);
        assert_eq!(bm.idf("dog"), Some(0.0));
        assert_eq!(bm.scores("dog"), vec![0.0, 0.0]);
    }
}
