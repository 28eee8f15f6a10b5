//! Recall options and search result types.

use super::{Episode, EpisodeType};

/// Default number of results returned by a recall.
pub const DEFAULT_LIMIT: usize = 10;
/// Default weight applied to synonym-matched terms.
pub const DEFAULT_SYNONYM_WEIGHT: f64 = 0.5;
/// Default blend weight of recency against BM25.
pub const DEFAULT_RECENCY_WEIGHT: f64 = 0.3;
/// Default exponential recency decay rate (per day).
pub const DEFAULT_RECENCY_LAMBDA: f64 = 0.1;
/// Score multiplier applied to superseded episodes.
pub const SUPERSEDED_PENALTY: f64 = 0.3;

/// Filters and ranking knobs for a recall.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Every listed tag must be present (AND).
    pub tags: Vec<String>,
    /// Restrict to a single episode type.
    pub episode_type: Option<EpisodeType>,
    /// Minimum creation time (unix ms, inclusive).
    pub after: Option<i64>,
    /// Maximum creation time (unix ms, inclusive).
    pub before: Option<i64>,
    /// Skip episodes whose decayed importance falls below this.
    pub min_importance: Option<f64>,
    /// Maximum number of results.
    pub limit: usize,
    /// When false (default), superseded episodes are down-ranked.
    pub include_superseded: bool,
    /// Expand the query through the synonym table.
    pub use_synonyms: bool,
    /// Weight of BM25 mass contributed by synonym terms.
    pub synonym_weight: f64,
    /// Blend weight of recency against BM25, in `[0, 1]`.
    pub recency_weight: f64,
    /// Exponential decay rate for the recency term.
    pub recency_lambda: f64,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            episode_type: None,
            after: None,
            before: None,
            min_importance: None,
            limit: DEFAULT_LIMIT,
            include_superseded: false,
            use_synonyms: true,
            synonym_weight: DEFAULT_SYNONYM_WEIGHT,
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            recency_lambda: DEFAULT_RECENCY_LAMBDA,
        }
    }
}

impl RecallOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires all of the given tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts results to one episode type.
    #[must_use]
    pub fn with_type(mut self, episode_type: impl Into<EpisodeType>) -> Self {
        self.episode_type = Some(episode_type.into());
        self
    }

    /// Restricts results to `[after, before]` (unix ms).
    #[must_use]
    pub const fn with_range(mut self, after: Option<i64>, before: Option<i64>) -> Self {
        self.after = after;
        self.before = before;
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Includes superseded episodes at full rank.
    #[must_use]
    pub const fn with_superseded(mut self) -> Self {
        self.include_superseded = true;
        self
    }

    /// Disables synonym expansion.
    #[must_use]
    pub const fn without_synonyms(mut self) -> Self {
        self.use_synonyms = false;
        self
    }

    /// Clamps out-of-range weights into their valid intervals.
    ///
    /// Bad weights are a configuration mistake, not a query failure, so they
    /// are repaired here rather than rejected at search time.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let clamp_unit = |v: f64, name: &str| {
            if (0.0..=1.0).contains(&v) {
                v
            } else {
                let fixed = v.clamp(0.0, 1.0);
                tracing::warn!(weight = name, given = v, used = fixed, "Clamped weight");
                fixed
            }
        };
        self.recency_weight = clamp_unit(self.recency_weight, "recency_weight");
        self.synonym_weight = clamp_unit(self.synonym_weight, "synonym_weight");
        if self.recency_lambda < 0.0 {
            tracing::warn!(given = self.recency_lambda, "Clamped recency_lambda to 0");
            self.recency_lambda = 0.0;
        }
        self
    }
}

/// A ranked match from the in-memory index. Carries only the id and score
/// components; the episode body is hydrated lazily from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Episode id.
    pub id: String,
    /// Final blended score.
    pub score: f64,
    /// BM25 component (query terms plus weighted synonym terms).
    pub bm25: f64,
    /// Recency component in `(0, 1]`.
    pub recency: f64,
}

/// A hydrated recall result: the episode plus its score breakdown.
#[derive(Debug, Clone)]
pub struct RecalledEpisode {
    /// The full episode, decrypted if it was stored sealed.
    pub episode: Episode,
    /// Final blended score.
    pub score: f64,
    /// BM25 component.
    pub bm25: f64,
    /// Recency component.
    pub recency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = RecallOptions::default();
        assert_eq!(opts.limit, 10);
        assert!(opts.use_synonyms);
        assert!(!opts.include_superseded);
        assert!((opts.synonym_weight - 0.5).abs() < f64::EPSILON);
        assert!((opts.recency_weight - 0.3).abs() < f64::EPSILON);
        assert!((opts.recency_lambda - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_chain() {
        let opts = RecallOptions::new()
            .with_tags(["a", "b"])
            .with_type("trade")
            .with_limit(5)
            .with_superseded()
            .without_synonyms();
        assert_eq!(opts.tags.len(), 2);
        assert_eq!(opts.episode_type, Some(EpisodeType::Trade));
        assert_eq!(opts.limit, 5);
        assert!(opts.include_superseded);
        assert!(!opts.use_synonyms);
    }

    #[test]
    fn test_clamping() {
        let mut opts = RecallOptions::new();
        opts.recency_weight = 1.7;
        opts.synonym_weight = -0.4;
        opts.recency_lambda = -1.0;
        let opts = opts.clamped();
        assert!((opts.recency_weight - 1.0).abs() < f64::EPSILON);
        assert!(opts.synonym_weight.abs() < f64::EPSILON);
        assert!(opts.recency_lambda.abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamping_preserves_valid_values() {
        let opts = RecallOptions::new().clamped();
        assert!((opts.recency_weight - DEFAULT_RECENCY_WEIGHT).abs() < f64::EPSILON);
        assert!((opts.synonym_weight - DEFAULT_SYNONYM_WEIGHT).abs() < f64::EPSILON);
    }
}
