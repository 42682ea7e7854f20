//! Population store
//!
//! An append-only list of evaluated programs, ranked on demand by a single
//! primary metric. There is no deduplication and no capacity bound.

use evo_program::Program;
use evo_sandbox::Scores;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default ranking key
pub const DEFAULT_PRIMARY_METRIC: &str = "average_score";

/// Default number of inspirations per prompt
pub const DEFAULT_INSPIRATIONS: usize = 3;

/// A program and the scores it earned
#[derive(Debug, Clone)]
pub struct PopulationEntry {
    program: Program,
    scores: Scores,
    sequence: u64,
}

impl PopulationEntry {
    /// Program
    #[inline]
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Scores
    #[inline]
    #[must_use]
    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    /// Insertion order, starting at zero
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Ranking value for `metric`; missing or NaN ranks lowest
    #[must_use]
    pub fn rank_value(&self, metric: &str) -> f64 {
        match self.scores.get(metric) {
            Some(value) if !value.is_nan() => value,
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Population settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Scalar score key used for ranking
    pub primary_metric: String,
    /// Inspirations shown per prompt
    pub inspirations: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            primary_metric: DEFAULT_PRIMARY_METRIC.to_string(),
            inspirations: DEFAULT_INSPIRATIONS,
        }
    }
}

/// All programs evaluated so far, in insertion order
#[derive(Debug, Clone)]
pub struct PopulationStore {
    entries: Vec<PopulationEntry>,
    primary_metric: String,
    next_sequence: u64,
}

impl Default for PopulationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PopulationStore {
    /// Create empty store ranked by `average_score`
    #[must_use]
    pub fn new() -> Self {
        Self::with_primary_metric(DEFAULT_PRIMARY_METRIC)
    }

    /// Create empty store ranked by `metric`
    #[must_use]
    pub fn with_primary_metric(metric: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            primary_metric: metric.into(),
            next_sequence: 0,
        }
    }

    /// Append an entry
    pub fn add(&mut self, program: Program, scores: Scores) -> &PopulationEntry {
        tracing::info!(
            origin = program.origin(),
            hash = %program.hash().short(),
            %scores,
            "added program to population"
        );
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(PopulationEntry {
            program,
            scores,
            sequence,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Change the ranking key for later queries
    ///
    /// Storage order is untouched.
    pub fn set_primary_metric(&mut self, metric: impl Into<String>) {
        self.primary_metric = metric.into();
    }

    /// Current ranking key
    #[inline]
    #[must_use]
    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[PopulationEntry] {
        &self.entries
    }

    /// Entries best first; ties keep insertion order
    #[must_use]
    pub fn ranked(&self) -> Vec<&PopulationEntry> {
        let metric = self.primary_metric.as_str();
        let mut ranked: Vec<&PopulationEntry> = self.entries.iter().collect();
        // `sort_by` is stable.
        ranked.sort_by(|a, b| descending(a.rank_value(metric), b.rank_value(metric)));
        ranked
    }

    /// Best entry by the primary metric, earliest on ties
    #[must_use]
    pub fn sample(&self) -> Option<&PopulationEntry> {
        self.ranked().into_iter().next()
    }

    /// Entries ranked 2nd through `n + 1`th
    ///
    /// Empty when the store holds fewer than two entries.
    #[must_use]
    pub fn inspirations(&self, n: usize) -> Vec<&PopulationEntry> {
        if self.entries.len() <= 1 {
            return Vec::new();
        }
        self.ranked().into_iter().skip(1).take(n).collect()
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
