//! Evaluation results
//!
//! A successful evaluation yields [`Scores`]; any failure is an
//! [`EvaluationError`]. Workers report either as one JSON object on the last
//! non-empty line of stdout, where a string `error` key signals failure.
//! Non-finite values travel as the strings `"inf"`, `"-inf"` and `"nan"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Metric name to value, produced once per evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scores(BTreeMap<String, f64>);

impl Scores {
    /// Create empty scores
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric (builder style)
    #[inline]
    #[must_use]
    pub fn with(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.0.insert(metric.into(), value);
        self
    }

    /// Value of `metric`, if present
    #[inline]
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    /// Metrics in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of metrics
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no metrics
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Scores {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Display for Scores {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (metric, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{metric}: {value}")?;
        }
        f.write_str("}")
    }
}

/// Why an evaluation produced no scores
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// Worker exceeded its time budget and was killed
    #[error("timeout")]
    Timeout,

    /// Worker exited without reporting anything
    #[error("no_result")]
    NoResult,

    /// Evaluation routine raised, or returned something other than scores
    #[error("{0}")]
    Exception(String),
}

impl EvaluationError {
    /// Short classification for logs
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NoResult => "no_result",
            Self::Exception(_) => "exception",
        }
    }
}

/// Outcome of one evaluation
pub type EvaluationResult = Result<Scores, EvaluationError>;

/// Message a worker sends back across the isolation boundary
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerMessage {
    Scores(Scores),
    Failure(String),
}

impl WorkerMessage {
    /// Decode captured stdout
    ///
    /// Returns `None` when no result line exists or the last line is not
    /// JSON; the worker then counts as having produced nothing.
    pub(crate) fn decode(output: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(output);
        let line = text.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
        let value: Value = serde_json::from_str(line).ok()?;

        let map = match value {
            Value::Object(map) => map,
            other => {
                return Some(Self::Failure(format!(
                    "evaluation routine must return a mapping of scores, got {other}"
                )));
            }
        };

        if let Some(error) = map.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Some(Self::Failure(message));
        }

        let mut scores = BTreeMap::new();
        for (metric, value) in map {
            match wire_number(&value) {
                Some(v) => {
                    scores.insert(metric, v);
                }
                None => {
                    return Some(Self::Failure(format!(
                        "score '{metric}' is not a number: {value}"
                    )));
                }
            }
        }
        Some(Self::Scores(Scores(scores)))
    }

    pub(crate) fn into_result(self) -> EvaluationResult {
        match self {
            Self::Scores(scores) => Ok(scores),
            Self::Failure(message) => Err(EvaluationError::Exception(message)),
        }
    }
}

fn wire_number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => match s.as_str() {
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            "nan" => Some(f64::NAN),
            _ => None,
        },
        other => other.as_f64(),
    }
}
