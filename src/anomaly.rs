//! Anomaly detection over the traffic table.
//!
//! Wraps a fitted detector behind [`AnomalyDetector`] and collects its
//! per-row labels and scores into a [`Detection`].

use std::time::Instant;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::forest::IsolationForest;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Normal,
    Anomalous,
}

impl Label {
    /// `1` for normal rows, `-1` for anomalous ones.
    pub fn as_sign(self) -> i8 {
        match self {
            Label::Normal => 1,
            Label::Anomalous => -1,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Normal => write!(f, "normal"),
            Label::Anomalous => write!(f, "anomalous"),
        }
    }
}

/// A model that can be fitted to a table and then label and score rows.
///
/// Scores are oriented so that lower means more anomalous, and a row is
/// labelled [`Label::Anomalous`] exactly when its score is below
/// [`threshold`](AnomalyDetector::threshold).
pub trait AnomalyDetector {
    fn fit(&mut self, data: &Dataset) -> Result<()>;
    fn score(&self, data: &Dataset) -> Result<Vec<f64>>;
    fn threshold(&self) -> f64;

    fn classify(&self, data: &Dataset) -> Result<Vec<Label>> {
        Ok(label_scores(&self.score(data)?, self.threshold()))
    }
}

/// Label each score: anomalous when strictly below `threshold`.
pub fn label_scores(scores: &[f64], threshold: f64) -> Vec<Label> {
    scores
        .iter()
        .map(|&s| if s < threshold { Label::Anomalous } else { Label::Normal })
        .collect()
}

impl AnomalyDetector for IsolationForest {
    fn fit(&mut self, data: &Dataset) -> Result<()> {
        IsolationForest::fit(self, data.records())
    }

    fn score(&self, data: &Dataset) -> Result<Vec<f64>> {
        self.decision_function(data.records())
    }

    /// Decision scores are already shifted by the contamination offset.
    fn threshold(&self) -> f64 {
        0.0
    }
}

/// Labels and scores for every row of the fitted table, aligned by index.
#[derive(Debug, Clone)]
pub struct Detection {
    pub labels: Vec<Label>,
    pub scores: Vec<f64>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stdev: f64,
}

impl Detection {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows labelled anomalous, in table order.
    pub fn anomaly_indices(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == Label::Anomalous)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn anomaly_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == Label::Anomalous).count()
    }

    pub fn anomaly_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.anomaly_count() as f64 / self.labels.len() as f64
    }

    pub fn score_stats(&self) -> ScoreStats {
        if self.scores.is_empty() {
            return ScoreStats::default();
        }
        let m = mean(&self.scores);
        ScoreStats {
            min: self.scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: self.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: m,
            median: median_of(&self.scores),
            stdev: sample_stdev(&self.scores, m),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

pub fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

pub fn median_of(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

pub fn sample_stdev(vals: &[f64], m: f64) -> f64 {
    if vals.len() < 2 {
        return 0.0;
    }
    let var: f64 = vals.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (vals.len() - 1) as f64;
    var.sqrt()
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Fit `detector` on `data`, then score the same rows once and label them
/// from those scores.
pub fn detect<D: AnomalyDetector + ?Sized>(detector: &mut D, data: &Dataset) -> Result<Detection> {
    let t0 = Instant::now();
    detector.fit(data)?;
    let t1 = Instant::now();
    let scores = detector.score(data)?;
    let threshold = detector.threshold();
    let labels = label_scores(&scores, threshold);
    log::debug!(
        "fit: {:.4}s, score: {:.4}s",
        (t1 - t0).as_secs_f64(),
        t1.elapsed().as_secs_f64()
    );
    Ok(Detection { labels, scores, threshold })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
