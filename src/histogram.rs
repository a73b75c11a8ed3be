//! Fixed-width binning of decision scores.

use crate::error::{Error, Result};

/// Edges closer than this to the threshold count as lying on it.
const EDGE_EPS: f64 = 1e-9;

/// Where the bin edges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinRange {
    /// Use `ChartConfig::bin_range` as given.
    Fixed,
    /// Cover the observed scores (and the threshold), snapped outward to
    /// whole bins.
    FromScores,
}

/// Everything the score chart needs to know about its layout.
#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub title: String,
    pub bin_width: f64,
    pub bin_range: (f64, f64),
    pub range: BinRange,
    /// Visible x interval.
    pub x_view: (f64, f64),
    /// Visible y interval.
    pub y_view: (f64, f64),
    pub threshold: f64,
    pub x_label: String,
    pub y_label: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            title: "Anomaly score distribution".into(),
            bin_width: 0.01,
            bin_range: (-0.17, 0.26),
            range: BinRange::Fixed,
            x_view: (-0.1, 0.31),
            y_view: (0.0, 100.0),
            threshold: 0.0,
            x_label: "anomaly level".into(),
            y_label: "number of data".into(),
        }
    }
}

impl ChartConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.bin_width > 0.0 && self.bin_width.is_finite()) {
            return Err(Error::Config(format!("bin width must be positive, got {}", self.bin_width)));
        }
        for (name, (lo, hi)) in [("bin range", self.bin_range), ("x view", self.x_view), ("y view", self.y_view)] {
            if !(lo < hi) {
                return Err(Error::Config(format!("{name} is empty: {lo} .. {hi}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

impl Bin {
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    /// Whole bin lies below `threshold`.
    pub fn is_anomalous(&self, threshold: f64) -> bool {
        self.end <= threshold + EDGE_EPS
    }
}

#[derive(Debug, Clone)]
pub struct Histogram {
    pub bins: Vec<Bin>,
    /// Scores below the first bin.
    pub underflow: usize,
    /// Scores above the last bin.
    pub overflow: usize,
}

impl Histogram {
    pub fn build(scores: &[f64], config: &ChartConfig) -> Result<Self> {
        config.validate()?;
        let width = config.bin_width;
        let (start, end) = match config.range {
            BinRange::Fixed => config.bin_range,
            BinRange::FromScores if scores.is_empty() => config.bin_range,
            BinRange::FromScores => {
                let lo = scores.iter().copied().fold(config.threshold, f64::min);
                let hi = scores.iter().copied().fold(config.threshold, f64::max);
                let start = (lo / width).floor() * width;
                let end = (hi / width).ceil() * width;
                (start, if end - start < width { start + width } else { end })
            }
        };
        let n_bins = (((end - start) / width).round() as usize).max(1);
        let edge = |i: usize| if i == n_bins { end } else { start + i as f64 * width };
        let mut bins: Vec<Bin> = (0..n_bins)
            .map(|i| Bin { start: edge(i), end: edge(i + 1), count: 0 })
            .collect();

        let (mut underflow, mut overflow) = (0, 0);
        for &s in scores {
            if s < start {
                underflow += 1;
            } else if s > end {
                overflow += 1;
            } else {
                // The division can land one bin off at an edge; settle it
                // against the edges the bins were built from.
                let mut i = (((s - start) / width).floor() as usize).min(n_bins - 1);
                while i > 0 && s < edge(i) {
                    i -= 1;
                }
                while i + 1 < n_bins && s >= edge(i + 1) {
                    i += 1;
                }
                bins[i].count += 1;
            }
        }
        Ok(Self { bins, underflow, overflow })
    }

    pub fn max_count(&self) -> usize {
        self.bins.iter().map(|b| b.count).max().unwrap_or(0)
    }

    /// Scores that landed in a bin.
    pub fn binned(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
