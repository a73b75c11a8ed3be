//! Isolation forest.
//!
//! Builds an ensemble of random isolation trees over subsamples of the
//! input. A row's anomaly score comes from the mean depth at which the
//! trees isolate it: short paths mean the row is easy to separate from the
//! rest and therefore unusual.
//!
//! Scores follow the usual convention: `score_samples` lies in `[-1, 0)`
//! and `decision_function` is shifted by an offset fitted from the
//! contamination rate, so that negative decision values are outliers.

use std::fmt;
use std::str::FromStr;

use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};

pub const DEFAULT_TREES: usize = 500;
pub const DEFAULT_CONTAMINATION: f64 = 0.002;
pub const DEFAULT_MAX_FEATURES: usize = 6;
pub const DEFAULT_SEED: u64 = 123;

/// Subsample size cap when `max_samples` is `auto`.
const AUTO_MAX_SAMPLES: usize = 256;
/// Offset used when contamination is `auto`.
const AUTO_OFFSET: f64 = -0.5;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Expected share of outliers in the training data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contamination {
    Auto,
    Fraction(f64),
}

impl fmt::Display for Contamination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contamination::Auto => write!(f, "auto"),
            Contamination::Fraction(c) => write!(f, "{c}"),
        }
    }
}

impl FromStr for Contamination {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Contamination::Auto);
        }
        s.parse::<f64>()
            .map(Contamination::Fraction)
            .map_err(|_| format!("expected a fraction or \"auto\", got {s:?}"))
    }
}

/// Rows drawn for each tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSamples {
    Auto,
    Count(usize),
}

impl fmt::Display for MaxSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxSamples::Auto => write!(f, "auto"),
            MaxSamples::Count(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for MaxSamples {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(MaxSamples::Auto);
        }
        s.parse::<usize>()
            .map(MaxSamples::Count)
            .map_err(|_| format!("expected a row count or \"auto\", got {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub contamination: Contamination,
    /// Features drawn (without replacement) for each tree.
    pub max_features: usize,
    pub max_samples: MaxSamples,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: DEFAULT_TREES,
            contamination: Contamination::Fraction(DEFAULT_CONTAMINATION),
            max_features: DEFAULT_MAX_FEATURES,
            max_samples: MaxSamples::Auto,
            seed: DEFAULT_SEED,
        }
    }
}

impl ForestConfig {
    /// Check the parameters against the width of the data to fit.
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.n_trees == 0 {
            return Err(Error::Config("number of trees must be at least 1".into()));
        }
        if self.max_features == 0 || self.max_features > n_features {
            return Err(Error::Config(format!(
                "max_features must be in 1..={n_features}, got {}",
                self.max_features
            )));
        }
        if let Contamination::Fraction(c) = self.contamination {
            if !(c > 0.0 && c <= 0.5) {
                return Err(Error::Config(format!(
                    "contamination must be in (0, 0.5], got {c}"
                )));
            }
        }
        if self.max_samples == MaxSamples::Count(0) {
            return Err(Error::Config("max_samples must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow<R: AsRef<[f64]>>(
        rows: &[R],
        sample: &mut [usize],
        features: &[usize],
        height_limit: usize,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut nodes = Vec::with_capacity(2 * sample.len());
        grow_node(rows, sample, features, 0, height_limit, rng, &mut nodes);
        Self { nodes }
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[id] {
                Node::Split { feature, threshold, left, right } => {
                    id = if x[feature] <= threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(size),
            }
        }
    }
}

/// Grow the subtree holding `sample` and return its node id.
fn grow_node<R: AsRef<[f64]>>(
    rows: &[R],
    sample: &mut [usize],
    features: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut ChaCha8Rng,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    nodes.push(Node::Leaf { size: sample.len() });
    if depth >= height_limit || sample.len() <= 1 {
        return id;
    }

    let mut order = features.to_vec();
    order.shuffle(rng);
    for feature in order {
        let (lo, hi) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let v = rows[i].as_ref()[feature];
            (lo.min(v), hi.max(v))
        });
        if hi <= lo {
            continue;
        }
        let mut threshold = lo + rng.gen::<f64>() * (hi - lo);
        if threshold >= hi {
            threshold = lo;
        }

        let mut split = 0;
        for k in 0..sample.len() {
            if rows[sample[k]].as_ref()[feature] <= threshold {
                sample.swap(k, split);
                split += 1;
            }
        }
        let (l, r) = sample.split_at_mut(split);
        let left = grow_node(rows, l, features, depth + 1, height_limit, rng, nodes);
        let right = grow_node(rows, r, features, depth + 1, height_limit, rng, nodes);
        nodes[id] = Node::Split { feature, threshold, left, right };
        return id;
    }
    // Every feature is constant over this node.
    id
}

/// Average path length of an unsuccessful BST search over `n` points,
/// used to normalise depths.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(vals: &[f64], q: f64) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IsolationForest {
    config: ForestConfig,
    trees: Vec<IsolationTree>,
    n_features: usize,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
            sample_size: 0,
            offset: AUTO_OFFSET,
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Rows drawn per tree in the last fit.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Shift applied to `score_samples` to get `decision_function`.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Fit the forest to `rows`. Refitting replaces the previous trees.
    pub fn fit<R: AsRef<[f64]>>(&mut self, rows: &[R]) -> Result<()> {
        if rows.is_empty() {
            return Err(Error::Fit("cannot fit on an empty dataset".into()));
        }
        let n_features = rows[0].as_ref().len();
        if n_features == 0 {
            return Err(Error::Fit("rows have no features".into()));
        }
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != n_features {
                return Err(Error::Fit(format!(
                    "row {i}: expected {n_features} values, found {}",
                    row.len()
                )));
            }
            if let Some(v) = row.iter().find(|v| !v.is_finite()) {
                return Err(Error::Fit(format!("row {i}: invalid value {v}")));
            }
        }
        self.config.validate(n_features)?;

        let n = rows.len();
        let sample_size = match self.config.max_samples {
            MaxSamples::Auto => n.min(AUTO_MAX_SAMPLES),
            MaxSamples::Count(c) if c > n => {
                log::warn!("max_samples {c} exceeds {n} rows, using {n}");
                n
            }
            MaxSamples::Count(c) => c,
        };
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut trees = Vec::with_capacity(self.config.n_trees);
        for _ in 0..self.config.n_trees {
            let features = index::sample(&mut rng, n_features, self.config.max_features).into_vec();
            let mut sample = index::sample(&mut rng, n, sample_size).into_vec();
            trees.push(IsolationTree::grow(rows, &mut sample, &features, height_limit, &mut rng));
        }

        self.trees = trees;
        self.n_features = n_features;
        self.sample_size = sample_size;
        self.offset = match self.config.contamination {
            Contamination::Auto => AUTO_OFFSET,
            Contamination::Fraction(c) => percentile(&self.score_samples(rows)?, 100.0 * c),
        };
        log::info!(
            "fitted {} trees on {n} rows (sample size {sample_size}, height limit {height_limit}, offset {:.6})",
            self.trees.len(),
            self.offset
        );
        Ok(())
    }

    /// Raw anomaly score per row in `[-1, 0)`; lower is more anomalous.
    pub fn score_samples<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(Error::Fit("model is not fitted".into()));
        }
        let norm = average_path_length(self.sample_size) * self.trees.len() as f64;
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let x = row.as_ref();
                if x.len() != self.n_features {
                    return Err(Error::Fit(format!(
                        "row {i}: model expects {} values, found {}",
                        self.n_features,
                        x.len()
                    )));
                }
                let depth: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
                // A single-row sample gives norm == 0; every row is then
                // equally (un)isolated.
                let ratio = if norm > 0.0 { depth / norm } else { 1.0 };
                Ok(-(2f64.powf(-ratio)))
            })
            .collect()
    }

    /// `score_samples` shifted by the fitted offset; negative means outlier.
    pub fn decision_function<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<f64>> {
        let offset = self.offset;
        Ok(self.score_samples(rows)?.into_iter().map(|s| s - offset).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize, seed: u64) -> Vec<[f64; 2]> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| [rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)])
            .collect()
    }

    fn config(n_trees: usize, contamination: f64) -> ForestConfig {
        ForestConfig {
            n_trees,
            contamination: Contamination::Fraction(contamination),
            max_features: 2,
            max_samples: MaxSamples::Auto,
            seed: 7,
        }
    }

    #[test]
    fn average_path_length_values() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 50.0), 2.5);
        assert_eq!(percentile(&v, 100.0), 4.0);
    }

    #[test]
    fn scores_in_range() {
        let data = cluster(300, 1);
        let mut f = IsolationForest::new(config(50, 0.1));
        f.fit(&data).unwrap();
        for s in f.score_samples(&data).unwrap() {
            assert!((-1.0..0.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn far_point_scores_lowest() {
        let mut data = cluster(100, 2);
        data.push([1000.0, -1000.0]);
        let mut f = IsolationForest::new(config(100, 0.01));
        f.fit(&data).unwrap();
        let dist = f.decision_function(&data).unwrap();
        let lowest = dist
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(lowest, 100);
        assert!(dist[100] < 0.0);
        assert_eq!(dist.iter().filter(|&&d| d < 0.0).count(), 1);
    }

    #[test]
    fn same_seed_same_scores() {
        let data = cluster(200, 3);
        let mut a = IsolationForest::new(config(30, 0.05));
        let mut b = IsolationForest::new(config(30, 0.05));
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a.decision_function(&data).unwrap(), b.decision_function(&data).unwrap());
        assert_eq!(a.offset(), b.offset());
    }

    #[test]
    fn different_seed_different_scores() {
        let data = cluster(200, 3);
        let mut a = IsolationForest::new(config(30, 0.05));
        let mut b = IsolationForest::new(ForestConfig { seed: 8, ..config(30, 0.05) });
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_ne!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
    }

    #[test]
    fn outlier_rate_tracks_contamination() {
        let data = cluster(1000, 4);
        let mut f = IsolationForest::new(config(100, 0.05));
        f.fit(&data).unwrap();
        let flagged = f.decision_function(&data).unwrap().iter().filter(|&&d| d < 0.0).count();
        assert!((45..=55).contains(&flagged), "flagged {flagged}");
    }

    #[test]
    fn auto_contamination_uses_fixed_offset() {
        let data = cluster(50, 5);
        let mut f = IsolationForest::new(ForestConfig {
            contamination: Contamination::Auto,
            ..config(10, 0.1)
        });
        f.fit(&data).unwrap();
        assert_eq!(f.offset(), -0.5);
    }

    #[test]
    fn sample_size_capped() {
        let data = cluster(1000, 6);
        let mut f = IsolationForest::new(config(5, 0.1));
        f.fit(&data).unwrap();
        assert_eq!(f.sample_size(), 256);

        let small = cluster(40, 6);
        let mut g = IsolationForest::new(ForestConfig {
            max_samples: MaxSamples::Count(100),
            ..config(5, 0.1)
        });
        g.fit(&small).unwrap();
        assert_eq!(g.sample_size(), 40);
    }

    #[test]
    fn single_row_fits() {
        let mut f = IsolationForest::new(config(5, 0.1));
        f.fit(&[[1.0, 2.0]]).unwrap();
        assert_eq!(f.decision_function(&[[1.0, 2.0]]).unwrap(), vec![0.0]);
    }

    #[test]
    fn empty_rejected() {
        let mut f = IsolationForest::new(config(5, 0.1));
        let rows: Vec<[f64; 2]> = Vec::new();
        assert!(matches!(f.fit(&rows), Err(Error::Fit(_))));
    }

    #[test]
    fn non_finite_rejected() {
        let mut f = IsolationForest::new(config(5, 0.1));
        let rows = [[1.0, 2.0], [f64::NAN, 0.0]];
        assert!(matches!(f.fit(&rows), Err(Error::Fit(_))));
    }

    #[test]
    fn unfitted_scoring_rejected() {
        let f = IsolationForest::new(config(5, 0.1));
        assert!(matches!(f.score_samples(&[[0.0, 0.0]]), Err(Error::Fit(_))));
    }

    #[test]
    fn width_mismatch_rejected() {
        let mut f = IsolationForest::new(config(5, 0.1));
        f.fit(&cluster(20, 9)).unwrap();
        assert!(matches!(f.score_samples(&[vec![1.0, 2.0, 3.0]]), Err(Error::Fit(_))));
    }

    #[test]
    fn bad_config_rejected() {
        let data = cluster(20, 9);
        for cfg in [
            ForestConfig { n_trees: 0, ..config(5, 0.1) },
            ForestConfig { max_features: 3, ..config(5, 0.1) },
            config(5, 0.0),
            config(5, 0.7),
            ForestConfig { max_samples: MaxSamples::Count(0), ..config(5, 0.1) },
        ] {
            let mut f = IsolationForest::new(cfg);
            assert!(matches!(f.fit(&data), Err(Error::Config(_))), "{cfg:?}");
        }
    }

    #[test]
    fn parse_config_values() {
        assert_eq!("auto".parse::<Contamination>().unwrap(), Contamination::Auto);
        assert_eq!("0.002".parse::<Contamination>().unwrap(), Contamination::Fraction(0.002));
        assert!("lots".parse::<Contamination>().is_err());
        assert_eq!("AUTO".parse::<MaxSamples>().unwrap(), MaxSamples::Auto);
        assert_eq!("64".parse::<MaxSamples>().unwrap(), MaxSamples::Count(64));
        assert!("-3".parse::<MaxSamples>().is_err());
    }
}
