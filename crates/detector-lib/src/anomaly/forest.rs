//! Isolation forest outlier scoring
//!
//! An ensemble of random isolation trees, each grown on a sub-sample of the
//! training set. Points that are isolated in few splits are anomalous.
//! Scores follow the usual convention: `-2^(-E[h(x)] / c(n))`, in `(-1, 0)`,
//! more negative meaning more anomalous.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use super::features::{Features, NUM_FEATURES};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Default number of trees in the ensemble
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Default upper bound on the per-tree sub-sample size
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Default RNG seed so training is reproducible
pub const DEFAULT_SEED: u64 = 42;

/// Isolation forest hyperparameters
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Expected fraction of outliers in the training data
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: 0.1,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// A single isolation tree
#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(rows: &[Features], indices: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_node(rows, indices, 0, max_depth, rng),
        }
    }

    /// Path length of a point, adjusted for unsplit leaf sizes
    pub fn path_length(&self, row: &Features) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

fn grow_node(
    rows: &[Features],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary within finite bounds can split this node
    let mut candidates: Vec<(usize, f64, f64)> = Vec::with_capacity(NUM_FEATURES);
    for feature in 0..NUM_FEATURES {
        let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(rows[i][feature]), hi.max(rows[i][feature]))
        });
        if max > min && (max - min).is_finite() {
            candidates.push((feature, min, max));
        }
    }
    if candidates.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| rows[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow_node(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(grow_node(rows, right, depth + 1, max_depth, rng)),
    }
}

/// Average path length of an unsuccessful BST search over `n` points
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

/// Fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    /// Scores below this are labelled outliers
    offset: f64,
}

impl IsolationForest {
    /// Fit the forest on standardized feature rows
    pub fn fit(rows: &[Features], config: &ForestConfig) -> Result<Self> {
        if rows.is_empty() {
            bail!("cannot fit isolation forest on an empty training set");
        }
        if !(config.contamination > 0.0 && config.contamination <= 0.5) {
            bail!(
                "contamination must be in (0, 0.5], got {}",
                config.contamination
            );
        }

        let sample_size = config.max_samples.min(rows.len()).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.n_estimators.max(1))
            .map(|_| {
                let indices = sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::grow(rows, indices, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };

        let training_scores = forest.score_samples(rows);
        forest.offset = percentile(&training_scores, config.contamination * 100.0);
        Ok(forest)
    }

    /// Anomaly score per row; more negative is more anomalous
    pub fn score_samples(&self, rows: &[Features]) -> Vec<f64> {
        let normalizer = average_path_length(self.sample_size);
        rows.iter()
            .map(|row| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
                    / self.trees.len() as f64;
                if normalizer > 0.0 {
                    -(2f64.powf(-mean_depth / normalizer))
                } else {
                    -1.0
                }
            })
            .collect()
    }

    /// Whether a score falls on the outlier side of the fitted offset
    pub fn is_outlier(&self, score: f64) -> bool {
        score < self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Percentile with linear interpolation between closest ranks
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize, seed: u64) -> Vec<Features> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut row = [0.0; NUM_FEATURES];
                for v in row.iter_mut() {
                    *v = rng.gen_range(-1.0..1.0);
                }
                row
            })
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_far_point_scores_lower() {
        let rows = cluster(200, 7);
        let forest = IsolationForest::fit(&rows, &ForestConfig::default()).unwrap();

        let scores = forest.score_samples(&[[0.0; NUM_FEATURES], [8.0; NUM_FEATURES]]);
        assert!(scores[1] < scores[0]);
        assert!(forest.is_outlier(scores[1]));
        assert!(scores.iter().all(|s| *s < 0.0 && *s > -1.0));
    }

    #[test]
    fn test_contamination_sets_training_outlier_rate() {
        let rows = cluster(300, 11);
        let forest = IsolationForest::fit(&rows, &ForestConfig::default()).unwrap();

        let flagged = forest
            .score_samples(&rows)
            .into_iter()
            .filter(|s| forest.is_outlier(*s))
            .count();
        // Roughly 10% of the training rows sit below the offset
        assert!((20..=40).contains(&flagged), "flagged {}", flagged);
    }

    #[test]
    fn test_same_seed_same_model() {
        let rows = cluster(100, 3);
        let a = IsolationForest::fit(&rows, &ForestConfig::default()).unwrap();
        let b = IsolationForest::fit(&rows, &ForestConfig::default()).unwrap();
        assert_eq!(a.score_samples(&rows), b.score_samples(&rows));
        assert_eq!(a.offset(), b.offset());
        assert_eq!(a.n_trees(), DEFAULT_N_ESTIMATORS);
    }

    #[test]
    fn test_non_finite_feature_never_splits() {
        let mut rows = cluster(50, 5);
        rows[0][3] = f64::INFINITY;
        rows[1][4] = f64::MAX;
        rows[2][4] = -f64::MAX;

        let forest = IsolationForest::fit(&rows, &ForestConfig::default()).unwrap();
        let scores = forest.score_samples(&rows);
        assert_eq!(scores.len(), 50);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(IsolationForest::fit(&[], &ForestConfig::default()).is_err());

        let config = ForestConfig {
            contamination: 0.7,
            ..ForestConfig::default()
        };
        assert!(IsolationForest::fit(&cluster(20, 1), &config).is_err());
    }
}
