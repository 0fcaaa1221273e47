//! Session-level anomaly screening.
//!
//! Extracts five features per frame (FWHM, eccentricity, background level,
//! background scatter, star count), standardizes them, and fits an
//! isolation forest with a fixed seed so re-runs over the same session are
//! bit-identical. The rejection categories are a post-hoc heuristic
//! explanation compared against session medians, not the model's actual
//! decision boundary.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{
    BACKGROUND_CLIP_MAX_ITERS, BACKGROUND_CLIP_SIGMA, EPSILON, MIN_SCREENING_FRAMES,
    SCREENING_SEED, SCREENING_SUBSAMPLE, SCREENING_TREES,
};
use crate::error::Result;
use crate::io::fits::read_fits;
use crate::quality::background::sigma_clipped_stats;
use crate::quality::detect::{detect_sources, DetectionConfig};
use crate::quality::metrics::median;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// Expected fraction of outlier frames (default 10%).
    pub contamination: f64,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self { contamination: 0.1 }
    }
}

/// The five features the screening model sees per frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub fwhm: f64,
    pub eccentricity: f64,
    pub background: f64,
    pub background_std: f64,
    pub star_count: f64,
}

const FEATURE_DIM: usize = 5;

impl FrameFeatures {
    fn to_vector(self) -> [f64; FEATURE_DIM] {
        [
            self.fwhm,
            self.eccentricity,
            self.background,
            self.background_std,
            self.star_count,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    PoorSeeing,
    TrackingError,
    HighBackground,
    LowTransparency,
    Anomalous,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoorSeeing => write!(f, "Poor seeing (high FWHM)"),
            Self::TrackingError => write!(f, "Tracking error (elongated stars)"),
            Self::HighBackground => write!(f, "High background (clouds/light pollution)"),
            Self::LowTransparency => write!(f, "Low star count (clouds/transparency)"),
            Self::Anomalous => write!(f, "Anomalous (multiple factors)"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectedFrame {
    pub path: PathBuf,
    pub reason: RejectionReason,
    pub features: FrameFeatures,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeatureStats {
    pub median: f64,
    pub std: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub fwhm: FeatureStats,
    pub background: FeatureStats,
    pub star_count: FeatureStats,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionReport {
    pub total_frames: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub rejection_percentage: f64,
    pub rejected_frames: Vec<RejectedFrame>,
    pub accepted_frames: Vec<PathBuf>,
    pub statistics: SessionStatistics,
}

/// Screening either produces a report or declines with an explicit
/// insufficient-data outcome. Declining is not an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScreeningOutcome {
    InsufficientData { frame_count: usize, required: usize },
    Report(SessionReport),
}

/// Extract screening features from one frame.
///
/// A frame with no detectable sources yields zero FWHM/eccentricity/count,
/// which is exactly the signature the outlier model should see for a
/// clouded-out exposure.
pub fn extract_features(frame_path: &Path) -> Result<FrameFeatures> {
    let frame = read_fits(frame_path)?;
    let background = sigma_clipped_stats(
        &frame.data,
        BACKGROUND_CLIP_SIGMA,
        BACKGROUND_CLIP_MAX_ITERS,
    );
    let sources = detect_sources(&frame.data, &background, &DetectionConfig::default());

    let (fwhm, eccentricity) = if sources.is_empty() {
        (0.0, 0.0)
    } else {
        let fwhm: Vec<f64> = sources.iter().map(|s| s.fwhm).collect();
        let ecc: Vec<f64> = sources.iter().map(|s| s.eccentricity).collect();
        (median(&fwhm), median(&ecc))
    };

    Ok(FrameFeatures {
        fwhm,
        eccentricity,
        background: background.median,
        background_std: background.std,
        star_count: sources.len() as f64,
    })
}

/// Screen a complete imaging session for anomalous frames.
pub fn analyze_session(frame_paths: &[PathBuf], config: &ScreeningConfig) -> ScreeningOutcome {
    let mut features = Vec::with_capacity(frame_paths.len());
    let mut paths = Vec::with_capacity(frame_paths.len());

    for path in frame_paths {
        match extract_features(path) {
            Ok(f) => {
                features.push(f);
                paths.push(path.clone());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "feature extraction failed"),
        }
    }

    if features.len() < MIN_SCREENING_FRAMES {
        return ScreeningOutcome::InsufficientData {
            frame_count: features.len(),
            required: MIN_SCREENING_FRAMES,
        };
    }

    let vectors: Vec<[f64; FEATURE_DIM]> = features.iter().map(|f| f.to_vector()).collect();
    let standardized = standardize(&vectors);

    let mut rng = StdRng::seed_from_u64(SCREENING_SEED);
    let forest = IsolationForest::fit(&standardized, SCREENING_TREES, SCREENING_SUBSAMPLE, &mut rng);
    let scores: Vec<f64> = standardized.iter().map(|x| forest.score(x)).collect();

    // Reject the contamination fraction with the highest anomaly scores;
    // ties break toward the earlier frame so re-runs are stable.
    let n = features.len();
    let reject_count = ((n as f64) * config.contamination).round() as usize;
    let reject_count = reject_count.min(n);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut is_rejected = vec![false; n];
    for &idx in order.iter().take(reject_count) {
        is_rejected[idx] = true;
    }

    let medians = SessionMedians::compute(&features);
    let mut rejected_frames = Vec::with_capacity(reject_count);
    let mut accepted_frames = Vec::with_capacity(n - reject_count);
    let mut accepted_features = Vec::with_capacity(n - reject_count);
    for i in 0..n {
        if is_rejected[i] {
            rejected_frames.push(RejectedFrame {
                path: paths[i].clone(),
                reason: medians.categorize(&features[i]),
                features: features[i],
            });
        } else {
            accepted_frames.push(paths[i].clone());
            accepted_features.push(features[i]);
        }
    }

    info!(
        total = n,
        rejected = rejected_frames.len(),
        "session screening complete"
    );

    ScreeningOutcome::Report(SessionReport {
        total_frames: frame_paths.len(),
        accepted: accepted_frames.len(),
        rejected: rejected_frames.len(),
        rejection_percentage: rejected_frames.len() as f64 / frame_paths.len() as f64 * 100.0,
        rejected_frames,
        accepted_frames,
        statistics: SessionStatistics::compute(&accepted_features),
    })
}

/// Session medians used to explain rejections, checked in priority order.
struct SessionMedians {
    fwhm: f64,
    background: f64,
    star_count: f64,
}

impl SessionMedians {
    fn compute(features: &[FrameFeatures]) -> Self {
        let fwhm: Vec<f64> = features.iter().map(|f| f.fwhm).filter(|v| *v > 0.0).collect();
        let background: Vec<f64> = features.iter().map(|f| f.background).collect();
        let star_count: Vec<f64> = features.iter().map(|f| f.star_count).collect();
        Self {
            fwhm: if fwhm.is_empty() { 0.0 } else { median(&fwhm) },
            background: median(&background),
            star_count: median(&star_count),
        }
    }

    fn categorize(&self, f: &FrameFeatures) -> RejectionReason {
        if self.fwhm > 0.0 && f.fwhm > self.fwhm * 1.5 {
            RejectionReason::PoorSeeing
        } else if f.eccentricity > 0.3 {
            RejectionReason::TrackingError
        } else if f.background > self.background * 1.3 {
            RejectionReason::HighBackground
        } else if f.star_count < self.star_count * 0.6 {
            RejectionReason::LowTransparency
        } else {
            RejectionReason::Anomalous
        }
    }
}

impl SessionStatistics {
    fn compute(accepted: &[FrameFeatures]) -> Self {
        let fwhm: Vec<f64> = accepted.iter().map(|f| f.fwhm).filter(|v| *v > 0.0).collect();
        let background: Vec<f64> = accepted.iter().map(|f| f.background).collect();
        let star_count: Vec<f64> = accepted.iter().map(|f| f.star_count).collect();
        Self {
            fwhm: feature_stats(&fwhm),
            background: feature_stats(&background),
            star_count: feature_stats(&star_count),
        }
    }
}

fn feature_stats(values: &[f64]) -> FeatureStats {
    if values.is_empty() {
        return FeatureStats {
            median: 0.0,
            std: 0.0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    FeatureStats {
        median: median(values),
        std: var.sqrt(),
    }
}

/// Z-score each feature column; constant columns map to zero.
fn standardize(vectors: &[[f64; FEATURE_DIM]]) -> Vec<[f64; FEATURE_DIM]> {
    let n = vectors.len() as f64;
    let mut mean = [0.0f64; FEATURE_DIM];
    let mut std = [0.0f64; FEATURE_DIM];
    for v in vectors {
        for d in 0..FEATURE_DIM {
            mean[d] += v[d];
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    for v in vectors {
        for d in 0..FEATURE_DIM {
            let diff = v[d] - mean[d];
            std[d] += diff * diff;
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt();
    }

    vectors
        .iter()
        .map(|v| {
            let mut z = [0.0f64; FEATURE_DIM];
            for d in 0..FEATURE_DIM {
                if std[d] > EPSILON {
                    z[d] = (v[d] - mean[d]) / std[d];
                }
            }
            z
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Isolation forest
// ---------------------------------------------------------------------------

enum IsoNode {
    Split {
        feature: usize,
        value: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
    Leaf {
        size: usize,
    },
}

struct IsolationForest {
    trees: Vec<IsoNode>,
    subsample: usize,
}

impl IsolationForest {
    fn fit(
        data: &[[f64; FEATURE_DIM]],
        n_trees: usize,
        subsample: usize,
        rng: &mut StdRng,
    ) -> Self {
        let psi = subsample.min(data.len());
        let depth_limit = (psi as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let indices = sample_without_replacement(data.len(), psi, rng);
                build_node(data, &indices, 0, depth_limit, rng)
            })
            .collect();

        Self {
            trees,
            subsample: psi,
        }
    }

    /// Anomaly score in (0, 1]; higher is more anomalous.
    fn score(&self, x: &[f64; FEATURE_DIM]) -> f64 {
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.subsample);
        if c <= 0.0 {
            return 0.5;
        }
        2.0f64.powf(-avg_path / c)
    }
}

fn build_node(
    data: &[[f64; FEATURE_DIM]],
    indices: &[usize],
    depth: usize,
    depth_limit: usize,
    rng: &mut StdRng,
) -> IsoNode {
    if indices.len() <= 1 || depth >= depth_limit {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    // A randomly picked feature can be constant in this node; retry a few
    // times before giving up on splitting.
    for _ in 0..FEATURE_DIM {
        let feature = rng.random_range(0..FEATURE_DIM);
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &i in indices {
            min = min.min(data[i][feature]);
            max = max.max(data[i][feature]);
        }
        if max - min < EPSILON {
            continue;
        }
        let value = rng.random_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| data[i][feature] < value);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        return IsoNode::Split {
            feature,
            value,
            left: Box::new(build_node(data, &left, depth + 1, depth_limit, rng)),
            right: Box::new(build_node(data, &right, depth + 1, depth_limit, rng)),
        };
    }

    IsoNode::Leaf {
        size: indices.len(),
    }
}

fn path_length(node: &IsoNode, x: &[f64; FEATURE_DIM], depth: usize) -> f64 {
    match node {
        IsoNode::Leaf { size } => depth as f64 + average_path_length(*size),
        IsoNode::Split {
            feature,
            value,
            left,
            right,
        } => {
            if x[*feature] < *value {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` items.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
    2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
}

/// Partial Fisher-Yates draw of `amount` distinct indices from `0..n`.
fn sample_without_replacement(n: usize, amount: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..amount {
        let j = rng.random_range(i..n);
        pool.swap(i, j);
    }
    pool.truncate(amount);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier(n: usize) -> Vec<[f64; FEATURE_DIM]> {
        let mut data: Vec<[f64; FEATURE_DIM]> = (0..n - 1)
            .map(|i| {
                let t = (i % 5) as f64 * 0.1;
                [2.5 + t, 0.1 + t * 0.1, 100.0 + t, 2.0, 50.0 - t]
            })
            .collect();
        data.push([9.0, 0.9, 400.0, 20.0, 3.0]);
        data
    }

    #[test]
    fn forest_scores_outlier_highest() {
        let data = standardize(&cluster_with_outlier(20));
        let mut rng = StdRng::seed_from_u64(SCREENING_SEED);
        let forest = IsolationForest::fit(&data, SCREENING_TREES, SCREENING_SUBSAMPLE, &mut rng);
        let scores: Vec<f64> = data.iter().map(|x| forest.score(x)).collect();
        let max_idx = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(max_idx, data.len() - 1);
    }

    #[test]
    fn forest_is_deterministic() {
        let data = standardize(&cluster_with_outlier(15));
        let score = |_: ()| {
            let mut rng = StdRng::seed_from_u64(SCREENING_SEED);
            let forest =
                IsolationForest::fit(&data, SCREENING_TREES, SCREENING_SUBSAMPLE, &mut rng);
            data.iter().map(|x| forest.score(x)).collect::<Vec<f64>>()
        };
        assert_eq!(score(()), score(()));
    }

    #[test]
    fn categorization_priority_order() {
        let medians = SessionMedians {
            fwhm: 2.0,
            background: 100.0,
            star_count: 50.0,
        };
        let mut f = FrameFeatures {
            fwhm: 4.0,
            eccentricity: 0.5,
            background: 200.0,
            background_std: 2.0,
            star_count: 10.0,
        };
        // FWHM wins over everything else.
        assert_eq!(medians.categorize(&f), RejectionReason::PoorSeeing);
        f.fwhm = 2.0;
        assert_eq!(medians.categorize(&f), RejectionReason::TrackingError);
        f.eccentricity = 0.1;
        assert_eq!(medians.categorize(&f), RejectionReason::HighBackground);
        f.background = 100.0;
        assert_eq!(medians.categorize(&f), RejectionReason::LowTransparency);
        f.star_count = 50.0;
        assert_eq!(medians.categorize(&f), RejectionReason::Anomalous);
    }
}
