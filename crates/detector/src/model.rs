//! Serialized model artifact: per-feature standardisation plus an
//! isolation-forest ensemble.
//!
//! The artifact is versioned JSON produced by the offline training
//! pipeline. Loading rejects unknown versions and shape mismatches up
//! front, so a bad deploy fails at startup instead of mis-scoring quietly.
//! Scoring reproduces the reference decision function: standardize, average
//! the per-tree isolation path lengths, normalize to the anomaly score
//! `s ∈ (0, 1]`, and return `-s - offset` — more negative = more anomalous.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use helios_core::{FeatureVector, FEATURE_NAMES};

use crate::error::DetectorError;

/// The artifact version this build understands.
pub const ARTIFACT_VERSION: u32 = 1;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Traversal guard against corrupt trees with cycles.
const MAX_TREE_DEPTH: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub feature_names: Vec<String>,
    pub scaler: Scaler,
    pub forest: IsolationForest,
    /// Default score cutoff shipped with the model (callers may override).
    pub threshold: f64,
}

/// Per-feature standardisation fitted at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Scaler {
    fn transform(&self, x: &[f64; 12]) -> [f64; 12] {
        let mut scaled = [0.0; 12];
        for (i, value) in x.iter().enumerate() {
            let std = self.std[i];
            let divisor = if std > f64::EPSILON { std } else { 1.0 };
            scaled[i] = (value - self.mean[i]) / divisor;
        }
        scaled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub trees: Vec<Tree>,
    /// Sub-sample size each tree was grown on.
    pub max_samples: usize,
    /// Score offset fitted at training time.
    pub offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// Flat tree node. `feature < 0` marks a leaf; internal nodes route
/// `x[feature] <= threshold` left, else right.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub feature: i32,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    /// Training samples that reached this node.
    pub size: u32,
}

impl ModelArtifact {
    /// Load and validate an artifact from disk. Any failure here is fatal
    /// at startup (exit code 5).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let bytes = std::fs::read(path.as_ref())?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        artifact.validate()?;
        info!(
            path = %path.as_ref().display(),
            trees = artifact.forest.trees.len(),
            max_samples = artifact.forest.max_samples,
            threshold = artifact.threshold,
            "model artifact loaded"
        );
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), DetectorError> {
        if self.version != ARTIFACT_VERSION {
            return Err(DetectorError::UnsupportedArtifact {
                found: self.version,
                supported: ARTIFACT_VERSION,
            });
        }
        if self.feature_names.len() != FEATURE_NAMES.len() {
            return Err(DetectorError::ArtifactInvalid(format!(
                "expected {} features, artifact has {}",
                FEATURE_NAMES.len(),
                self.feature_names.len()
            )));
        }
        if self.scaler.mean.len() != FEATURE_NAMES.len()
            || self.scaler.std.len() != FEATURE_NAMES.len()
        {
            return Err(DetectorError::ArtifactInvalid(
                "scaler width does not match the feature vector".into(),
            ));
        }
        if self.forest.trees.is_empty() {
            return Err(DetectorError::ArtifactInvalid("empty ensemble".into()));
        }
        if self.forest.max_samples < 2 {
            return Err(DetectorError::ArtifactInvalid(
                "max_samples must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Score a feature vector. More negative = more anomalous.
    pub fn score(&self, features: &FeatureVector) -> Result<f64, DetectorError> {
        let scaled = self.scaler.transform(&features.to_array());

        let mut total_path = 0.0;
        for tree in &self.forest.trees {
            total_path += tree.path_length(&scaled)?;
        }
        let mean_path = total_path / self.forest.trees.len() as f64;

        let anomaly_score = 2f64.powf(-mean_path / average_path_length(self.forest.max_samples));
        Ok(-anomaly_score - self.forest.offset)
    }
}

impl Tree {
    fn path_length(&self, x: &[f64; 12]) -> Result<f64, DetectorError> {
        let mut index = 0usize;
        for depth in 0..MAX_TREE_DEPTH {
            let node = self.nodes.get(index).ok_or_else(|| {
                DetectorError::Inference(format!("node index {index} out of bounds"))
            })?;

            if node.feature < 0 {
                return Ok(depth as f64 + average_path_length(node.size.max(1) as usize));
            }

            let feature = node.feature as usize;
            if feature >= x.len() {
                return Err(DetectorError::Inference(format!(
                    "split on unknown feature {feature}"
                )));
            }

            index = if x[feature] <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
        Err(DetectorError::Inference("tree traversal did not terminate".into()))
    }
}

/// Average unsuccessful-search path length in a binary search tree of `n`
/// samples (the isolation-forest normalizer `c(n)`).
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
