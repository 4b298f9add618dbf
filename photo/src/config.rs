use crate::{Result, StitchError};
use mosaic_features::DetectorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Floor of the soft-blend mask, so a covering tile never contributes zero.
pub const BLEND_WEIGHT_FLOOR: f32 = 0.01;

/// Epsilon guarding the final `weighted_sum / weight_sum` division.
pub const BLEND_EPSILON: f32 = 1e-5;

/// How a neighbour's offset is estimated from an already-placed tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Edge bands first, full tiles when the bands give no estimate.
    EdgeThenFull,
    EdgeOnly,
    FullOnly,
    /// No image matching: place every neighbour on the nominal grid step.
    Nominal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjacency {
    Four,
    /// Four sides plus diagonals; diagonal pairs use full-tile matching.
    Eight,
}

/// What the loader does when two files map to the same grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    KeepFirst,
    KeepLast,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Overlap margin between neighbours, also the edge-band width.
    pub overlap_px: u32,
    pub min_full_inliers: usize,
    pub min_edge_inliers: usize,
    pub match_strategy: MatchStrategy,
    pub adjacency: Adjacency,
    pub on_duplicate: DuplicatePolicy,
    pub blend: BlendMode,
    pub seam_correction: bool,
    pub precompute_features: bool,
    pub threads: Option<usize>,
    pub detector: DetectorConfig,
    pub save_grayscale: bool,
    pub debug_dir: Option<PathBuf>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            overlap_px: 100,
            min_full_inliers: 10,
            min_edge_inliers: 5,
            match_strategy: MatchStrategy::EdgeThenFull,
            adjacency: Adjacency::Four,
            on_duplicate: DuplicatePolicy::KeepLast,
            blend: BlendMode::Soft,
            seam_correction: false,
            precompute_features: true,
            threads: None,
            detector: DetectorConfig::default(),
            save_grayscale: false,
            debug_dir: None,
        }
    }
}

impl StitchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StitchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StitchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_full_inliers == 0 || self.min_edge_inliers == 0 {
            return Err(StitchError::Config(
                "inlier thresholds must be >= 1".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(StitchError::Config("threads must be >= 1".into()));
        }
        self.detector.validate()?;
        Ok(())
    }
}
