//! Local features for tile registration.
//!
//! Every detector implements [`FeatureDetector`]: it turns a grayscale region
//! into keypoints paired with descriptors. The rest of the stitching pipeline
//! only ever talks to that trait, so ORB and Harris can be swapped freely as
//! long as one run sticks to one detector (distances are only comparable
//! within a descriptor kind).

pub mod descriptor;
pub mod fast;
pub mod harris;
pub mod matcher;
pub mod orb;

pub use descriptor::*;
pub use fast::*;
pub use harris::*;
pub use matcher::*;
pub use orb::*;

use mosaic_core::{Descriptors, GrayImage};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Invalid detector parameter: {0}")]
    InvalidParameter(String),
}

/// Capability: extract keypoints and descriptors from a grayscale region.
pub trait FeatureDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect_and_compute(&self, image: &GrayImage) -> Descriptors;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Orb,
    Harris,
}

/// Detector settings shared by every [`DetectorKind`]; fields a detector does
/// not use are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    pub max_features: usize,
    pub fast_threshold: u8,
    pub patch_size: u32,
    pub pyramid_levels: usize,
    pub harris_k: f64,
    pub harris_threshold_rel: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Orb,
            max_features: 2000,
            fast_threshold: 20,
            patch_size: 31,
            pyramid_levels: 1,
            harris_k: 0.04,
            harris_threshold_rel: 0.01,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(FeatureError::InvalidParameter(
                "max_features must be >= 1".into(),
            ));
        }
        if self.patch_size < 8 {
            return Err(FeatureError::InvalidParameter(format!(
                "patch_size must be >= 8, got {}",
                self.patch_size
            )));
        }
        if self.pyramid_levels == 0 {
            return Err(FeatureError::InvalidParameter(
                "pyramid_levels must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn FeatureDetector>> {
        self.validate()?;
        Ok(match self.kind {
            DetectorKind::Orb => Box::new(
                Orb::new()
                    .with_n_features(self.max_features)
                    .with_fast_threshold(self.fast_threshold)
                    .with_patch_size(self.patch_size)
                    .with_n_levels(self.pyramid_levels),
            ),
            DetectorKind::Harris => Box::new(
                Harris::new()
                    .with_max_features(self.max_features)
                    .with_k(self.harris_k)
                    .with_threshold_rel(self.harris_threshold_rel),
            ),
        })
    }
}
