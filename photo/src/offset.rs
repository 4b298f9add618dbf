use crate::feature_index::FeatureSet;
use mosaic_core::Correspondence;
use mosaic_features::{Matcher, RATIO_TEST_THRESHOLD};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Translation of tile B relative to tile A, in full-tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
    pub inliers: usize,
}

impl Offset {
    pub fn vector(&self) -> Vector2<f64> {
        Vector2::new(self.dx, self.dy)
    }
}

/// Outcome of one pairwise estimation. `Absent` never means zero
/// displacement; it carries the number of ratio-test survivors for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OffsetEstimate {
    Found(Offset),
    Absent { inliers: usize },
}

impl OffsetEstimate {
    pub fn offset(&self) -> Option<Offset> {
        match self {
            OffsetEstimate::Found(o) => Some(*o),
            OffsetEstimate::Absent { .. } => None,
        }
    }

    pub fn inliers(&self) -> usize {
        match self {
            OffsetEstimate::Found(o) => o.inliers,
            OffsetEstimate::Absent { inliers } => *inliers,
        }
    }
}

/// Ratio-tested nearest-neighbour matching reduced to a per-axis median
/// displacement.
#[derive(Debug, Clone, Copy)]
pub struct OffsetEstimator {
    min_full_inliers: usize,
    min_edge_inliers: usize,
}

impl OffsetEstimator {
    pub fn new(min_full_inliers: usize, min_edge_inliers: usize) -> Self {
        Self {
            min_full_inliers,
            min_edge_inliers,
        }
    }

    /// Minimum inliers for a pair of sets: the full-tile bar when both are full
    /// crops, the edge-band bar otherwise.
    pub fn min_inliers(&self, a: &FeatureSet, b: &FeatureSet) -> usize {
        if a.crop.is_full() && b.crop.is_full() {
            self.min_full_inliers
        } else {
            self.min_edge_inliers
        }
    }

    /// Offset that moves B onto A. Descriptors of `b` are matched against
    /// `a`; `correction` (crop origin on A minus crop origin on B) lifts the
    /// crop-local displacement into full-tile coordinates.
    pub fn estimate(&self, a: &FeatureSet, b: &FeatureSet, correction: Vector2<f64>) -> OffsetEstimate {
        if a.is_empty() || b.is_empty() {
            return OffsetEstimate::Absent { inliers: 0 };
        }

        let matches = Matcher::new()
            .with_ratio_test(RATIO_TEST_THRESHOLD)
            .match_descriptors(&b.descriptors, &a.descriptors);

        let correspondences: Vec<Correspondence> = matches
            .iter()
            .filter_map(|m| {
                let ka = a.descriptors.get(m.train_idx)?.keypoint;
                let kb = b.descriptors.get(m.query_idx)?.keypoint;
                Some(Correspondence::new(
                    Point2::new(ka.x, ka.y),
                    Point2::new(kb.x, kb.y),
                ))
            })
            .collect();

        let inliers = correspondences.len();
        if inliers < self.min_inliers(a, b) {
            return OffsetEstimate::Absent { inliers };
        }

        match median_offset(&correspondences) {
            Some((dx, dy)) => OffsetEstimate::Found(Offset {
                dx: dx + correction.x,
                dy: dy + correction.y,
                inliers,
            }),
            None => OffsetEstimate::Absent { inliers },
        }
    }
}

/// Per-axis median of `train - query`; the two middle values are averaged for
/// an even count.
pub fn median_offset(correspondences: &[Correspondence]) -> Option<(f64, f64)> {
    if correspondences.is_empty() {
        return None;
    }
    let (mut xs, mut ys): (Vec<f64>, Vec<f64>) = correspondences
        .iter()
        .map(|c| {
            let d = c.displacement();
            (d.x, d.y)
        })
        .unzip();
    Some((median(&mut xs), median(&mut ys)))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
