use mosaic_core::{Descriptors, GrayImage, KeyPoints};

/// Describes already-detected keypoints. Keypoints that cannot be described
/// (too close to the border, degenerate patch) are dropped from the output.
pub trait DescriptorExtractor {
    fn extract(&self, image: &GrayImage, keypoints: &KeyPoints) -> Descriptors;
}
