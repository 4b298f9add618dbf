//! ORB (Oriented FAST and Rotated BRIEF)
//!
//! FAST corners are oriented by the intensity centroid of a circular patch and
//! described by a 256-bit BRIEF test set steered to that orientation. The test
//! set is drawn once from a fixed seed, so every detector instance produces
//! comparable descriptors across tiles and across runs.

use crate::descriptor::DescriptorExtractor;
use crate::fast::fast_detect;
use crate::FeatureDetector;
use mosaic_core::{Descriptor, Descriptors, GrayImage, KeyPoint, KeyPoints};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BRIEF_BITS: usize = 256;
const BRIEF_SEED: u64 = 0x0b1e_f5ee_d000_0031;

pub struct Orb {
    n_features: usize,
    scale_factor: f32,
    n_levels: usize,
    patch_size: u32,
    fast_threshold: u8,
    pattern: Vec<(f32, f32, f32, f32)>,
}

impl Default for Orb {
    fn default() -> Self {
        Self {
            n_features: 2000,
            scale_factor: 1.2,
            n_levels: 1,
            patch_size: 31,
            fast_threshold: 20,
            pattern: generate_brief_pattern(31),
        }
    }
}

impl Orb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_features(mut self, n: usize) -> Self {
        self.n_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: usize) -> Self {
        self.n_levels = n.max(1);
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }

    pub fn with_patch_size(mut self, patch_size: u32) -> Self {
        self.patch_size = patch_size;
        self.pattern = generate_brief_pattern(patch_size);
        self
    }

    /// Distance from the image edge inside which a keypoint can be fully
    /// described at any orientation.
    pub fn border(&self) -> u32 {
        let half = self.patch_size as f64 / 2.0;
        (half * std::f64::consts::SQRT_2).ceil() as u32 + 1
    }

    /// FAST keypoints of a single pyramid level, restricted to the describable
    /// interior and capped at `n_features`.
    pub fn detect(&self, image: &GrayImage) -> KeyPoints {
        let border = self.border() as f64;
        let (w, h) = (image.width() as f64, image.height() as f64);

        let mut kps = fast_detect(image, self.fast_threshold, usize::MAX);
        kps.keypoints.retain(|k| {
            k.x >= border && k.y >= border && k.x < w - border && k.y < h - border
        });
        kps.retain_strongest(self.n_features);
        for kp in &mut kps.keypoints {
            kp.size = self.patch_size as f64;
        }
        kps
    }

    /// Intensity-centroid orientation over a disc of radius `patch_size / 2`.
    pub fn compute_orientations(&self, image: &GrayImage, keypoints: &mut KeyPoints) {
        let half_patch = (self.patch_size / 2) as i32;
        let r2 = half_patch * half_patch;
        let (w, h) = (image.width() as i32, image.height() as i32);

        for kp in &mut keypoints.keypoints {
            let x = kp.x as i32;
            let y = kp.y as i32;

            let mut m01 = 0.0f64;
            let mut m10 = 0.0f64;

            for dy in -half_patch..=half_patch {
                for dx in -half_patch..=half_patch {
                    if dx * dx + dy * dy > r2 {
                        continue;
                    }
                    let px = x + dx;
                    let py = y + dy;
                    if px >= 0 && px < w && py >= 0 && py < h {
                        let intensity = image.get_pixel(px as u32, py as u32)[0] as f64;
                        m01 += intensity * dy as f64;
                        m10 += intensity * dx as f64;
                    }
                }
            }

            kp.angle = m01.atan2(m10).to_degrees();
        }
    }

    fn detect_level(&self, image: &GrayImage, level: usize, scale: f32, out: &mut Descriptors) {
        let mut keypoints = self.detect(image);
        self.compute_orientations(image, &mut keypoints);
        let descriptors = self.extract(image, &keypoints);

        let s = scale as f64;
        for mut d in descriptors.descriptors {
            d.keypoint = KeyPoint::new(d.keypoint.x * s, d.keypoint.y * s)
                .with_size(d.keypoint.size * s)
                .with_angle(d.keypoint.angle)
                .with_response(d.keypoint.response)
                .with_octave(level as i32);
            out.push(d);
        }
    }
}

impl DescriptorExtractor for Orb {
    fn extract(&self, image: &GrayImage, keypoints: &KeyPoints) -> Descriptors {
        let mut descriptors = Descriptors::with_capacity(keypoints.len());
        for kp in keypoints.iter() {
            if let Some(desc) = compute_orb_descriptor(image, kp, &self.pattern) {
                descriptors.push(desc);
            }
        }
        descriptors
    }
}

impl FeatureDetector for Orb {
    fn name(&self) -> &'static str {
        "orb"
    }

    fn detect_and_compute(&self, image: &GrayImage) -> Descriptors {
        let mut out = Descriptors::new();
        let mut scale = 1.0f32;

        for level in 0..self.n_levels {
            if level == 0 {
                self.detect_level(image, level, scale, &mut out);
            } else {
                let scaled = scale_image(image, scale);
                if scaled.width() <= 2 * self.border() || scaled.height() <= 2 * self.border() {
                    break;
                }
                self.detect_level(&scaled, level, scale, &mut out);
            }
            scale *= self.scale_factor;
        }

        if self.n_levels > 1 && out.len() > self.n_features {
            out.descriptors.sort_by(|a, b| {
                b.keypoint
                    .response
                    .partial_cmp(&a.keypoint.response)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            out.descriptors.truncate(self.n_features);
        }
        tracing::trace!(features = out.len(), levels = self.n_levels, "orb extraction done");
        out
    }
}

/// 256 point pairs uniformly drawn from the patch square, from a fixed seed.
pub fn generate_brief_pattern(patch_size: u32) -> Vec<(f32, f32, f32, f32)> {
    let mut rng = StdRng::seed_from_u64(BRIEF_SEED);
    let half_size = patch_size as f32 / 2.0;

    (0..BRIEF_BITS)
        .map(|_| {
            (
                rng.gen_range(-half_size..half_size),
                rng.gen_range(-half_size..half_size),
                rng.gen_range(-half_size..half_size),
                rng.gen_range(-half_size..half_size),
            )
        })
        .collect()
}

/// Steered BRIEF descriptor, `None` if any rotated sample leaves the image.
fn compute_orb_descriptor(
    image: &GrayImage,
    kp: &KeyPoint,
    pattern: &[(f32, f32, f32, f32)],
) -> Option<Descriptor> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let cx = kp.x as f32;
    let cy = kp.y as f32;

    let (sin_a, cos_a) = (kp.angle.to_radians() as f32).sin_cos();

    let sample = |x: f32, y: f32| -> Option<u8> {
        let px = (cx + cos_a * x - sin_a * y).round() as i32;
        let py = (cy + sin_a * x + cos_a * y).round() as i32;
        if px < 0 || px >= width || py < 0 || py >= height {
            return None;
        }
        Some(image.get_pixel(px as u32, py as u32)[0])
    };

    let mut data = vec![0u8; BRIEF_BITS / 8];
    for (i, &(x1, y1, x2, y2)) in pattern.iter().enumerate() {
        if sample(x1, y1)? < sample(x2, y2)? {
            data[i / 8] |= 1 << (7 - i % 8);
        }
    }

    Some(Descriptor::binary(data, *kp))
}

fn scale_image(image: &GrayImage, scale: f32) -> GrayImage {
    let new_width = (image.width() as f32 / scale) as u32;
    let new_height = (image.height() as f32 / scale) as u32;

    image::imageops::resize(
        image,
        new_width,
        new_height,
        image::imageops::FilterType::Triangle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{DescriptorData, Luma};
    use rand::rngs::StdRng;

    fn noise_image(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(w, h, |_, _| Luma([rng.gen::<u8>()]))
    }

    #[test]
    fn pattern_is_reproducible() {
        assert_eq!(generate_brief_pattern(31), generate_brief_pattern(31));
    }

    #[test]
    fn descriptors_are_32_bytes_and_inside_border() {
        let img = noise_image(128, 128, 7);
        let orb = Orb::new().with_n_features(200);
        let descs = orb.detect_and_compute(&img);
        assert!(!descs.is_empty());
        assert!(descs.len() <= 200);

        let border = orb.border() as f64;
        for d in descs.iter() {
            assert!(matches!(&d.data, DescriptorData::Binary(b) if b.len() == 32));
            assert!(d.keypoint.x >= border && d.keypoint.x < 128.0 - border);
            assert!(d.keypoint.y >= border && d.keypoint.y < 128.0 - border);
        }
    }

    #[test]
    fn identical_content_gives_identical_features() {
        let img = noise_image(96, 96, 3);
        let orb = Orb::new().with_n_features(100);
        let a = orb.detect_and_compute(&img);
        let b = Orb::new().with_n_features(100).detect_and_compute(&img);
        assert_eq!(a.len(), b.len());
        for (da, db) in a.iter().zip(b.iter()) {
            assert_eq!(da.data, db.data);
            assert_eq!(da.keypoint, db.keypoint);
        }
    }

    #[test]
    fn too_small_image_yields_nothing() {
        let img = noise_image(40, 40, 1);
        assert!(Orb::new().detect_and_compute(&img).is_empty());
    }
}
