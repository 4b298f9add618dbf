use crate::descriptor::DescriptorExtractor;
use crate::FeatureDetector;
use mosaic_core::{Descriptor, Descriptors, GrayImage, KeyPoint, KeyPoints};
use rayon::prelude::*;

const PATCH_WINDOW: i32 = 16;
const PATCH_CELLS: i32 = 8;

/// Harris corners with a normalised intensity-patch descriptor.
///
/// The descriptor is the 16x16 window around the corner pooled to 8x8 cells,
/// shifted to zero mean and scaled to unit length, which makes it invariant to
/// brightness offset and gain between tiles.
pub struct Harris {
    block_size: i32,
    k: f64,
    threshold_rel: f64,
    max_features: usize,
}

impl Default for Harris {
    fn default() -> Self {
        Self {
            block_size: 3,
            k: 0.04,
            threshold_rel: 0.01,
            max_features: 2000,
        }
    }
}

impl Harris {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k(mut self, k: f64) -> Self {
        self.k = k;
        self
    }

    pub fn with_threshold_rel(mut self, threshold_rel: f64) -> Self {
        self.threshold_rel = threshold_rel;
        self
    }

    pub fn with_max_features(mut self, n: usize) -> Self {
        self.max_features = n;
        self
    }

    pub fn border(&self) -> i32 {
        PATCH_WINDOW / 2 + 1
    }

    pub fn detect(&self, image: &GrayImage) -> KeyPoints {
        let responses = harris_response(image, self.block_size, self.k);
        let max = responses.iter().cloned().fold(0.0f64, f64::max);
        if max <= 0.0 {
            return KeyPoints::new();
        }
        let mut kps = harris_peaks(
            &responses,
            image.width() as i32,
            image.height() as i32,
            self.threshold_rel * max,
            self.border(),
        );
        kps.retain_strongest(self.max_features);
        kps
    }
}

impl DescriptorExtractor for Harris {
    fn extract(&self, image: &GrayImage, keypoints: &KeyPoints) -> Descriptors {
        let mut descriptors = Descriptors::with_capacity(keypoints.len());
        for kp in keypoints.iter() {
            if let Some(data) = patch_descriptor(image, kp.x as i32, kp.y as i32) {
                descriptors.push(Descriptor::float(data, *kp));
            }
        }
        descriptors
    }
}

impl FeatureDetector for Harris {
    fn name(&self) -> &'static str {
        "harris"
    }

    fn detect_and_compute(&self, image: &GrayImage) -> Descriptors {
        let kps = self.detect(image);
        let descriptors = self.extract(image, &kps);
        tracing::trace!(
            corners = kps.len(),
            described = descriptors.len(),
            "harris extraction done"
        );
        descriptors
    }
}

/// Harris response `det(M) - k * trace(M)^2` per pixel, where `M` sums the
/// gradient structure tensor over a `block_size` window.
pub fn harris_response(image: &GrayImage, block_size: i32, k: f64) -> Vec<f64> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let half_block = block_size / 2;
    let stride = image.width() as usize;
    let mut responses = vec![0.0f64; stride * image.height() as usize];
    if width <= 2 * (half_block + 1) || height <= 2 * (half_block + 1) {
        return responses;
    }

    let ix = compute_sobel_x(image);
    let iy = compute_sobel_y(image);

    responses
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as i32;
            if y < half_block + 1 || y >= height - half_block - 1 {
                return;
            }
            for x in (half_block + 1)..(width - half_block - 1) {
                let mut i_xx = 0.0f64;
                let mut i_yy = 0.0f64;
                let mut i_xy = 0.0f64;

                for by in -half_block..=half_block {
                    for bx in -half_block..=half_block {
                        let idx = (y + by) as usize * stride + (x + bx) as usize;
                        let gx = ix[idx] as f64;
                        let gy = iy[idx] as f64;
                        i_xx += gx * gx;
                        i_yy += gy * gy;
                        i_xy += gx * gy;
                    }
                }

                let det = i_xx * i_yy - i_xy * i_xy;
                let trace = i_xx + i_yy;
                row[x as usize] = det - k * trace * trace;
            }
        });

    responses
}

fn harris_peaks(responses: &[f64], width: i32, height: i32, threshold: f64, border: i32) -> KeyPoints {
    let mut keypoints = KeyPoints::new();
    let border = border.max(1);

    for y in border..height - border {
        for x in border..width - border {
            let idx = (y * width + x) as usize;
            let response = responses[idx];
            if response <= threshold {
                continue;
            }

            let mut is_max = true;
            'nbhd: for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let n = responses[((y + dy) * width + (x + dx)) as usize];
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if n > response || (n == response && earlier) {
                        is_max = false;
                        break 'nbhd;
                    }
                }
            }

            if is_max {
                keypoints.push(KeyPoint::new(x as f64, y as f64).with_response(response));
            }
        }
    }

    keypoints
}

/// 64-float pooled patch, `None` if the window leaves the image or is flat.
pub fn patch_descriptor(image: &GrayImage, cx: i32, cy: i32) -> Option<Vec<f32>> {
    let half = PATCH_WINDOW / 2;
    let x0 = cx - half;
    let y0 = cy - half;
    if x0 < 0
        || y0 < 0
        || x0 + PATCH_WINDOW > image.width() as i32
        || y0 + PATCH_WINDOW > image.height() as i32
    {
        return None;
    }

    let cell = PATCH_WINDOW / PATCH_CELLS;
    let mut values = Vec::with_capacity((PATCH_CELLS * PATCH_CELLS) as usize);
    for gy in 0..PATCH_CELLS {
        for gx in 0..PATCH_CELLS {
            let mut sum = 0.0f32;
            for y in 0..cell {
                for x in 0..cell {
                    let px = (x0 + gx * cell + x) as u32;
                    let py = (y0 + gy * cell + y) as u32;
                    sum += image.get_pixel(px, py)[0] as f32;
                }
            }
            values.push(sum / (cell * cell) as f32);
        }
    }

    let mean = values.iter().sum::<f32>() / values.len() as f32;
    for v in &mut values {
        *v -= mean;
    }
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-3 {
        return None;
    }
    for v in &mut values {
        *v /= norm;
    }
    Some(values)
}

fn compute_sobel_x(image: &GrayImage) -> Vec<i16> {
    sobel(image, [-1, 0, 1, -2, 0, 2, -1, 0, 1])
}

fn compute_sobel_y(image: &GrayImage) -> Vec<i16> {
    sobel(image, [-1, -2, -1, 0, 0, 0, 1, 2, 1])
}

fn sobel(image: &GrayImage, kernel: [i32; 9]) -> Vec<i16> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut result = vec![0i16; image.width() as usize * image.height() as usize];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sum = 0i32;
            for ky in 0..3 {
                for kx in 0..3 {
                    let px = x + kx - 1;
                    let py = y + ky - 1;
                    let val = image.get_pixel(px as u32, py as u32)[0] as i32;
                    sum += val * kernel[ky as usize * 3 + kx as usize];
                }
            }
            result[y as usize * image.width() as usize + x as usize] = sum.clamp(-32768, 32767) as i16;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{DescriptorData, Luma};

    fn square() -> GrayImage {
        let mut img = GrayImage::new(50, 50);
        for y in 15..35 {
            for x in 15..35 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        img
    }

    #[test]
    fn square_corners_have_peaks() {
        let kps = Harris::new().detect(&square());
        assert!(!kps.is_empty());
        assert!(kps
            .iter()
            .any(|kp| (kp.x - 15.0).abs() < 2.5 && (kp.y - 15.0).abs() < 2.5));
    }

    #[test]
    fn response_covers_every_pixel_of_thin_and_empty_images() {
        for (w, h) in [(0, 0), (0, 12), (1, 1), (3, 700), (700, 3), (9, 9)] {
            let img = GrayImage::from_pixel(w, h, Luma([40]));
            let r = harris_response(&img, 3, 0.04);
            assert_eq!(r.len(), (w * h) as usize, "{w}x{h}");
            assert!(r.iter().all(|v| *v == 0.0));
        }
        let img = square();
        let r = harris_response(&img, 3, 0.04);
        assert_eq!(r.len(), img.width() as usize * img.height() as usize);
        assert!(r.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::from_pixel(40, 40, Luma([90]));
        assert!(Harris::new().detect_and_compute(&img).is_empty());
    }

    #[test]
    fn patch_descriptor_is_gain_invariant() {
        let img = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 3) % 100) as u8]));
        let bright = GrayImage::from_fn(32, 32, |x, y| Luma([img.get_pixel(x, y)[0] * 2 + 10]));

        let a = patch_descriptor(&img, 16, 16).expect("textured patch");
        let b = patch_descriptor(&bright, 16, 16).expect("textured patch");
        assert_eq!(a.len(), 64);
        let diff: f32 = a.iter().zip(&b).map(|(p, q)| (p - q).abs()).sum();
        assert!(diff < 1e-3, "diff = {diff}");
    }

    #[test]
    fn descriptors_are_float_and_unit_length() {
        let descs = Harris::new().detect_and_compute(&square());
        assert!(!descs.is_empty());
        for d in descs.iter() {
            let DescriptorData::Float(v) = &d.data else {
                panic!("expected float descriptor");
            };
            let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((n - 1.0).abs() < 1e-4);
        }
    }
}
