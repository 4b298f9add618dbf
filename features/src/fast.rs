use mosaic_core::{GrayImage, KeyPoint, KeyPoints};
use rayon::prelude::*;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
pub const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum contiguous arc of brighter (or darker) circle pixels.
pub const FAST_ARC_LENGTH: usize = 9;

const RADIUS: i32 = 3;

/// FAST-9 corner detection with 3x3 non-maximum suppression.
///
/// Keypoints carry their corner score as `response`; at most `max_keypoints`
/// of the strongest are returned.
pub fn fast_detect(image: &GrayImage, threshold: u8, max_keypoints: usize) -> KeyPoints {
    let scores = fast_score_map(image, threshold);
    let width = image.width() as usize;
    let height = image.height() as usize;

    let mut keypoints = KeyPoints::new();
    if width <= 2 * RADIUS as usize || height <= 2 * RADIUS as usize {
        return keypoints;
    }

    for y in RADIUS as usize..height - RADIUS as usize {
        for x in RADIUS as usize..width - RADIUS as usize {
            let s = scores[y * width + x];
            if s == 0 || !is_local_max(&scores, width, x, y) {
                continue;
            }
            keypoints.push(KeyPoint::new(x as f64, y as f64).with_response(s as f64));
        }
    }

    keypoints.retain_strongest(max_keypoints);
    keypoints
}

/// Per-pixel corner score, zero where the pixel is not a FAST corner.
pub fn fast_score_map(image: &GrayImage, threshold: u8) -> Vec<u32> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut scores = vec![0u32; width * height];
    if width <= 2 * RADIUS as usize || height <= 2 * RADIUS as usize {
        return scores;
    }

    scores
        .par_chunks_mut(width)
        .enumerate()
        .skip(RADIUS as usize)
        .take(height - 2 * RADIUS as usize)
        .for_each(|(y, row)| {
            for (x, out) in row
                .iter_mut()
                .enumerate()
                .take(width - RADIUS as usize)
                .skip(RADIUS as usize)
            {
                *out = fast_score(image, x as i32, y as i32, threshold);
            }
        });

    scores
}

/// Sum of threshold-exceeding differences along the qualifying arc, or 0 if
/// neither a bright nor a dark arc of [`FAST_ARC_LENGTH`] exists.
///
/// The caller guarantees the full circle lies inside the image.
pub fn fast_score(image: &GrayImage, x: i32, y: i32, threshold: u8) -> u32 {
    let p = image.get_pixel(x as u32, y as u32)[0] as i32;
    let t = threshold as i32;

    let mut ring = [0i32; 16];
    for (v, &(dx, dy)) in ring.iter_mut().zip(CIRCLE_OFFSETS.iter()) {
        *v = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as i32;
    }

    // cheap rejection on the four compass points
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let bright = compass.iter().filter(|&&v| v > p + t).count();
    let dark = compass.iter().filter(|&&v| v < p - t).count();
    if bright < 2 && dark < 2 {
        return 0;
    }

    let bright_score = arc_score(&ring, |v| v > p + t, |v| (v - p - t) as u32);
    let dark_score = arc_score(&ring, |v| v < p - t, |v| (p - t - v) as u32);
    bright_score.max(dark_score)
}

fn arc_score(ring: &[i32; 16], qualifies: impl Fn(i32) -> bool, gain: impl Fn(i32) -> u32) -> u32 {
    let mut run = 0usize;
    let mut longest = 0usize;
    // walk the ring twice to catch arcs that wrap around
    for i in 0..32 {
        if qualifies(ring[i % 16]) {
            run += 1;
            longest = longest.max(run.min(16));
        } else {
            run = 0;
        }
    }
    if longest < FAST_ARC_LENGTH {
        return 0;
    }
    ring.iter().filter(|&&v| qualifies(v)).map(|&v| gain(v)).sum()
}

/// Strictly greater than earlier raster neighbours and at least equal to later
/// ones, so a plateau of equal scores keeps only its first pixel.
fn is_local_max(scores: &[u32], width: usize, x: usize, y: usize) -> bool {
    let s = scores[y * width + x];
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as i32 + dx) as usize;
            let ny = (y as i32 + dy) as usize;
            let n = scores[ny * width + nx];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if n > s || (n == s && earlier) {
                return false;
            }
        }
    }
    true
}
