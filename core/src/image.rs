pub use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle `[x, x + width) × [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Overlap of two rectangles, `None` when they share no pixel.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// The same rectangle expressed relative to `origin`.
    pub fn relative_to(&self, origin_x: i64, origin_y: i64) -> Rect {
        Rect::new(self.x - origin_x, self.y - origin_y, self.width, self.height)
    }
}

pub fn convert_rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = rgb.dimensions();
    let mut gray_data = vec![0u8; (w * h) as usize];

    gray_data
        .par_chunks_mut(4096)
        .zip(rgb.as_raw().par_chunks(4096 * 3))
        .for_each(|(g_chunk, rgb_chunk)| {
            for (g, px) in g_chunk.iter_mut().zip(rgb_chunk.chunks_exact(3)) {
                *g = luma(px[0], px[1], px[2]);
            }
        });

    GrayImage::from_raw(w, h, gray_data).unwrap_or_else(|| GrayImage::new(w, h))
}

pub fn convert_gray_to_rgb(gray: &GrayImage) -> RgbImage {
    let (w, h) = gray.dimensions();
    let mut rgb_data = vec![0u8; (w * h) as usize * 3];

    rgb_data
        .par_chunks_mut(3)
        .zip(gray.as_raw().par_iter())
        .for_each(|(rgb_pixel, &g)| {
            rgb_pixel[0] = g;
            rgb_pixel[1] = g;
            rgb_pixel[2] = g;
        });

    RgbImage::from_raw(w, h, rgb_data).unwrap_or_else(|| RgbImage::new(w, h))
}

/// ITU-R BT.601 luma with integer rounding.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Single-channel intensity copy of `rect` (clipped to the image).
pub fn gray_region(rgb: &RgbImage, rect: Rect) -> GrayImage {
    let bounds = Rect::new(0, 0, rgb.width(), rgb.height());
    let Some(r) = rect.intersect(&bounds) else {
        return GrayImage::new(0, 0);
    };
    let x0 = r.x as u32;
    let y0 = r.y as u32;

    GrayImage::from_fn(r.width, r.height, |x, y| {
        let p = rgb.get_pixel(x0 + x, y0 + y);
        Luma([luma(p[0], p[1], p[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping_and_disjoint() {
        let a = Rect::new(0, 0, 100, 80);
        let b = Rect::new(60, 10, 100, 80);
        assert_eq!(a.intersect(&b), Some(Rect::new(60, 10, 40, 70)));

        let c = Rect::new(100, 0, 10, 10);
        assert_eq!(a.intersect(&c), None, "touching edges share no pixel");
    }

    #[test]
    fn gray_region_clips_to_image() {
        let rgb = RgbImage::from_pixel(10, 8, Rgb([255, 255, 255]));
        let g = gray_region(&rgb, Rect::new(6, 4, 10, 10));
        assert_eq!(g.dimensions(), (4, 4));
        assert!(g.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn gray_rgb_conversion_roundtrip_on_neutral_pixels() {
        let gray = GrayImage::from_fn(16, 16, |x, y| Luma([(x * 16 + y) as u8]));
        let back = convert_rgb_to_gray(&convert_gray_to_rgb(&gray));
        assert_eq!(gray, back);
    }
}
