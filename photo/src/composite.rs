use crate::tile_store::TileStore;
use crate::{BlendMode, Result, StitchError, BLEND_EPSILON, BLEND_WEIGHT_FLOOR};
use mosaic_core::{GridCoord, Rect, RgbImage};
use rayon::prelude::*;
use tracing::info;

/// A tile image at an integer canvas position.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub coord: GridCoord,
    pub image: &'a RgbImage,
    pub x: i64,
    pub y: i64,
}

impl Placement<'_> {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.image.width(), self.image.height())
    }
}

/// Rendered canvas plus the per-pixel accumulated weight (coverage count in
/// hard mode).
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbImage,
    pub weights: Vec<f32>,
    pub extent: Rect,
}

impl Composite {
    pub fn max_weight(&self) -> f32 {
        self.weights.iter().cloned().fold(0.0, f32::max)
    }
}

/// Normalised 1-D ramp `min(t, 1 - t)` over `t = i / (n - 1)`, scaled so its
/// peak is 1. An axis too short to ramp is flat at 1.
pub fn blend_ramp(n: u32) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n as usize];
    }
    let last = (n - 1) as f32;
    let ramp: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f32 / last;
            t.min(1.0 - t)
        })
        .collect();
    let max = ramp.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![1.0; n as usize];
    }
    ramp.into_iter().map(|v| v / max).collect()
}

/// Soft-blend weight of a `width` x `height` tile, row-major, floored at
/// [`BLEND_WEIGHT_FLOOR`].
pub fn blend_mask(width: u32, height: u32) -> Vec<f32> {
    let rx = blend_ramp(width);
    let ry = blend_ramp(height);
    let mut mask = Vec::with_capacity(rx.len() * ry.len());
    for wy in &ry {
        mask.extend(rx.iter().map(|wx| (wx * wy).clamp(BLEND_WEIGHT_FLOOR, 1.0)));
    }
    mask
}

pub struct Compositor {
    mode: BlendMode,
}

impl Compositor {
    pub fn new(mode: BlendMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    /// Bounding rectangle of all placed tiles; unplaced tiles do not count.
    pub fn extent(store: &TileStore) -> Result<Rect> {
        let rects: Vec<Rect> = store.placed().filter_map(|t| t.placed_rect()).collect();
        bounding_rect(&rects).ok_or(StitchError::EmptyCanvas)
    }

    /// Placed tiles of `store` in row-major order at rounded positions.
    pub fn placements(store: &TileStore) -> Vec<Placement<'_>> {
        store
            .placed()
            .filter_map(|t| {
                let r = t.placed_rect()?;
                Some(Placement {
                    coord: t.coord(),
                    image: t.image(),
                    x: r.x,
                    y: r.y,
                })
            })
            .collect()
    }

    pub fn composite(&self, store: &TileStore) -> Result<Composite> {
        let placements = Self::placements(store);
        self.composite_placements(&placements)
    }

    /// Render `placements`. In hard mode later entries overwrite earlier ones;
    /// in soft mode the order does not matter.
    pub fn composite_placements(&self, placements: &[Placement<'_>]) -> Result<Composite> {
        let rects: Vec<Rect> = placements.iter().map(|p| p.rect()).collect();
        let extent = bounding_rect(&rects).ok_or(StitchError::EmptyCanvas)?;
        let _span = tracing::info_span!(
            "composite",
            mode = ?self.mode,
            tiles = placements.len(),
            width = extent.width,
            height = extent.height
        )
        .entered();

        let width = extent.width as usize;
        let height = extent.height as usize;
        let ramps: Vec<(Vec<f32>, Vec<f32>)> = placements
            .iter()
            .map(|p| (blend_ramp(p.image.width()), blend_ramp(p.image.height())))
            .collect();

        let mut pixels = vec![0u8; width * height * 3];
        let mut weights = vec![0f32; width * height];

        pixels
            .par_chunks_mut(width * 3)
            .zip(weights.par_chunks_mut(width))
            .enumerate()
            .for_each(|(row, (out_row, w_row))| {
                let cy = extent.y + row as i64;
                match self.mode {
                    BlendMode::Hard => hard_row(placements, extent, cy, out_row, w_row),
                    BlendMode::Soft => soft_row(placements, &ramps, extent, cy, out_row, w_row),
                }
            });

        let image = RgbImage::from_raw(extent.width, extent.height, pixels)
            .ok_or(StitchError::EmptyCanvas)?;
        info!(width = extent.width, height = extent.height, "canvas composited");

        Ok(Composite {
            image,
            weights,
            extent,
        })
    }
}

fn bounding_rect(rects: &[Rect]) -> Option<Rect> {
    let min_x = rects.iter().map(|r| r.x).min()?;
    let min_y = rects.iter().map(|r| r.y).min()?;
    let max_x = rects.iter().map(|r| r.right()).max()?;
    let max_y = rects.iter().map(|r| r.bottom()).max()?;
    let extent = Rect::new(min_x, min_y, (max_x - min_x) as u32, (max_y - min_y) as u32);
    if extent.is_empty() {
        return None;
    }
    Some(extent)
}

/// Tile row and first canvas column of `p` on canvas row `cy`, if it covers it.
fn row_span(p: &Placement<'_>, extent: Rect, cy: i64) -> Option<(u32, usize)> {
    if cy < p.y || cy >= p.y + p.image.height() as i64 {
        return None;
    }
    Some(((cy - p.y) as u32, (p.x - extent.x) as usize))
}

fn hard_row(placements: &[Placement<'_>], extent: Rect, cy: i64, out: &mut [u8], w_row: &mut [f32]) {
    for p in placements {
        let Some((ty, cx0)) = row_span(p, extent, cy) else {
            continue;
        };
        let tw = p.image.width() as usize;
        let src_start = ty as usize * tw * 3;
        let src = &p.image.as_raw()[src_start..src_start + tw * 3];
        out[cx0 * 3..(cx0 + tw) * 3].copy_from_slice(src);
        for w in &mut w_row[cx0..cx0 + tw] {
            *w += 1.0;
        }
    }
}

fn soft_row(
    placements: &[Placement<'_>],
    ramps: &[(Vec<f32>, Vec<f32>)],
    extent: Rect,
    cy: i64,
    out: &mut [u8],
    w_row: &mut [f32],
) {
    let mut acc = vec![0f32; out.len()];
    for (p, (rx, ry)) in placements.iter().zip(ramps) {
        let Some((ty, cx0)) = row_span(p, extent, cy) else {
            continue;
        };
        let wy = ry[ty as usize];
        let tw = p.image.width() as usize;
        let src_start = ty as usize * tw * 3;
        let src = &p.image.as_raw()[src_start..src_start + tw * 3];
        for (tx, (px, wx)) in src.chunks_exact(3).zip(rx).enumerate() {
            let m = (wx * wy).clamp(BLEND_WEIGHT_FLOOR, 1.0);
            let cx = cx0 + tx;
            acc[cx * 3] += px[0] as f32 * m;
            acc[cx * 3 + 1] += px[1] as f32 * m;
            acc[cx * 3 + 2] += px[2] as f32 * m;
            w_row[cx] += m;
        }
    }

    for (cx, &w) in w_row.iter().enumerate() {
        let denom = w.max(BLEND_EPSILON);
        for c in 0..3 {
            out[cx * 3 + c] = (acc[cx * 3 + c] / denom).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DuplicatePolicy, Tile};
    use approx::assert_relative_eq;
    use mosaic_core::Rgb;
    use nalgebra::Point2;

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn ramp_peaks_at_one_and_touches_zero() {
        let r = blend_ramp(5);
        for (got, want) in r.iter().zip([0.0, 0.5, 1.0, 0.5, 0.0]) {
            assert_relative_eq!(*got, want);
        }
        assert_eq!(blend_ramp(1), vec![1.0]);
        assert_eq!(blend_ramp(2), vec![1.0, 1.0]);
    }

    #[test]
    fn mask_is_floored_and_peaks_at_one() {
        let m = blend_mask(9, 7);
        assert_eq!(m.len(), 63);
        assert_relative_eq!(m[0], BLEND_WEIGHT_FLOOR);
        assert_relative_eq!(m[3 * 9 + 4], 1.0);
        assert!(m.iter().all(|&v| (BLEND_WEIGHT_FLOOR..=1.0).contains(&v)));
    }

    #[test]
    fn extent_ignores_unplaced_and_handles_negative_positions() {
        let mut store = TileStore::new();
        for (c, x, y) in [(0, 0.0, 0.0), (1, 90.2, -5.4)] {
            let mut t = Tile::new(GridCoord::new(0, c), solid(100, 50, 1));
            t.place(Point2::new(x, y)).unwrap();
            store.insert(t, DuplicatePolicy::Error).unwrap();
        }
        store
            .insert(Tile::new(GridCoord::new(5, 5), solid(999, 999, 1)), DuplicatePolicy::Error)
            .unwrap();
        let e = Compositor::extent(&store).unwrap();
        assert_eq!(e, Rect::new(0, -5, 190, 55));
    }

    #[test]
    fn empty_store_is_an_empty_canvas() {
        let store = TileStore::new();
        assert!(matches!(Compositor::extent(&store), Err(StitchError::EmptyCanvas)));
        let c = Compositor::new(BlendMode::Soft);
        assert!(matches!(c.composite(&store), Err(StitchError::EmptyCanvas)));
    }

    #[test]
    fn hard_mode_last_writer_wins() {
        let a = solid(4, 2, 10);
        let b = solid(4, 2, 200);
        let ps = [
            Placement { coord: GridCoord::new(0, 0), image: &a, x: 0, y: 0 },
            Placement { coord: GridCoord::new(0, 1), image: &b, x: 2, y: 0 },
        ];
        let out = Compositor::new(BlendMode::Hard).composite_placements(&ps).unwrap();
        assert_eq!(out.image.dimensions(), (6, 2));
        let row: Vec<u8> = (0..6).map(|x| out.image.get_pixel(x, 0)[0]).collect();
        assert_eq!(row, vec![10, 10, 200, 200, 200, 200]);
        assert_relative_eq!(out.weights[2], 2.0);
    }

    #[test]
    fn soft_blend_of_equal_tiles_is_the_same_value() {
        let a = solid(20, 10, 120);
        let b = solid(20, 10, 120);
        let ps = [
            Placement { coord: GridCoord::new(0, 0), image: &a, x: 0, y: 0 },
            Placement { coord: GridCoord::new(0, 1), image: &b, x: 13, y: 3 },
        ];
        let out = Compositor::new(BlendMode::Soft).composite_placements(&ps).unwrap();
        for (x, y, p) in out.image.enumerate_pixels() {
            let covered = a_covers(x, y) || b_covers(x, y);
            assert_eq!(p[0], if covered { 120 } else { 0 }, "({x}, {y})");
        }

        fn a_covers(x: u32, y: u32) -> bool {
            x < 20 && y < 10
        }
        fn b_covers(x: u32, y: u32) -> bool {
            (13..33).contains(&x) && (3..13).contains(&y)
        }
    }

    #[test]
    fn soft_blend_is_order_independent() {
        let a = RgbImage::from_fn(30, 20, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, 90]));
        let b = RgbImage::from_fn(30, 20, |x, y| Rgb([(y * 5) as u8, 200, (x * 3) as u8]));
        let c = solid(30, 20, 40);
        let fwd = [
            Placement { coord: GridCoord::new(0, 0), image: &a, x: 0, y: 0 },
            Placement { coord: GridCoord::new(0, 1), image: &b, x: 21, y: 2 },
            Placement { coord: GridCoord::new(1, 0), image: &c, x: 5, y: 14 },
        ];
        let mut rev = fwd;
        rev.reverse();

        let soft = Compositor::new(BlendMode::Soft);
        let x = soft.composite_placements(&fwd).unwrap();
        let y = soft.composite_placements(&rev).unwrap();
        assert_eq!(x.extent, y.extent);
        for (p, q) in x.image.pixels().zip(y.image.pixels()) {
            for c in 0..3 {
                assert!((p[c] as i32 - q[c] as i32).abs() <= 1);
            }
        }
        for (wa, wb) in x.weights.iter().zip(&y.weights) {
            assert_relative_eq!(*wa, *wb, epsilon = 1e-5);
        }
    }

    #[test]
    fn zero_overlap_tiling_is_concatenation() {
        let a = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 1]));
        let b = RgbImage::from_fn(8, 6, |x, y| Rgb([200 - x as u8, 100 + y as u8, 2]));
        let ps = [
            Placement { coord: GridCoord::new(0, 0), image: &a, x: 0, y: 0 },
            Placement { coord: GridCoord::new(0, 1), image: &b, x: 8, y: 0 },
        ];
        let hard = Compositor::new(BlendMode::Hard).composite_placements(&ps).unwrap();
        let soft = Compositor::new(BlendMode::Soft).composite_placements(&ps).unwrap();
        assert_eq!(hard.image, soft.image);
        for (x, y, p) in hard.image.enumerate_pixels() {
            let expected = if x < 8 { a.get_pixel(x, y) } else { b.get_pixel(x - 8, y) };
            assert_eq!(p, expected);
        }
    }
}
