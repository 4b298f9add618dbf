use crate::tile_store::TileStore;
use mosaic_core::{Direction, GridCoord, Rect, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeamAdjustment {
    /// Tile whose pixels were rewritten.
    pub corrected: GridCoord,
    /// Tile it was matched to.
    pub reference: GridCoord,
    pub gamma: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeamReport {
    pub adjusted: Vec<SeamAdjustment>,
    pub skipped: Vec<(GridCoord, GridCoord)>,
}

/// Pairwise gamma correction of overlapping neighbours.
///
/// Pairs are visited once each in row-major order of the reference tile, with
/// its right and bottom neighbours as the corrected tile, so a correction
/// spreads away from the origin. Each pair is corrected once; nothing is
/// iterated to convergence.
#[derive(Debug, Default)]
pub struct SeamCorrector;

impl SeamCorrector {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, store: &mut TileStore) -> SeamReport {
        let _span = tracing::info_span!("seam_correction").entered();
        let mut report = SeamReport::default();

        let placed: Vec<GridCoord> = store.placed().map(|t| t.coord()).collect();
        for reference in placed {
            for direction in [Direction::Right, Direction::Bottom] {
                let Some(target) = reference.step(direction) else {
                    continue;
                };
                let Some(overlap) = overlap_of(store, &reference, &target) else {
                    continue;
                };
                let (Some(reference_tile), Some(target_tile)) = (store.get(&reference), store.get(&target)) else {
                    continue;
                };
                let (Some(target_rect), Some(reference_rect)) =
                    (target_tile.placed_rect(), reference_tile.placed_rect())
                else {
                    continue;
                };

                let mean_target = mean_intensity(
                    target_tile.image(),
                    overlap.relative_to(target_rect.x, target_rect.y),
                );
                let mean_reference = mean_intensity(
                    reference_tile.image(),
                    overlap.relative_to(reference_rect.x, reference_rect.y),
                );

                let Some(gamma) = gamma_between(mean_target, mean_reference) else {
                    warn!(%reference, %target, mean_target, mean_reference, "degenerate seam, skipped");
                    report.skipped.push((target, reference));
                    continue;
                };

                let lut = gamma_lut(gamma);
                if let Some(tile) = store.get_mut(&target) {
                    apply_lut(tile.image_mut(), &lut);
                }
                debug!(%reference, %target, gamma, "seam corrected");
                report.adjusted.push(SeamAdjustment {
                    corrected: target,
                    reference,
                    gamma,
                });
            }
        }

        info!(
            adjusted = report.adjusted.len(),
            skipped = report.skipped.len(),
            "seam correction finished"
        );
        report
    }
}

fn overlap_of(store: &TileStore, a: &GridCoord, b: &GridCoord) -> Option<Rect> {
    let ra = store.get(a)?.placed_rect()?;
    let rb = store.get(b)?.placed_rect()?;
    ra.intersect(&rb)
}

/// Mean of all channel samples inside `region`, normalised to `[0, 1]`.
pub fn mean_intensity(image: &RgbImage, region: Rect) -> f64 {
    let bounds = Rect::new(0, 0, image.width(), image.height());
    let Some(r) = region.intersect(&bounds) else {
        return 0.0;
    };
    let mut sum = 0u64;
    for y in r.y..r.bottom() {
        for x in r.x..r.right() {
            let p = image.get_pixel(x as u32, y as u32);
            sum += p[0] as u64 + p[1] as u64 + p[2] as u64;
        }
    }
    sum as f64 / (r.area() * 3) as f64 / 255.0
}

/// `gamma` with `mean_a^gamma = mean_b`, `None` when either mean is 0 or
/// `mean_a` is 1 (no exponent moves it).
pub fn gamma_between(mean_a: f64, mean_b: f64) -> Option<f64> {
    if mean_a <= 0.0 || mean_b <= 0.0 || mean_a >= 1.0 {
        return None;
    }
    let gamma = mean_b.ln() / mean_a.ln();
    gamma.is_finite().then_some(gamma)
}

pub fn gamma_lut(gamma: f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        *out = ((v as f64 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut(image: &mut RgbImage, lut: &[u8; 256]) {
    for v in image.iter_mut() {
        *v = lut[*v as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DuplicatePolicy, Tile};
    use approx::assert_relative_eq;
    use mosaic_core::Rgb;
    use nalgebra::Point2;

    fn placed(coord: GridCoord, v: u8, x: f64, y: f64) -> Tile {
        let mut t = Tile::new(coord, RgbImage::from_pixel(20, 20, Rgb([v, v, v])));
        t.place(Point2::new(x, y)).unwrap();
        t
    }

    #[test]
    fn gamma_solves_the_mean_equation() {
        let g = gamma_between(0.25, 0.5).unwrap();
        assert_relative_eq!(0.25f64.powf(g), 0.5, epsilon = 1e-12);
        assert_eq!(gamma_between(0.0, 0.5), None);
        assert_eq!(gamma_between(0.5, 0.0), None);
        assert_eq!(gamma_between(1.0, 0.5), None);
    }

    #[test]
    fn lut_endpoints_are_fixed() {
        let lut = gamma_lut(2.2);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        assert!(lut[128] < 128);
    }

    #[test]
    fn neighbour_is_pulled_toward_reference_brightness() {
        let mut store = TileStore::new();
        store
            .insert(placed(GridCoord::new(0, 0), 160, 0.0, 0.0), DuplicatePolicy::Error)
            .unwrap();
        store
            .insert(placed(GridCoord::new(0, 1), 80, 15.0, 0.0), DuplicatePolicy::Error)
            .unwrap();

        let report = SeamCorrector::new().apply(&mut store);
        assert_eq!(report.adjusted.len(), 1);
        assert_eq!(report.adjusted[0].corrected, GridCoord::new(0, 1));

        let v = store.get(&GridCoord::new(0, 1)).unwrap().image().get_pixel(0, 0)[0];
        assert!((v as i32 - 160).abs() <= 1, "corrected value {v}");
        let r = store.get(&GridCoord::new(0, 0)).unwrap().image().get_pixel(0, 0)[0];
        assert_eq!(r, 160);
    }

    #[test]
    fn black_overlap_is_skipped() {
        let mut store = TileStore::new();
        store
            .insert(placed(GridCoord::new(0, 0), 0, 0.0, 0.0), DuplicatePolicy::Error)
            .unwrap();
        store
            .insert(placed(GridCoord::new(1, 0), 90, 0.0, 18.0), DuplicatePolicy::Error)
            .unwrap();
        let report = SeamCorrector::new().apply(&mut store);
        assert!(report.adjusted.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            store.get(&GridCoord::new(1, 0)).unwrap().image().get_pixel(0, 0)[0],
            90
        );
    }

    #[test]
    fn tiles_at_the_grid_limit_are_left_alone() {
        let mut store = TileStore::new();
        store
            .insert(placed(GridCoord::new(0, 0), 100, 0.0, 0.0), DuplicatePolicy::Error)
            .unwrap();
        store
            .insert(
                Tile::new(GridCoord::new(i32::MAX, 0), RgbImage::new(20, 20)),
                DuplicatePolicy::Error,
            )
            .unwrap();
        store
            .insert(placed(GridCoord::new(5, i32::MAX), 100, 100.0, 100.0), DuplicatePolicy::Error)
            .unwrap();
        let report = SeamCorrector::new().apply(&mut store);
        assert!(report.adjusted.is_empty() && report.skipped.is_empty());
    }

    #[test]
    fn disjoint_neighbours_are_ignored() {
        let mut store = TileStore::new();
        store
            .insert(placed(GridCoord::new(0, 0), 100, 0.0, 0.0), DuplicatePolicy::Error)
            .unwrap();
        store
            .insert(placed(GridCoord::new(0, 1), 50, 40.0, 0.0), DuplicatePolicy::Error)
            .unwrap();
        let report = SeamCorrector::new().apply(&mut store);
        assert!(report.adjusted.is_empty() && report.skipped.is_empty());
    }
}
