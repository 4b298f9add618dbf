use crate::composite::{blend_mask, Composite};
use crate::feature_index::FeatureIndex;
use crate::propagate::PropagationReport;
use crate::tile_store::TileStore;
use crate::{Result, StitchError};
use mosaic_core::{GrayImage, Luma, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::debug;

const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const KEYPOINT_ARM: i64 = 3;

/// Writes intermediate artifacts of a run under one directory:
/// `blend_masks/`, `weight_map.png`, `keypoints/` and `placements.json`.
pub struct DebugWriter {
    dir: PathBuf,
}

impl DebugWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One grayscale image per placed tile showing its soft-blend weight.
    pub fn write_blend_masks(&self, store: &TileStore) -> Result<()> {
        let sub = self.dir.join("blend_masks");
        create_dir(&sub)?;
        for tile in store.placed() {
            let (w, h) = (tile.width(), tile.height());
            let mask = blend_mask(w, h);
            let img = GrayImage::from_fn(w, h, |x, y| {
                Luma([(mask[(y * w + x) as usize] * 255.0).round() as u8])
            });
            let c = tile.coord();
            save(&img, &sub.join(format!("blend_tile_{}_{}.png", c.row, c.col)))?;
        }
        Ok(())
    }

    /// Accumulated weight scaled to `255 * w / max(w)`.
    pub fn write_weight_map(&self, composite: &Composite) -> Result<()> {
        let max = composite.max_weight();
        let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
        let w = composite.extent.width;
        let img = GrayImage::from_fn(w, composite.extent.height, |x, y| {
            let v = composite.weights[(y * w + x) as usize] * scale;
            Luma([v.round().clamp(0.0, 255.0) as u8])
        });
        save(&img, &self.dir.join("weight_map.png"))
    }

    /// Every cached crop of every tile with its keypoints marked.
    pub fn write_keypoints(&self, store: &TileStore, index: &FeatureIndex) -> Result<()> {
        let sub = self.dir.join("keypoints");
        create_dir(&sub)?;
        for tile in store.tiles() {
            for set in index.cached(tile) {
                let region = set
                    .crop
                    .region(tile.width(), tile.height(), index.overlap_px());
                if region.is_empty() {
                    continue;
                }
                let mut img = image::imageops::crop_imm(
                    tile.image(),
                    region.x as u32,
                    region.y as u32,
                    region.width,
                    region.height,
                )
                .to_image();
                for d in set.descriptors.iter() {
                    draw_cross(&mut img, d.keypoint.x.round() as i64, d.keypoint.y.round() as i64);
                }
                let c = tile.coord();
                save(&img, &sub.join(format!("kp_{}_{}_{}.png", c.row, c.col, set.crop)))?;
            }
        }
        Ok(())
    }

    pub fn write_placements(&self, report: &PropagationReport) -> Result<()> {
        let path = self.dir.join("placements.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json).map_err(|source| StitchError::Io { path, source })
    }
}

fn draw_cross(img: &mut RgbImage, cx: i64, cy: i64) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for d in -KEYPOINT_ARM..=KEYPOINT_ARM {
        for (x, y) in [(cx + d, cy), (cx, cy + d)] {
            if x >= 0 && y >= 0 && x < w && y < h {
                img.put_pixel(x as u32, y as u32, KEYPOINT_COLOR);
            }
        }
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| StitchError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn save<P, C>(img: &image::ImageBuffer<P, C>, path: &Path) -> Result<()>
where
    P: image::Pixel + image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
    C: std::ops::Deref<Target = [P::Subpixel]>,
{
    debug!(path = %path.display(), "writing debug image");
    img.save(path).map_err(|source| StitchError::Image {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::Compositor;
    use crate::{BlendMode, DuplicatePolicy, Tile};
    use mosaic_core::GridCoord;
    use nalgebra::Point2;

    #[test]
    fn writes_masks_weight_map_and_placements() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = TileStore::new();
        let mut t = Tile::new(GridCoord::ORIGIN, RgbImage::from_pixel(12, 8, Rgb([9, 9, 9])));
        t.place(Point2::new(0.0, 0.0)).unwrap();
        store.insert(t, DuplicatePolicy::Error).unwrap();

        let writer = DebugWriter::new(tmp.path().join("debug")).unwrap();
        writer.write_blend_masks(&store).unwrap();
        let composite = Compositor::new(BlendMode::Soft).composite(&store).unwrap();
        writer.write_weight_map(&composite).unwrap();
        writer.write_placements(&PropagationReport::default()).unwrap();

        let mask = image::open(writer.dir().join("blend_masks/blend_tile_0_0.png"))
            .unwrap()
            .to_luma8();
        assert_eq!(mask.dimensions(), (12, 8));
        assert_eq!(mask.get_pixel(0, 0)[0], 3);

        let weights = image::open(writer.dir().join("weight_map.png")).unwrap().to_luma8();
        assert_eq!(weights.dimensions(), (12, 8));
        assert!(weights.pixels().any(|p| p[0] == 255));
        assert!(writer.dir().join("placements.json").exists());
    }
}
