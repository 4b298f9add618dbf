use crate::{Result, StitchError};
use mosaic_core::{GridCoord, RgbImage};
use std::path::{Path, PathBuf};
use tracing::info;

/// One cut of a source image with its ground-truth position.
#[derive(Debug, Clone)]
pub struct TilePiece {
    pub coord: GridCoord,
    pub x: u32,
    pub y: u32,
    pub image: RgbImage,
}

/// Cut `image` into a `rows` x `cols` grid of equally sized tiles sharing
/// `overlap` pixels with each neighbour.
///
/// Tile size is `(W + overlap * (cols - 1)) / cols` (likewise for height) and
/// tile `(r, c)` starts at `(c * (tile_w - overlap), r * (tile_h - overlap))`.
/// Pixels lost to integer division stay on the right and bottom edges.
pub fn split_into_tiles(image: &RgbImage, rows: u32, cols: u32, overlap: u32) -> Result<Vec<TilePiece>> {
    if rows == 0 || cols == 0 {
        return Err(StitchError::Config("rows and cols must be >= 1".into()));
    }
    let (w, h) = image.dimensions();
    let tile_w = (w + overlap * (cols - 1)) / cols;
    let tile_h = (h + overlap * (rows - 1)) / rows;
    if tile_w <= overlap && cols > 1 || tile_h <= overlap && rows > 1 || tile_w == 0 || tile_h == 0 {
        return Err(StitchError::Config(format!(
            "{w}x{h} image cannot be cut into {rows}x{cols} tiles with {overlap}px overlap"
        )));
    }

    let mut pieces = Vec::with_capacity((rows * cols) as usize);
    for r in 0..rows {
        for c in 0..cols {
            let x = c * (tile_w - overlap.min(tile_w));
            let y = r * (tile_h - overlap.min(tile_h));
            let tile = image::imageops::crop_imm(image, x, y, tile_w, tile_h).to_image();
            pieces.push(TilePiece {
                coord: GridCoord::new(r as i32, c as i32),
                x,
                y,
                image: tile,
            });
        }
    }
    Ok(pieces)
}

/// Save pieces as `tile_<row>_<col>.png` into `dir`, creating it if needed.
pub fn write_tiles(pieces: &[TilePiece], dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|source| StitchError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(pieces.len());
    for p in pieces {
        let path = dir.join(format!("tile_{}_{}.png", p.coord.row, p.coord.col));
        p.image.save(&path).map_err(|source| StitchError::Image {
            path: path.clone(),
            source,
        })?;
        written.push(path);
    }
    info!(tiles = written.len(), dir = %dir.display(), "tiles written");
    Ok(written)
}
