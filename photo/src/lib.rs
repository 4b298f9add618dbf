//! Tile-grid mosaicking
//!
//! Assembles a grid of overlapping camera tiles into one composite image:
//!
//! - **TileStore**: tiles keyed by `(row, col)` parsed from `tile_<r>_<c>.<ext>`
//! - **FeatureIndex**: memoised keypoints/descriptors per tile and crop
//! - **OffsetEstimator**: ratio-tested matches reduced to a median translation
//! - **PositionPropagator**: breadth-first placement from the origin tile
//! - **Compositor**: hard overwrite or soft-blend accumulation on the canvas
//! - **SeamCorrector**: optional pairwise gamma correction of overlaps
//!
//! # Example
//!
//! ```no_run
//! # use mosaic_photo::{StitchConfig, Stitcher};
//! let stitcher = Stitcher::new(StitchConfig::default());
//! let output = stitcher.stitch_dir("img/1/tiles").unwrap();
//! output.image.save("mosaic.png").unwrap();
//! ```

use mosaic_core::GridCoord;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("origin tile (0, 0) is missing from the tile store")]
    MissingOrigin,

    #[error("no tile was placed, the canvas is empty")]
    EmptyCanvas,

    #[error("duplicate tile {coord}: {} and {}", first.display(), second.display())]
    DuplicateTile {
        coord: GridCoord,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("tile {0} already has a position")]
    TileAlreadyPlaced(GridCoord),

    #[error("no tile at {0}")]
    UnknownTile(GridCoord),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<mosaic_features::FeatureError> for StitchError {
    fn from(e: mosaic_features::FeatureError) -> Self {
        StitchError::Config(e.to_string())
    }
}

pub mod composite;
pub mod config;
pub mod debug;
pub mod feature_index;
pub mod offset;
pub mod propagate;
pub mod request;
pub mod seam;
pub mod stitcher;
pub mod tearing;
pub mod tile_store;

pub use composite::*;
pub use config::*;
pub use debug::*;
pub use feature_index::*;
pub use offset::*;
pub use propagate::*;
pub use request::*;
pub use seam::*;
pub use stitcher::*;
pub use tearing::*;
pub use tile_store::*;
