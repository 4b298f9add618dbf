use crate::feature_index::FeatureCache;
use crate::{DuplicatePolicy, Result, StitchError};
use mosaic_core::{GridCoord, Rect, RgbImage};
use nalgebra::Point2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TILE_PREFIX: &str = "tile_";
const TILE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One grid cell: pixels, an absolute position written once by the
/// propagator, and the per-crop feature cache.
#[derive(Debug)]
pub struct Tile {
    coord: GridCoord,
    image: RgbImage,
    position: Option<Point2<f64>>,
    source: Option<PathBuf>,
    pub(crate) features: FeatureCache,
}

impl Tile {
    pub fn new(coord: GridCoord, image: RgbImage) -> Self {
        Self {
            coord,
            image,
            position: None,
            source: None,
            features: FeatureCache::default(),
        }
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Mutable pixels. Cached features no longer describe the image, so the
    /// cache is dropped.
    pub fn image_mut(&mut self) -> &mut RgbImage {
        self.features.clear();
        &mut self.image
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn position(&self) -> Option<Point2<f64>> {
        self.position
    }

    pub fn is_placed(&self) -> bool {
        self.position.is_some()
    }

    /// Canvas rectangle at the position rounded to the nearest pixel.
    pub fn placed_rect(&self) -> Option<Rect> {
        self.position.map(|p| {
            Rect::new(
                p.x.round() as i64,
                p.y.round() as i64,
                self.width(),
                self.height(),
            )
        })
    }

    pub(crate) fn place(&mut self, position: Point2<f64>) -> Result<()> {
        if self.position.is_some() {
            return Err(StitchError::TileAlreadyPlaced(self.coord));
        }
        self.position = Some(position);
        Ok(())
    }
}

/// Tiles keyed by grid coordinate, iterated in row-major order.
#[derive(Debug, Default)]
pub struct TileStore {
    tiles: BTreeMap<GridCoord, Tile>,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `tile_<row>_<col>.{jpg,jpeg,png}` in `dir`.
    ///
    /// Entries that do not match the pattern, or match but do not decode, are
    /// skipped with a warning. Entries are visited in file-name order, which
    /// defines "first" and "last" for the duplicate policy.
    pub fn load(dir: impl AsRef<Path>, policy: DuplicatePolicy) -> Result<Self> {
        let dir = dir.as_ref();
        let _span = tracing::info_span!("load_tiles", dir = %dir.display()).entered();

        let io_err = |source| StitchError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut store = TileStore::new();
        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };
            let Some(coord) = parse_tile_filename(name) else {
                warn!(file = name, "skipping file that does not match tile_<row>_<col>.<ext>");
                continue;
            };
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    warn!(file = name, error = %e, "skipping undecodable tile");
                    continue;
                }
            };
            debug!(%coord, file = name, w = image.width(), h = image.height(), "tile decoded");
            store.insert(Tile::new(coord, image).with_source(&path), policy)?;
        }

        info!(tiles = store.len(), "tiles loaded");
        Ok(store)
    }

    /// Insert a tile, resolving a coordinate collision with `policy`.
    pub fn insert(&mut self, tile: Tile, policy: DuplicatePolicy) -> Result<()> {
        let coord = tile.coord();
        if let Some(existing) = self.tiles.get(&coord) {
            match policy {
                DuplicatePolicy::KeepFirst => {
                    debug!(%coord, "duplicate tile ignored");
                    return Ok(());
                }
                DuplicatePolicy::KeepLast => {
                    debug!(%coord, "duplicate tile replaces earlier one");
                }
                DuplicatePolicy::Error => {
                    return Err(StitchError::DuplicateTile {
                        coord,
                        first: existing.source().map(Path::to_path_buf).unwrap_or_default(),
                        second: tile.source().map(Path::to_path_buf).unwrap_or_default(),
                    });
                }
            }
        }
        self.tiles.insert(coord, tile);
        Ok(())
    }

    pub fn get(&self, coord: &GridCoord) -> Option<&Tile> {
        self.tiles.get(coord)
    }

    pub fn get_mut(&mut self, coord: &GridCoord) -> Option<&mut Tile> {
        self.tiles.get_mut(coord)
    }

    pub fn contains(&self, coord: &GridCoord) -> bool {
        self.tiles.contains_key(coord)
    }

    /// Coordinates in row-major order.
    pub fn coords(&self) -> Vec<GridCoord> {
        self.tiles.keys().copied().collect()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Placed tiles in row-major order.
    pub fn placed(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values().filter(|t| t.is_placed())
    }

    pub(crate) fn place(&mut self, coord: &GridCoord, position: Point2<f64>) -> Result<()> {
        self.tiles
            .get_mut(coord)
            .ok_or(StitchError::UnknownTile(*coord))?
            .place(position)
    }
}

/// Parse `tile_<row>_<col>.<ext>` with `ext` one of jpg/jpeg/png in any case.
pub fn parse_tile_filename(name: &str) -> Option<GridCoord> {
    let rest = name.strip_prefix(TILE_PREFIX)?;
    let (stem, ext) = rest.rsplit_once('.')?;
    if !TILE_EXTENSIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(ext))
    {
        return None;
    }
    let (row, col) = stem.split_once('_')?;
    Some(GridCoord::new(parse_index(row)?, parse_index(col)?))
}

fn parse_index(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
