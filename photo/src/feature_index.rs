use crate::tile_store::{Tile, TileStore};
use mosaic_core::{gray_region, Descriptors, Direction, Rect};
use mosaic_features::FeatureDetector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::trace;

/// Region of a tile that features are extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    Full,
    Left,
    Right,
    Top,
    Bottom,
}

impl Crop {
    pub const ALL: [Crop; 5] = [Crop::Full, Crop::Left, Crop::Right, Crop::Top, Crop::Bottom];

    /// Tile-local rectangle of this crop; bands are `overlap` wide, clamped to
    /// the tile.
    pub fn region(&self, width: u32, height: u32, overlap: u32) -> Rect {
        let bw = overlap.min(width);
        let bh = overlap.min(height);
        match self {
            Crop::Full => Rect::new(0, 0, width, height),
            Crop::Left => Rect::new(0, 0, bw, height),
            Crop::Right => Rect::new((width - bw) as i64, 0, bw, height),
            Crop::Top => Rect::new(0, 0, width, bh),
            Crop::Bottom => Rect::new(0, (height - bh) as i64, width, bh),
        }
    }

    /// Top-left corner of the crop inside the full tile.
    pub fn origin(&self, width: u32, height: u32, overlap: u32) -> (u32, u32) {
        let r = self.region(width, height, overlap);
        (r.x as u32, r.y as u32)
    }

    /// The band of a tile that faces `direction`.
    pub fn band(direction: Direction) -> Crop {
        match direction {
            Direction::Left => Crop::Left,
            Direction::Right => Crop::Right,
            Direction::Top => Crop::Top,
            Direction::Bottom => Crop::Bottom,
        }
    }

    /// `(band on the placed tile, band on the neighbour)` for a neighbour
    /// lying in `direction`: the bands that face each other.
    pub fn band_pair(direction: Direction) -> (Crop, Crop) {
        (Crop::band(direction), Crop::band(direction.opposite()))
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Crop::Full)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Crop::Full => "full",
            Crop::Left => "left",
            Crop::Right => "right",
            Crop::Top => "top",
            Crop::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keypoints and descriptors of one crop. Keypoints are crop-local; `origin`
/// lifts them into tile coordinates. Empty is valid.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub crop: Crop,
    pub origin: (u32, u32),
    pub descriptors: Descriptors,
}

impl FeatureSet {
    pub fn empty(crop: Crop) -> Self {
        Self {
            crop,
            origin: (0, 0),
            descriptors: Descriptors::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

type Slot = Arc<OnceLock<Arc<FeatureSet>>>;

/// Per-tile memo of feature sets, one slot per crop. A slot is filled at most
/// once even when several threads ask for it concurrently.
#[derive(Debug, Default)]
pub struct FeatureCache {
    slots: Mutex<HashMap<Crop, Slot>>,
}

impl FeatureCache {
    fn slot(&self, crop: Crop) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(crop).or_default().clone()
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Filled entries, in `Crop::ALL` order.
    pub fn cached(&self) -> Vec<Arc<FeatureSet>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Crop::ALL
            .iter()
            .filter_map(|c| slots.get(c).and_then(|s| s.get().cloned()))
            .collect()
    }
}

/// Feature extraction for tiles, memoised per (tile, crop).
///
/// The memo key is the crop only: detector settings are fixed for the lifetime
/// of the index, and a tile whose pixels change drops its cache.
pub struct FeatureIndex {
    detector: Box<dyn FeatureDetector>,
    overlap_px: u32,
}

impl FeatureIndex {
    pub fn new(detector: Box<dyn FeatureDetector>, overlap_px: u32) -> Self {
        Self {
            detector,
            overlap_px,
        }
    }

    pub fn overlap_px(&self) -> u32 {
        self.overlap_px
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn features(&self, tile: &Tile, crop: Crop) -> Arc<FeatureSet> {
        tile.features
            .slot(crop)
            .get_or_init(|| Arc::new(self.compute(tile, crop)))
            .clone()
    }

    fn compute(&self, tile: &Tile, crop: Crop) -> FeatureSet {
        let region = crop.region(tile.width(), tile.height(), self.overlap_px);
        if region.is_empty() {
            return FeatureSet::empty(crop);
        }
        let gray = gray_region(tile.image(), region);
        let descriptors = self.detector.detect_and_compute(&gray);
        trace!(
            coord = %tile.coord(),
            %crop,
            features = descriptors.len(),
            "features extracted"
        );
        FeatureSet {
            crop,
            origin: (region.x as u32, region.y as u32),
            descriptors,
        }
    }

    /// Fill the cache for every tile and each of `crops` on the rayon pool.
    pub fn precompute(&self, store: &TileStore, crops: &[Crop]) {
        let _span = tracing::info_span!("precompute_features", tiles = store.len()).entered();
        let jobs: Vec<(&Tile, Crop)> = store
            .tiles()
            .flat_map(|t| crops.iter().map(move |&c| (t, c)))
            .collect();
        jobs.par_iter().for_each(|(tile, crop)| {
            self.features(tile, *crop);
        });
    }

    pub fn cached(&self, tile: &Tile) -> Vec<Arc<FeatureSet>> {
        tile.features.cached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{Descriptor, GrayImage, GridCoord, KeyPoint, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetector {
        calls: Arc<AtomicUsize>,
    }

    impl FeatureDetector for CountingDetector {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn detect_and_compute(&self, image: &GrayImage) -> Descriptors {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut d = Descriptors::new();
            d.push(Descriptor::binary(
                vec![image.width() as u8],
                KeyPoint::new(0.0, 0.0),
            ));
            d
        }
    }

    #[test]
    fn band_regions_and_origins() {
        assert_eq!(Crop::Right.region(300, 200, 80), Rect::new(220, 0, 80, 200));
        assert_eq!(Crop::Bottom.origin(300, 200, 80), (0, 120));
        assert_eq!(Crop::Left.origin(300, 200, 80), (0, 0));
        assert_eq!(Crop::Top.region(300, 200, 500), Rect::new(0, 0, 300, 200));
        assert!(Crop::Left.region(300, 200, 0).is_empty());
    }

    #[test]
    fn band_pair_faces_each_other() {
        assert_eq!(Crop::band_pair(Direction::Right), (Crop::Right, Crop::Left));
        assert_eq!(Crop::band_pair(Direction::Top), (Crop::Top, Crop::Bottom));
    }

    #[test]
    fn features_are_computed_once_per_crop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let index = FeatureIndex::new(
            Box::new(CountingDetector {
                calls: calls.clone(),
            }),
            16,
        );
        let tile = Tile::new(GridCoord::ORIGIN, RgbImage::new(64, 48));

        let a = index.features(&tile, Crop::Right);
        let b = index.features(&tile, Crop::Right);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.origin, (48, 0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        index.features(&tile, Crop::Full);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.cached(&tile).len(), 2);
    }

    #[test]
    fn precompute_fills_every_slot_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let index = FeatureIndex::new(
            Box::new(CountingDetector {
                calls: calls.clone(),
            }),
            8,
        );
        let mut store = TileStore::new();
        for c in 0..3 {
            store
                .insert(
                    Tile::new(GridCoord::new(0, c), RgbImage::new(32, 32)),
                    crate::DuplicatePolicy::Error,
                )
                .unwrap();
        }
        index.precompute(&store, &Crop::ALL);
        index.precompute(&store, &Crop::ALL);
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn pixel_mutation_drops_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let index = FeatureIndex::new(
            Box::new(CountingDetector {
                calls: calls.clone(),
            }),
            8,
        );
        let mut tile = Tile::new(GridCoord::ORIGIN, RgbImage::new(16, 16));
        index.features(&tile, Crop::Full);
        tile.image_mut();
        index.features(&tile, Crop::Full);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
