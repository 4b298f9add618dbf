use crate::composite::Compositor;
use crate::debug::DebugWriter;
use crate::feature_index::FeatureIndex;
use crate::offset::OffsetEstimator;
use crate::propagate::{FeatureRegistrar, NominalRegistrar, PositionPropagator, PropagationReport};
use crate::request::{StitchRequest, StitchResponse, REQUEST_RESULT_FILE};
use crate::seam::{SeamCorrector, SeamReport};
use crate::tile_store::TileStore;
use crate::{MatchStrategy, Result, StitchConfig, StitchError};
use mosaic_core::{convert_rgb_to_gray, GridCoord, Rect, RgbImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct StitchOutput {
    pub image: RgbImage,
    /// Canvas rectangle in the origin tile's coordinate frame.
    pub extent: Rect,
    pub report: PropagationReport,
    pub seam: Option<SeamReport>,
    pub duration: Duration,
}

/// Runs the whole pipeline for one tile grid: load, register, place,
/// optionally seam-correct, composite.
pub struct Stitcher {
    config: StitchConfig,
}

impl Stitcher {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn stitch_dir(&self, dir: impl AsRef<Path>) -> Result<StitchOutput> {
        self.config.validate()?;
        let store = TileStore::load(dir, self.config.on_duplicate)?;
        self.stitch_store(store)
    }

    pub fn stitch_store(&self, mut store: TileStore) -> Result<StitchOutput> {
        let _span = tracing::info_span!("stitch", tiles = store.len()).entered();
        let start = Instant::now();
        let cfg = &self.config;
        cfg.validate()?;

        let debug = cfg
            .debug_dir
            .as_ref()
            .map(|dir| DebugWriter::new(dir.clone()))
            .transpose()?;

        let index = FeatureIndex::new(cfg.detector.build()?, cfg.overlap_px);
        let propagator = PositionPropagator::new(cfg.adjacency);

        let report = if cfg.match_strategy == MatchStrategy::Nominal {
            propagator.propagate(&mut store, &NominalRegistrar::new(cfg.overlap_px))?
        } else {
            let estimator = OffsetEstimator::new(cfg.min_full_inliers, cfg.min_edge_inliers);
            let registrar = FeatureRegistrar::new(&index, estimator, cfg.match_strategy);
            if !store.contains(&GridCoord::ORIGIN) {
                return Err(StitchError::MissingOrigin);
            }
            if cfg.precompute_features {
                index.precompute(&store, &registrar.crops(cfg.adjacency));
            }
            propagator.propagate(&mut store, &registrar)?
        };

        for coord in report.unvisited() {
            warn!(%coord, "tile could not be placed and is left out");
        }

        if let Some(debug) = &debug {
            debug.write_keypoints(&store, &index)?;
            debug.write_placements(&report)?;
        }

        let seam = cfg
            .seam_correction
            .then(|| SeamCorrector::new().apply(&mut store));

        let composite = Compositor::new(cfg.blend).composite(&store)?;

        if let Some(debug) = &debug {
            debug.write_blend_masks(&store)?;
            debug.write_weight_map(&composite)?;
        }

        let duration = start.elapsed();
        info!(
            detector = index.detector_name(),
            placed = report.placed_count(),
            width = composite.extent.width,
            height = composite.extent.height,
            secs = duration.as_secs_f64(),
            "stitch finished"
        );

        Ok(StitchOutput {
            image: composite.image,
            extent: composite.extent,
            report,
            seam,
            duration,
        })
    }

    /// Write the mosaic to `path`, plus `<stem>_gray.png` beside it when
    /// grayscale output is enabled. Returns every file written.
    pub fn save_output(&self, output: &StitchOutput, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StitchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        output.image.save(path).map_err(|source| StitchError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let mut written = vec![path.to_path_buf()];

        if self.config.save_grayscale {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("stitched");
            let gray_path = path.with_file_name(format!("{stem}_gray.png"));
            convert_rgb_to_gray(&output.image)
                .save(&gray_path)
                .map_err(|source| StitchError::Image {
                    path: gray_path.clone(),
                    source,
                })?;
            written.push(gray_path);
        }

        info!(path = %path.display(), "mosaic written");
        Ok(written)
    }

    /// Serve one remote trigger: stitch `tile_dir` and write the result into
    /// the resolved output directory. Failures are reported in the response.
    pub fn run_request(&self, request: &StitchRequest) -> StitchResponse {
        if !request.tile_dir.is_dir() {
            return StitchResponse::failure(format!(
                "tile_dir missing or not a directory: {}",
                request.tile_dir.display()
            ));
        }

        let start = Instant::now();
        let result = self.stitch_dir(&request.tile_dir).and_then(|output| {
            let path = request.resolved_output_dir().join(REQUEST_RESULT_FILE);
            self.save_output(&output, &path)?;
            Ok(path)
        });

        match result {
            Ok(path) => {
                let path = std::fs::canonicalize(&path).unwrap_or(path);
                StitchResponse::success(path, start.elapsed().as_secs_f64())
            }
            Err(e) => {
                warn!(error = %e, "stitch request failed");
                StitchResponse::failure(e)
            }
        }
    }
}
