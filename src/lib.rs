//! Umbrella crate re-exporting the mosaic workspace.
//!
//! ```no_run
//! use tilemosaic::photo::{StitchConfig, Stitcher};
//!
//! tilemosaic::init_thread_pool(None).unwrap();
//! let stitcher = Stitcher::new(StitchConfig::default());
//! let output = stitcher.stitch_dir("tiles/").unwrap();
//! stitcher.save_output(&output, "stitched.png").unwrap();
//! ```

pub use mosaic_core as core;
pub use mosaic_features as features;
pub use mosaic_photo as photo;

/// Initialize a single global Rayon thread pool for feature extraction and
/// compositing.
///
/// Call this once at application startup. Repeated calls are idempotent and
/// return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `MOSAIC_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    mosaic_core::init_global_thread_pool(num_threads)
}
