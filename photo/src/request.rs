use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the result written for a [`StitchRequest`].
pub const REQUEST_RESULT_FILE: &str = "stitched_image_api.png";

/// "Stitch this directory" trigger as received from a remote caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchRequest {
    pub tile_dir: PathBuf,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl StitchRequest {
    /// `output_dir`, or `stitched/` next to the tile directory.
    pub fn resolved_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .tile_dir
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("stitched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StitchResponse {
    Success {
        status: String,
        result_image: PathBuf,
        /// Wall-clock seconds.
        duration: f64,
    },
    Failure {
        error: String,
    },
}

impl StitchResponse {
    pub fn success(result_image: PathBuf, duration: f64) -> Self {
        StitchResponse::Success {
            status: "success".into(),
            result_image,
            duration,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        StitchResponse::Failure {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StitchResponse::Success { .. })
    }
}
