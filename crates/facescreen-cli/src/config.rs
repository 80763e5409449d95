use facescreen_core::detector::{DEFAULT_MIN_FACE_SIZE, DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR};
use facescreen_core::pipeline::{CLASSIFIER_MODEL, LANDMARK_MODEL};
use facescreen_core::{DetectParams, ModelPaths};
use serde::Serialize;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Directory containing model files.
    pub model_dir: PathBuf,
    /// Directory containing Haar cascade XML files (default: `<model_dir>/cascades`).
    pub cascade_dir: PathBuf,
    /// Uncompressed dlib 68-point shape predictor.
    pub landmark_model: PathBuf,
    /// ONNX screening classifier.
    pub classifier_model: PathBuf,
    /// Pyramid step for face detection.
    pub scale_factor: f64,
    /// Neighbours a face cluster needs to be kept.
    pub min_neighbors: u32,
    /// Smallest face side in pixels.
    pub min_face_size: u32,
    /// Whether to load the landmark model at all.
    pub landmarks_enabled: bool,
}

impl Config {
    /// Load configuration from `FACESCREEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("FACESCREEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("facescreen/models")
            });

        let cascade_dir = var("FACESCREEN_CASCADE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("cascades"));
        let landmark_model = var("FACESCREEN_LANDMARK_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(LANDMARK_MODEL));
        let classifier_model = var("FACESCREEN_CLASSIFIER_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join(CLASSIFIER_MODEL));

        Self {
            model_dir,
            cascade_dir,
            landmark_model,
            classifier_model,
            scale_factor: parse_or(&var, "FACESCREEN_SCALE_FACTOR", DEFAULT_SCALE_FACTOR),
            min_neighbors: parse_or(&var, "FACESCREEN_MIN_NEIGHBORS", DEFAULT_MIN_NEIGHBORS),
            min_face_size: parse_or(&var, "FACESCREEN_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            landmarks_enabled: var("FACESCREEN_LANDMARKS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Model locations and detection parameters for `Pipeline::load`.
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            cascade_dir: self.cascade_dir.clone(),
            landmark_model: self.landmarks_enabled.then(|| self.landmark_model.clone()),
            classifier_model: self.classifier_model.clone(),
            detect_params: DetectParams {
                scale_factor: self.scale_factor,
                min_neighbors: self.min_neighbors,
                min_size: self.min_face_size,
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
