//! facescreen-core: facial image screening engine.
//!
//! Finds faces with Haar cascades, locates 68 landmarks with a regression-tree
//! shape predictor, derives eye-contact, symmetry and expression scores, and
//! combines them with an ONNX classifier score into a screening result.

pub mod alignment;
pub mod cascade;
pub mod classifier;
pub mod decision;
pub mod detector;
pub mod features;
pub mod imageops;
pub mod landmarks;
pub mod pipeline;
pub mod types;

pub use classifier::{Classifier, OnnxClassifier};
pub use detector::{DetectParams, FaceLocator, RegionDetector};
pub use landmarks::{LandmarkExtractor, ShapePredictor};
pub use pipeline::{ModelPaths, Pipeline, PipelineBuilder, PipelineError};
pub use types::{AnalysisResponse, FaceRegion, FeatureVector, LandmarkSet, PredictionResult, Status};
