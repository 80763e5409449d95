//! End-to-end screening: detection, landmarks, features, classifier, decision.

use crate::cascade::{CascadeError, HaarCascade};
use crate::classifier::{self, Classifier, ClassifierError, OnnxClassifier};
use crate::decision::{Decision, DecisionEngine};
use crate::detector::{DetectParams, DetectorError, FaceLocator, RegionDetector};
use crate::features::{AnalysisError, Capability, FeatureAnalyzer};
use crate::imageops;
use crate::landmarks::{LandmarkExtractor, ShapePredictor};
use crate::types::{FeatureVector, PredictionResult};
use image::{DynamicImage, RgbImage};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Model file names ---
pub const FRONTAL_CASCADE: &str = "haarcascade_frontalface_default.xml";
pub const FRONTAL_ALT_CASCADE: &str = "haarcascade_frontalface_alt2.xml";
pub const PROFILE_CASCADE: &str = "haarcascade_profileface.xml";
pub const EYE_CASCADE: &str = "haarcascade_eye.xml";
pub const LANDMARK_MODEL: &str = "shape_predictor_68_face_landmarks.dat";
pub const CLASSIFIER_MODEL: &str = "screening_classifier.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no classifier configured")]
    MissingClassifier,
    #[error("no face detection strategy configured")]
    NoFaceStrategy,
    #[error("neither a landmark model nor an eye cascade is available")]
    MissingEyeDetector,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cascade: {0}")]
    Cascade(#[from] CascadeError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Per-call failure, reported as an `error` result.
#[derive(Error, Debug)]
enum PredictError {
    #[error("empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("{0}")]
    Detector(#[from] DetectorError),
    #[error("{0}")]
    Analysis(#[from] AnalysisError),
    #[error("{0}")]
    Classifier(#[from] ClassifierError),
}

/// Resolved locations of every model file.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub cascade_dir: PathBuf,
    /// `None` disables landmark extraction.
    pub landmark_model: Option<PathBuf>,
    pub classifier_model: PathBuf,
    pub detect_params: DetectParams,
}

impl ModelPaths {
    /// Standard file layout under a single model directory.
    pub fn in_dir(model_dir: impl AsRef<Path>) -> Self {
        let dir = model_dir.as_ref();
        Self {
            cascade_dir: dir.join("cascades"),
            landmark_model: Some(dir.join(LANDMARK_MODEL)),
            classifier_model: dir.join(CLASSIFIER_MODEL),
            detect_params: DetectParams::default(),
        }
    }

    pub fn cascade(&self, file_name: &str) -> PathBuf {
        self.cascade_dir.join(file_name)
    }
}

/// Assembles a [`Pipeline`] from its parts.
#[derive(Default)]
pub struct PipelineBuilder {
    face_strategies: Vec<Box<dyn RegionDetector>>,
    eye_detector: Option<Box<dyn RegionDetector>>,
    landmarks: Option<Box<dyn LandmarkExtractor>>,
    classifier: Option<Box<dyn Classifier>>,
    params: DetectParams,
}

impl PipelineBuilder {
    /// Append a face strategy; strategies run in insertion order.
    pub fn face_strategy(mut self, detector: Box<dyn RegionDetector>) -> Self {
        self.face_strategies.push(detector);
        self
    }

    pub fn eye_detector(mut self, detector: Box<dyn RegionDetector>) -> Self {
        self.eye_detector = Some(detector);
        self
    }

    pub fn landmark_extractor(mut self, extractor: Box<dyn LandmarkExtractor>) -> Self {
        self.landmarks = Some(extractor);
        self
    }

    pub fn classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn detect_params(mut self, params: DetectParams) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let classifier = self.classifier.ok_or(ConfigError::MissingClassifier)?;
        if self.face_strategies.is_empty() {
            return Err(ConfigError::NoFaceStrategy);
        }
        if self.landmarks.is_none() && self.eye_detector.is_none() {
            return Err(ConfigError::MissingEyeDetector);
        }

        let capability = if self.landmarks.is_some() {
            Capability::Landmarks
        } else {
            Capability::BoundingBox
        };

        Ok(Pipeline {
            locator: FaceLocator::new(self.face_strategies, self.params),
            landmarks: self.landmarks,
            analyzer: FeatureAnalyzer::new(capability, self.eye_detector),
            classifier,
            engine: DecisionEngine::new(),
        })
    }
}

/// The screening pipeline. Immutable after construction and shareable
/// across threads.
pub struct Pipeline {
    locator: FaceLocator,
    landmarks: Option<Box<dyn LandmarkExtractor>>,
    analyzer: FeatureAnalyzer,
    classifier: Box<dyn Classifier>,
    engine: DecisionEngine,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Load every model from disk.
    ///
    /// The frontal cascade and the classifier are required. The alternate
    /// frontal, profile and eye cascades and the landmark model are optional.
    pub fn load(paths: &ModelPaths) -> Result<Self, PipelineError> {
        let mut builder = Self::builder()
            .detect_params(paths.detect_params)
            .face_strategy(Box::new(HaarCascade::load(paths.cascade(FRONTAL_CASCADE))?));

        for name in [FRONTAL_ALT_CASCADE, PROFILE_CASCADE] {
            if let Some(cascade) = load_optional_cascade(&paths.cascade(name)) {
                builder = builder.face_strategy(Box::new(cascade));
            }
        }

        if let Some(eyes) = load_optional_cascade(&paths.cascade(EYE_CASCADE)) {
            builder = builder.eye_detector(Box::new(eyes));
        }

        match &paths.landmark_model {
            Some(path) => match ShapePredictor::load(path) {
                Ok(predictor) => builder = builder.landmark_extractor(Box::new(predictor)),
                Err(e) => tracing::warn!(error = %e, "landmarks unavailable, using bounding-box features"),
            },
            None => tracing::info!("landmarks disabled"),
        }

        let classifier = OnnxClassifier::load(&paths.classifier_model)?;
        let pipeline = builder.classifier(Box::new(classifier)).build()?;

        tracing::info!(
            face_strategies = pipeline.locator.strategy_count(),
            eye_cascade = pipeline.analyzer.has_eye_detector(),
            capability = ?pipeline.capability(),
            "pipeline ready"
        );

        Ok(pipeline)
    }

    pub fn capability(&self) -> Capability {
        self.analyzer.capability()
    }

    /// Screen one image. Every failure, including a panic inside a model, is
    /// reported as an `error` result.
    pub fn predict(&self, image: &RgbImage) -> PredictionResult {
        let span = tracing::info_span!("predict", width = image.width(), height = image.height());
        let _enter = span.enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_predict(image)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "analysis failed");
                PredictionResult::error(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "analysis panicked");
                PredictionResult::error(message)
            }
        };

        tracing::info!(
            status = %result.status,
            score = result.score,
            confidence = result.confidence,
            faces = result.features.face_count,
            "prediction complete"
        );
        result
    }

    /// Screen an image of any pixel format.
    pub fn predict_dynamic(&self, image: &DynamicImage) -> PredictionResult {
        match image {
            DynamicImage::ImageRgb8(rgb) => self.predict(rgb),
            other => self.predict(&other.to_rgb8()),
        }
    }

    fn try_predict(&self, image: &RgbImage) -> Result<PredictionResult, PredictError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PredictError::EmptyImage { width, height });
        }

        let gray = imageops::to_grayscale(image);
        let regions = self.locator.detect_gray(&gray)?;
        tracing::debug!(faces = regions.len(), "face detection");

        if regions.is_empty() {
            let features = FeatureVector::default();
            let decision = self.engine.decide(0.0, &features);
            return Ok(assemble(decision, features));
        }

        let landmarks = self
            .landmarks
            .as_ref()
            .and_then(|extractor| extractor.extract(&gray, &regions[0]));
        tracing::debug!(found = landmarks.is_some(), "landmarks");

        let features = self.analyzer.analyze(&gray, &regions, landmarks.as_ref())?;
        tracing::debug!(?features, "features");

        if let Some(gated) = self.engine.gate(&features) {
            return Ok(assemble(gated, features));
        }

        let input = classifier::preprocess(image)?;
        let raw = self.classifier.score(&input)?;
        let decision = self.engine.decide(raw, &features);
        Ok(assemble(decision, features))
    }
}

fn load_optional_cascade(path: &Path) -> Option<HaarCascade> {
    match HaarCascade::load(path) {
        Ok(cascade) => Some(cascade),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "optional cascade unavailable");
            None
        }
    }
}

fn assemble(decision: Decision, features: FeatureVector) -> PredictionResult {
    PredictionResult {
        score: decision.score,
        status: decision.status,
        confidence: decision.confidence,
        features,
        recommendations: decision.recommendations,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceRegion, LandmarkSet, Point, Status, LANDMARK_COUNT};
    use image::{GrayImage, Luma, Rgb};
    use ndarray::Array4;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedRegions(Vec<FaceRegion>);

    impl RegionDetector for FixedRegions {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl RegionDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError> {
            Err(DetectorError::Failed {
                name: "failing".into(),
                reason: "injected fault".into(),
            })
        }
    }

    struct FixedScore {
        score: f32,
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for FixedScore {
        fn score(&self, input: &Array4<f32>) -> Result<f32, ClassifierError> {
            assert_eq!(input.shape(), &[1, 224, 224, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
    }

    struct PanickingClassifier;

    impl Classifier for PanickingClassifier {
        fn score(&self, _: &Array4<f32>) -> Result<f32, ClassifierError> {
            panic!("model exploded")
        }
    }

    struct FixedLandmarks(Option<LandmarkSet>);

    impl LandmarkExtractor for FixedLandmarks {
        fn extract(&self, _: &GrayImage, _: &FaceRegion) -> Option<LandmarkSet> {
            self.0.clone()
        }
    }

    /// Both eyes wide open (aspect ratio 0.6), over a flat image with no pupils.
    fn open_eye_landmarks() -> LandmarkSet {
        let mut points = vec![Point::new(32.0, 45.0); LANDMARK_COUNT];
        for (base, cx) in [(36, 22.0f32), (42, 42.0)] {
            points[base] = Point::new(cx - 10.0, 30.0);
            points[base + 1] = Point::new(cx - 4.0, 24.0);
            points[base + 2] = Point::new(cx + 4.0, 24.0);
            points[base + 3] = Point::new(cx + 10.0, 30.0);
            points[base + 4] = Point::new(cx + 4.0, 36.0);
            points[base + 5] = Point::new(cx - 4.0, 36.0);
        }
        LandmarkSet::new(points).unwrap()
    }

    fn landmark_pipeline(landmarks: Option<LandmarkSet>) -> (Pipeline, Arc<AtomicUsize>) {
        let (clf, calls) = classifier(0.9);
        let p = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(vec![face()])))
            .landmark_extractor(Box::new(FixedLandmarks(landmarks)))
            .classifier(clf)
            .build()
            .unwrap();
        (p, calls)
    }

    fn flat_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([100])))
    }

    fn face() -> FaceRegion {
        FaceRegion::new(8, 8, 48, 48)
    }

    fn eyes(n: usize) -> Box<dyn RegionDetector> {
        Box::new(FixedRegions(vec![FaceRegion::new(0, 0, 8, 8); n]))
    }

    fn classifier(score: f32) -> (Box<dyn Classifier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedScore {
                score,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn pipeline(faces: Vec<FaceRegion>, eye_count: usize, score: f32) -> (Pipeline, Arc<AtomicUsize>) {
        let (clf, calls) = classifier(score);
        let p = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(faces)))
            .eye_detector(eyes(eye_count))
            .classifier(clf)
            .build()
            .unwrap();
        (p, calls)
    }

    fn test_image() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 5 + y * 3) % 200) as u8 + 20;
            Rgb([v, v / 2, 255 - v])
        })
    }

    #[test]
    fn test_pipeline_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }

    #[test]
    fn test_no_face_result() {
        let (p, calls) = pipeline(vec![], 2, 0.9);
        let r = p.predict(&test_image());
        assert_eq!(r.status, Status::NoFaceDetected);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.features, FeatureVector::default());
        assert_eq!(r.recommendations.len(), 1);
        assert!(r.recommendations[0].starts_with("No face detected"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_eyes_not_visible_skips_classifier() {
        let (p, calls) = pipeline(vec![face()], 0, 0.9);
        let r = p.predict(&test_image());
        assert_eq!(r.status, Status::NoFaceDetected);
        assert_eq!(r.features.face_count, 1);
        assert_eq!(r.features.eye_contact, 0.0);
        assert!(r.recommendations[0].contains("eyes not visible"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_positive_result() {
        let (p, calls) = pipeline(vec![face(), FaceRegion::new(0, 0, 10, 10)], 2, 0.9);
        let r = p.predict(&test_image());
        assert_eq!(r.status, Status::Positive);
        assert!((r.score - 0.9).abs() < 1e-6);
        assert!((r.confidence - 0.8).abs() < 1e-5);
        assert_eq!(r.features.face_count, 2);
        assert_eq!(r.features.eye_contact, 1.0);
        assert!((r.features.face_area_ratio - (48.0 * 48.0) / (64.0 * 64.0)).abs() < 1e-6);
        assert!(r.recommendations.len() >= 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_injected_failure_becomes_error() {
        let (clf, _) = classifier(0.9);
        let p = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(vec![face()])))
            .eye_detector(Box::new(FailingDetector))
            .classifier(clf)
            .build()
            .unwrap();
        let r = p.predict(&test_image());
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.features, FeatureVector::default());
        assert_eq!(r.recommendations.len(), 1);
        assert!(r.recommendations[0].starts_with("Error during analysis: "));
        assert!(r.recommendations[0].contains("injected fault"));
    }

    #[test]
    fn test_face_detector_failure_becomes_error() {
        let (clf, _) = classifier(0.2);
        let p = Pipeline::builder()
            .face_strategy(Box::new(FailingDetector))
            .eye_detector(eyes(2))
            .classifier(clf)
            .build()
            .unwrap();
        assert_eq!(p.predict(&test_image()).status, Status::Error);
    }

    #[test]
    fn test_classifier_panic_becomes_error() {
        let p = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(vec![face()])))
            .eye_detector(eyes(2))
            .classifier(Box::new(PanickingClassifier))
            .build()
            .unwrap();
        let r = p.predict(&test_image());
        assert_eq!(r.status, Status::Error);
        assert!(r.recommendations[0].contains("model exploded"));
    }

    #[test]
    fn test_empty_image_is_error() {
        let (p, _) = pipeline(vec![face()], 2, 0.5);
        let r = p.predict(&RgbImage::new(0, 0));
        assert_eq!(r.status, Status::Error);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let (p, _) = pipeline(vec![face()], 1, 0.55);
        let img = test_image();
        let first = p.predict(&img);
        let second = p.predict(&img);
        assert_eq!(first, second);
        assert_eq!(first.status, Status::Inconclusive);
    }

    #[test]
    fn test_predict_dynamic_grayscale() {
        let (p, _) = pipeline(vec![face()], 2, 0.1);
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([100])));
        let r = p.predict_dynamic(&gray);
        assert_eq!(r.status, Status::Negative);
    }

    #[test]
    fn test_builder_requires_classifier() {
        let result = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(vec![])))
            .eye_detector(eyes(2))
            .build();
        assert!(matches!(result, Err(ConfigError::MissingClassifier)));
    }

    #[test]
    fn test_builder_requires_face_strategy() {
        let (clf, _) = classifier(0.5);
        let result = Pipeline::builder().eye_detector(eyes(2)).classifier(clf).build();
        assert!(matches!(result, Err(ConfigError::NoFaceStrategy)));
    }

    #[test]
    fn test_builder_requires_eye_source() {
        let (clf, _) = classifier(0.5);
        let result = Pipeline::builder()
            .face_strategy(Box::new(FixedRegions(vec![])))
            .classifier(clf)
            .build();
        assert!(matches!(result, Err(ConfigError::MissingEyeDetector)));
    }

    #[test]
    fn test_capability_follows_landmark_extractor() {
        let (p, _) = pipeline(vec![], 2, 0.5);
        assert_eq!(p.capability(), Capability::BoundingBox);
        let (p, _) = landmark_pipeline(None);
        assert_eq!(p.capability(), Capability::Landmarks);
    }

    #[test]
    fn test_landmarks_drive_features() {
        let (p, calls) = landmark_pipeline(Some(open_eye_landmarks()));
        let r = p.predict_dynamic(&flat_image());
        assert_eq!(r.status, Status::Positive);
        assert_eq!(r.features.face_count, 1);
        // Fully open eyes, no pupil found: 0.7 * 0.5 + 0.3 * 1.0
        assert!((r.features.eye_contact - 0.65).abs() < 1e-5, "{:?}", r.features);
        // Advanced expression on a flat crop is the saturated texture term only
        assert!((r.features.expression_intensity - 0.15).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&r.features.face_symmetry));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_landmarks_missing_without_eye_detector() {
        let (p, calls) = landmark_pipeline(None);
        let r = p.predict_dynamic(&flat_image());
        assert_eq!(r.status, Status::Positive);
        assert_eq!(r.features.eye_contact, 0.5);
        assert_eq!(r.features.expression_intensity, 0.0);
        assert_eq!(r.features.face_symmetry, 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_without_frontal_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        assert!(matches!(
            Pipeline::load(&paths),
            Err(PipelineError::Cascade(CascadeError::NotFound(_)))
        ));
    }

    #[test]
    fn test_model_paths_layout() {
        let paths = ModelPaths::in_dir("/models");
        assert_eq!(paths.cascade(EYE_CASCADE), PathBuf::from("/models/cascades/haarcascade_eye.xml"));
        assert_eq!(
            paths.landmark_model,
            Some(PathBuf::from("/models/shape_predictor_68_face_landmarks.dat"))
        );
        assert_eq!(paths.classifier_model, PathBuf::from("/models/screening_classifier.onnx"));
    }
}
