//! Face localisation over a prioritised list of region detectors.
//!
//! Each strategy is a [`RegionDetector`] (normally a Haar cascade). The
//! locator equalises the grayscale image once and returns the hits of the
//! first strategy that finds anything.

use crate::imageops;
use crate::types::FaceRegion;
use image::{GrayImage, RgbImage};
use thiserror::Error;

// --- Detection defaults ---
pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 3;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 30;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("detector {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

/// Multi-scale search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Minimum raw hits a cluster needs, exclusive.
    pub min_neighbors: u32,
    /// Smallest window side in pixels.
    pub min_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

impl DetectParams {
    /// Parameters used for eye detection inside a face crop.
    pub fn eye() -> Self {
        Self {
            min_size: 0,
            ..Self::default()
        }
    }
}

/// Anything that finds rectangles in a grayscale image.
pub trait RegionDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Ordered face detection strategies (frontal, alternate frontal, profile).
pub struct FaceLocator {
    strategies: Vec<Box<dyn RegionDetector>>,
    params: DetectParams,
}

impl FaceLocator {
    pub fn new(strategies: Vec<Box<dyn RegionDetector>>, params: DetectParams) -> Self {
        Self { strategies, params }
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Detect faces in an RGB image.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        self.detect_gray(&imageops::to_grayscale(image))
    }

    /// Detect faces in an already converted grayscale image.
    pub fn detect_gray(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyImage { width, height });
        }

        let equalized = imageops::equalize_histogram(gray);

        for strategy in &self.strategies {
            let faces = strategy.detect(&equalized, &self.params)?;
            tracing::debug!(strategy = strategy.name(), count = faces.len(), "face strategy");
            if !faces.is_empty() {
                return Ok(faces);
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        hits: Vec<FaceRegion>,
        calls: Arc<AtomicUsize>,
    }

    impl RegionDetector for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    struct Broken;

    impl RegionDetector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn detect(&self, _: &GrayImage, _: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError> {
            Err(DetectorError::Failed {
                name: "broken".into(),
                reason: "injected".into(),
            })
        }
    }

    fn fixed(name: &'static str, hits: Vec<FaceRegion>) -> (Box<dyn RegionDetector>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let det = Fixed {
            name,
            hits,
            calls: calls.clone(),
        };
        (Box::new(det), calls)
    }

    #[test]
    fn test_default_params() {
        let p = DetectParams::default();
        assert_eq!(p.scale_factor, 1.1);
        assert_eq!(p.min_neighbors, 3);
        assert_eq!(p.min_size, 30);
        assert_eq!(DetectParams::eye().min_size, 0);
    }

    #[test]
    fn test_first_successful_strategy_wins() {
        let (frontal, frontal_calls) = fixed("frontal", vec![]);
        let (alt, alt_calls) = fixed("alt", vec![FaceRegion::new(1, 2, 30, 30)]);
        let (profile, profile_calls) = fixed("profile", vec![FaceRegion::new(9, 9, 40, 40)]);
        let locator = FaceLocator::new(vec![frontal, alt, profile], DetectParams::default());

        let faces = locator.detect(&RgbImage::new(64, 64)).unwrap();
        assert_eq!(faces, vec![FaceRegion::new(1, 2, 30, 30)]);
        assert_eq!(frontal_calls.load(Ordering::SeqCst), 1);
        assert_eq!(alt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(profile_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_strategy_finds_anything() {
        let (frontal, _) = fixed("frontal", vec![]);
        let locator = FaceLocator::new(vec![frontal], DetectParams::default());
        assert!(locator.detect(&RgbImage::new(32, 32)).unwrap().is_empty());
    }

    #[test]
    fn test_detector_error_propagates() {
        let locator = FaceLocator::new(vec![Box::new(Broken)], DetectParams::default());
        assert!(matches!(
            locator.detect(&RgbImage::new(32, 32)),
            Err(DetectorError::Failed { .. })
        ));
    }

    #[test]
    fn test_empty_image_rejected() {
        let locator = FaceLocator::new(vec![], DetectParams::default());
        assert!(matches!(
            locator.detect(&RgbImage::new(0, 10)),
            Err(DetectorError::EmptyImage { .. })
        ));
    }
}
