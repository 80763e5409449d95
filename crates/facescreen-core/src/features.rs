//! Facial feature heuristics for the primary face.
//!
//! Each score has a landmark-based and a bounding-box variant. The analyzer
//! picks one per call depending on its capability and on whether landmarks
//! were actually found. Numeric failures in a single score fall back to
//! [`DEFAULT_SCORE`]; only eye detector errors abort the analysis.

use crate::detector::{DetectParams, DetectorError, RegionDetector};
use crate::imageops;
use crate::types::{FaceRegion, FeatureVector, LandmarkSet, Point, DEFAULT_SCORE};
use image::GrayImage;
use thiserror::Error;

// --- Eye contact ---
const EAR_CLOSED: f32 = 0.15;
const EAR_RANGE: f32 = 0.15;
const EYE_PADDING: i32 = 5;
const PUPIL_THRESHOLD: u8 = 50;
const GAZE_WEIGHT: f32 = 0.7;
const EYES_OPEN_WEIGHT: f32 = 0.3;
const EXPECTED_EYES: f32 = 2.0;

// --- Symmetry ---
const SYMMETRY_HORIZONTAL_WEIGHT: f32 = 0.6;
const SYMMETRY_VERTICAL_WEIGHT: f32 = 0.4;

/// Mirrored landmark pairs (left index, right index).
const SYMMETRIC_PAIRS: [(usize, usize); 26] = [
    // jaw
    (0, 16),
    (1, 15),
    (2, 14),
    (3, 13),
    (4, 12),
    (5, 11),
    (6, 10),
    (7, 9),
    // brows
    (17, 26),
    (18, 25),
    (19, 24),
    (20, 23),
    (21, 22),
    // eyes
    (36, 45),
    (37, 44),
    (38, 43),
    (39, 42),
    (40, 47),
    (41, 46),
    // nose
    (31, 35),
    // mouth
    (48, 54),
    (49, 53),
    (50, 52),
    (59, 55),
    (60, 64),
    (61, 63),
];

// --- Expression ---
const CANNY_FINE: (f32, f32) = (30.0, 100.0);
const CANNY_COARSE: (f32, f32) = (50.0, 150.0);
const EDGE_GAIN_ADVANCED: f64 = 5.0;
const EDGE_GAIN_BASIC: f64 = 3.0;
const VARIANCE_SCALE: f64 = 2000.0;
const GRADIENT_SCALE: f64 = 50.0;
const LBP_SCALE: f64 = 100.0;
const EDGE_WEIGHT: f64 = 0.35;
const VARIANCE_WEIGHT: f64 = 0.20;
const GRADIENT_WEIGHT: f64 = 0.30;
const LBP_WEIGHT: f64 = 0.15;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("image buffer is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("eye detection failed: {0}")]
    EyeDetector(#[from] DetectorError),
}

/// Which family of feature functions the analyzer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Landmark functions when landmarks are available, box functions otherwise.
    Landmarks,
    /// Box functions only.
    BoundingBox,
}

/// Computes a [`FeatureVector`] for the primary face.
pub struct FeatureAnalyzer {
    capability: Capability,
    eye_detector: Option<Box<dyn RegionDetector>>,
}

impl FeatureAnalyzer {
    pub fn new(capability: Capability, eye_detector: Option<Box<dyn RegionDetector>>) -> Self {
        Self {
            capability,
            eye_detector,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn has_eye_detector(&self) -> bool {
        self.eye_detector.is_some()
    }

    /// Analyze `regions[0]` of `gray`. `landmarks` must belong to that region.
    pub fn analyze(
        &self,
        gray: &GrayImage,
        regions: &[FaceRegion],
        landmarks: Option<&LandmarkSet>,
    ) -> Result<FeatureVector, AnalysisError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(AnalysisError::EmptyImage { width, height });
        }

        let mut features = FeatureVector::with_face_count(regions.len());
        let Some(face) = regions.first() else {
            return Ok(features);
        };
        let Some(face_gray) = imageops::crop(gray, face) else {
            tracing::debug!(?face, "face region lies outside the image");
            return Ok(features);
        };

        let landmarks = match self.capability {
            Capability::Landmarks => landmarks,
            Capability::BoundingBox => None,
        };

        features.eye_contact = match landmarks {
            Some(lm) => or_default("eye_contact", eye_contact_landmarks(gray, lm)),
            None => match &self.eye_detector {
                Some(detector) => eye_contact_cascade(detector.as_ref(), &face_gray)?,
                None => {
                    tracing::debug!("no eye detector, eye contact defaults");
                    DEFAULT_SCORE
                }
            },
        };

        features.face_symmetry = match landmarks.and_then(|lm| symmetry_landmarks(lm, face)) {
            Some(score) => score,
            None => or_default("face_symmetry", symmetry_mirror(&face_gray)),
        };

        features.expression_intensity = match landmarks {
            Some(_) => or_default("expression_intensity", expression_advanced(&face_gray)),
            None => or_default("expression_intensity", expression_basic(&face_gray)),
        };

        features.face_area_ratio = face_area_ratio(face, width, height);

        Ok(features)
    }
}

fn or_default(feature: &'static str, score: Option<f32>) -> f32 {
    match score {
        Some(s) if s.is_finite() => s,
        _ => {
            tracing::debug!(feature, "feature measurement failed, using default");
            DEFAULT_SCORE
        }
    }
}

/// Eye aspect ratio over six contour points.
fn eye_aspect_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() != 6 {
        return None;
    }
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f32::EPSILON {
        return None;
    }
    Some((eye[1].distance(&eye[5]) + eye[2].distance(&eye[4])) / (2.0 * horizontal))
}

/// Gaze contribution of one eye: 1 for a centred pupil, 0 at the edge.
///
/// `None` when no pupil-like dark blob is found.
fn eye_gaze(gray: &GrayImage, eye: &[Point]) -> Option<f32> {
    let xs = eye.iter().map(|p| p.x.round() as i32);
    let ys = eye.iter().map(|p| p.y.round() as i32);
    let (min_x, max_x) = (xs.clone().min()?, xs.max()?);
    let (min_y, max_y) = (ys.clone().min()?, ys.max()?);

    let padded = FaceRegion::new(
        min_x - EYE_PADDING,
        min_y - EYE_PADDING,
        max_x - min_x + 2 * EYE_PADDING,
        max_y - min_y + 2 * EYE_PADDING,
    );
    let roi = imageops::crop(gray, &padded)?;

    let mask = imageops::threshold_inv(&roi, PUPIL_THRESHOLD);
    let blob = imageops::largest_blob(&mask, roi.width(), roi.height())?;

    let centre = roi.width() as f32 / 2.0;
    let deviation = (blob.centroid_x - centre).abs() / centre;
    Some((1.0 - deviation).max(0.0))
}

/// Eye contact from eye openness and pupil position.
pub fn eye_contact_landmarks(gray: &GrayImage, landmarks: &LandmarkSet) -> Option<f32> {
    let left = eye_aspect_ratio(landmarks.left_eye())?;
    let right = eye_aspect_ratio(landmarks.right_eye())?;
    let ear = (left + right) / 2.0;
    let eyes_open = ((ear - EAR_CLOSED) / EAR_RANGE).clamp(0.0, 1.0);

    let gaze_sum: f32 = [landmarks.left_eye(), landmarks.right_eye()]
        .iter()
        .filter_map(|eye| eye_gaze(gray, eye))
        .sum();
    let gaze = if gaze_sum > 0.0 {
        gaze_sum / 2.0
    } else {
        DEFAULT_SCORE
    };

    Some((GAZE_WEIGHT * gaze + EYES_OPEN_WEIGHT * eyes_open).clamp(0.0, 1.0))
}

/// Eye contact from the number of eyes found in the face crop.
pub fn eye_contact_cascade(detector: &dyn RegionDetector, face_gray: &GrayImage) -> Result<f32, DetectorError> {
    let eyes = detector.detect(face_gray, &DetectParams::eye())?;
    Ok((eyes.len() as f32 / EXPECTED_EYES).min(1.0))
}

/// Symmetry of mirrored landmark pairs about the face's horizontal centre.
pub fn symmetry_landmarks(landmarks: &LandmarkSet, face: &FaceRegion) -> Option<f32> {
    if face.width <= 0 || face.height <= 0 {
        return None;
    }
    let (w, h) = (face.width as f32, face.height as f32);

    let points = landmarks.points();
    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let centre_x = (min_x + max_x) / 2.0;

    let total: f32 = SYMMETRIC_PAIRS
        .iter()
        .map(|&(l, r)| {
            let (left, right) = (landmarks.get(l), landmarks.get(r));
            let dl = (left.x - centre_x).abs();
            let dr = (right.x - centre_x).abs();
            let horizontal = 1.0 - ((dl - dr).abs() / w).min(1.0);
            let vertical = 1.0 - ((left.y - right.y).abs() / h).min(1.0);
            SYMMETRY_HORIZONTAL_WEIGHT * horizontal + SYMMETRY_VERTICAL_WEIGHT * vertical
        })
        .sum();

    let score = total / SYMMETRIC_PAIRS.len() as f32;
    score.is_finite().then_some(score)
}

/// Symmetry of the left half against the mirrored right half.
pub fn symmetry_mirror(face_gray: &GrayImage) -> Option<f32> {
    let (w, h) = face_gray.dimensions();
    let half = w / 2;
    if half == 0 || h == 0 {
        return None;
    }

    let mut diff_sum = 0u64;
    for y in 0..h {
        for x in 0..half {
            let l = face_gray.get_pixel(x, y)[0];
            let r = face_gray.get_pixel(w - 1 - x, y)[0];
            diff_sum += l.abs_diff(r) as u64;
        }
    }

    let mean = diff_sum as f64 / (half as u64 * h as u64) as f64;
    Some((1.0 - mean / 255.0).clamp(0.0, 1.0) as f32)
}

fn edge_density(face_gray: &GrayImage, (low, high): (f32, f32)) -> Option<f64> {
    let edges = imageops::canny(face_gray, low, high);
    if edges.is_empty() {
        return None;
    }
    Some(edges.iter().filter(|&&e| e).count() as f64 / edges.len() as f64)
}

/// Mean absolute deviation of 8-neighbour binary pattern codes from 128,
/// scaled to [0, 1].
fn lbp_score(face_gray: &GrayImage) -> f64 {
    let (w, h) = face_gray.dimensions();
    let px = |x: u32, y: u32| face_gray.get_pixel(x, y)[0];
    let mut total = 0u64;

    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let c = px(x, y);
            let neighbours = [
                px(x - 1, y - 1),
                px(x, y - 1),
                px(x + 1, y - 1),
                px(x + 1, y),
                px(x + 1, y + 1),
                px(x, y + 1),
                px(x - 1, y + 1),
                px(x - 1, y),
            ];
            let code = neighbours
                .iter()
                .fold(0i32, |acc, &n| (acc << 1) | (n >= c) as i32);
            total += (code - 128).unsigned_abs() as u64;
        }
    }

    (total as f64 / (w as f64 * h as f64 * LBP_SCALE)).min(1.0)
}

/// Weighted blend of edge density, intensity variance, gradient strength and
/// local texture.
pub fn expression_advanced(face_gray: &GrayImage) -> Option<f32> {
    let edge = (edge_density(face_gray, CANNY_FINE)? * EDGE_GAIN_ADVANCED).min(1.0);

    let (_, variance) = imageops::mean_variance(face_gray);
    let variance = (variance / VARIANCE_SCALE).min(1.0);

    let (gx, gy) = imageops::sobel(face_gray);
    let mean_grad = gx
        .iter()
        .zip(&gy)
        .map(|(dx, dy)| ((dx * dx + dy * dy) as f64).sqrt())
        .sum::<f64>()
        / gx.len() as f64;
    let gradient = (mean_grad / GRADIENT_SCALE).min(1.0);

    let lbp = lbp_score(face_gray);

    let combined = edge * EDGE_WEIGHT + variance * VARIANCE_WEIGHT + gradient * GRADIENT_WEIGHT + lbp * LBP_WEIGHT;
    Some(combined.clamp(0.0, 1.0) as f32)
}

/// Edge density of the face crop.
pub fn expression_basic(face_gray: &GrayImage) -> Option<f32> {
    let density = edge_density(face_gray, CANNY_COARSE)?;
    Some((density * EDGE_GAIN_BASIC).clamp(0.0, 1.0) as f32)
}

/// Face rectangle area over image area, clamped to [0, 1].
pub fn face_area_ratio(face: &FaceRegion, width: u32, height: u32) -> f32 {
    let image_area = width as f64 * height as f64;
    if image_area <= 0.0 {
        return DEFAULT_SCORE;
    }
    (face.area() as f64 / image_area).clamp(0.0, 1.0) as f32
}
