use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fiducial points in a full landmark set.
pub const LANDMARK_COUNT: usize = 68;

/// Score used for any feature that could not be measured.
pub const DEFAULT_SCORE: f32 = 0.5;

/// Axis-aligned face (or eye) rectangle in image coordinates.
///
/// Detectors may report rectangles that start outside the image; consumers
/// clamp before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl FaceRegion {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Area of the unclamped rectangle.
    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Intersect with an image of the given size.
    ///
    /// Returns `(x, y, width, height)` of the visible part, or `None` when
    /// nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = (self.x as i64).clamp(0, width as i64);
        let y0 = (self.y as i64).clamp(0, height as i64);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, width as i64);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, height as i64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The 68 iBUG fiducial points for one face.
///
/// Index ranges: 0–16 jaw, 17–26 eyebrows, 27–35 nose, 36–47 eyes, 48–67 mouth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    /// Build a landmark set; fails unless exactly 68 points are given.
    pub fn new(points: Vec<Point>) -> Result<Self, Vec<Point>> {
        if points.len() == LANDMARK_COUNT {
            Ok(Self { points })
        } else {
            Err(points)
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn get(&self, idx: usize) -> Point {
        self.points[idx]
    }

    /// Left eye contour (points 36–41).
    pub fn left_eye(&self) -> &[Point] {
        &self.points[36..42]
    }

    /// Right eye contour (points 42–47).
    pub fn right_eye(&self) -> &[Point] {
        &self.points[42..48]
    }
}

/// Head orientation. Only frontal is currently reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPosition {
    #[default]
    Frontal,
}

/// Quantitative facial signals for the primary face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Number of regions reported by the face locator, not just the analyzed one.
    pub face_count: usize,
    pub eye_contact: f32,
    pub face_symmetry: f32,
    pub expression_intensity: f32,
    pub head_position: HeadPosition,
    pub face_area_ratio: f32,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            face_count: 0,
            eye_contact: DEFAULT_SCORE,
            face_symmetry: DEFAULT_SCORE,
            expression_intensity: DEFAULT_SCORE,
            head_position: HeadPosition::Frontal,
            face_area_ratio: DEFAULT_SCORE,
        }
    }
}

impl FeatureVector {
    /// Default vector carrying the given face count.
    pub fn with_face_count(face_count: usize) -> Self {
        Self {
            face_count,
            ..Self::default()
        }
    }
}

/// Screening outcome tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Positive,
    Negative,
    Inconclusive,
    /// Also used when a face was found but the eyes are not usable.
    NoFaceDetected,
    Error,
}

impl Status {
    /// Whether the result carries a meaningful classifier score.
    pub fn is_classified(&self) -> bool {
        matches!(self, Status::Positive | Status::Negative | Status::Inconclusive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Positive => "positive",
            Status::Negative => "negative",
            Status::Inconclusive => "inconclusive",
            Status::NoFaceDetected => "no_face_detected",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single `Pipeline::predict` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub score: f32,
    pub status: Status,
    pub confidence: f32,
    pub features: FeatureVector,
    pub recommendations: Vec<String>,
}

impl PredictionResult {
    /// Result for a call that could not be completed.
    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            score: 0.0,
            status: Status::Error,
            confidence: 0.0,
            features: FeatureVector::default(),
            recommendations: vec![format!("Error during analysis: {message}")],
        }
    }
}

/// Wire shape handed to the service layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub score: f32,
    pub status: Status,
    pub facial_features: FeatureVector,
    pub recommendations: Vec<String>,
    pub confidence: f32,
}

impl From<PredictionResult> for AnalysisResponse {
    fn from(result: PredictionResult) -> Self {
        Self {
            success: result.status != Status::Error,
            score: result.score,
            status: result.status,
            facial_features: result.features,
            recommendations: result.recommendations,
            confidence: result.confidence,
        }
    }
}
