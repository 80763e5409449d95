//! Maps a classifier score and facial features to a screening outcome.

use crate::types::{FeatureVector, Status};

// --- Thresholds ---
pub const POSITIVE_THRESHOLD: f32 = 0.7;
pub const INCONCLUSIVE_THRESHOLD: f32 = 0.4;
/// Below this eye-contact score the eyes are treated as not visible.
pub const EYES_VISIBLE_THRESHOLD: f32 = 0.1;
const LOW_EYE_CONTACT: f32 = 0.3;
const LOW_EXPRESSION: f32 = 0.15;

const NO_FACE_MESSAGE: &str =
    "No face detected in the image. Please upload an image with a clear view of the face.";
const EYES_NOT_VISIBLE_MESSAGE: &str =
    "Face detected but eyes not visible. Please upload an image where the eyes are clearly visible.";

const POSITIVE_RECOMMENDATIONS: [&str; 7] = [
    "Based on facial expression analysis, we've detected patterns consistent with autism spectrum characteristics.",
    "We recommend scheduling a professional evaluation with a developmental pediatrician or psychologist.",
    "Early intervention services can significantly help. Contact your local early intervention program.",
    "Consider therapies such as ABA (Applied Behavior Analysis), speech therapy, or occupational therapy.",
    "Keep detailed records of your observations to share with healthcare providers.",
    "Build a support network with other parents and professionals.",
    "Remember: This is an initial screening tool, not a diagnosis. Professional assessment is essential.",
];
const EYE_CONTACT_RECOMMENDATION: &str =
    "Work on eye contact through play-based activities and structured practices.";
const EXPRESSION_RECOMMENDATION: &str =
    "Limited facial expression intensity detected. Encourage emotional expression through mirroring and social games.";

const INCONCLUSIVE_RECOMMENDATIONS: [&str; 5] = [
    "The analysis shows mixed indicators. We recommend retesting after 2-4 weeks.",
    "Consider taking multiple photos in different lighting and settings for better accuracy.",
    "Consult with a professional for a comprehensive developmental evaluation.",
    "Continue monitoring your child's social interactions and developmental milestones.",
    "Keep a detailed log of behaviors and interactions you observe.",
];

const NEGATIVE_RECOMMENDATIONS: [&str; 5] = [
    "Based on facial expression analysis, no significant autism indicators were detected at this time.",
    "Continue regular developmental check-ups with your pediatrician.",
    "Monitor for any developmental changes or new concerns.",
    "Maintain regular social interactions and developmental activities.",
    "If you have any concerns about development, always consult with a professional.",
];

/// Status, score, confidence and advice for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub score: f32,
    pub status: Status,
    pub confidence: f32,
    pub recommendations: Vec<String>,
}

impl Decision {
    fn unscored(message: &str) -> Self {
        Self {
            score: 0.0,
            status: Status::NoFaceDetected,
            confidence: 0.0,
            recommendations: vec![message.to_string()],
        }
    }
}

/// Stateless decision rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Outcome for images that must not be classified: no face, or a face
    /// whose eyes are not visible. Both report `no_face_detected`.
    pub fn gate(&self, features: &FeatureVector) -> Option<Decision> {
        if features.face_count == 0 {
            return Some(Decision::unscored(NO_FACE_MESSAGE));
        }
        if features.eye_contact < EYES_VISIBLE_THRESHOLD {
            return Some(Decision::unscored(EYES_NOT_VISIBLE_MESSAGE));
        }
        None
    }

    /// Full decision for a raw classifier score.
    pub fn decide(&self, raw_score: f32, features: &FeatureVector) -> Decision {
        if let Some(gated) = self.gate(features) {
            return gated;
        }

        let status = classify(raw_score);
        let recommendations = recommendations(status, features);
        Decision {
            score: raw_score,
            status,
            confidence: confidence(raw_score),
            recommendations,
        }
    }
}

/// Risk tier for a score: `> 0.7` positive, `> 0.4` inconclusive, else negative.
pub fn classify(score: f32) -> Status {
    if score > POSITIVE_THRESHOLD {
        Status::Positive
    } else if score > INCONCLUSIVE_THRESHOLD {
        Status::Inconclusive
    } else {
        Status::Negative
    }
}

/// Distance from the decision midpoint, scaled to [0, 1].
pub fn confidence(score: f32) -> f32 {
    ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0)
}

fn recommendations(status: Status, features: &FeatureVector) -> Vec<String> {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    match status {
        Status::Positive => {
            let mut recs = owned(&POSITIVE_RECOMMENDATIONS);
            if features.eye_contact < LOW_EYE_CONTACT {
                recs.push(EYE_CONTACT_RECOMMENDATION.to_string());
            }
            if features.expression_intensity < LOW_EXPRESSION {
                recs.push(EXPRESSION_RECOMMENDATION.to_string());
            }
            recs
        }
        Status::Inconclusive => owned(&INCONCLUSIVE_RECOMMENDATIONS),
        Status::Negative => owned(&NEGATIVE_RECOMMENDATIONS),
        Status::NoFaceDetected | Status::Error => Vec::new(),
    }
}
