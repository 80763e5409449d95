//! Binary screening classifier via ONNX Runtime.
//!
//! The model takes a single 224×224 RGB image in NHWC layout scaled to
//! [-1, 1] and returns one probability.

use crate::imageops::bilinear_taps;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants ---
pub const CLASSIFIER_INPUT_SIZE: usize = 224;
const CLASSIFIER_SCALE: f32 = 127.5;
const CLASSIFIER_OFFSET: f32 = 1.0;
const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("empty input image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A model mapping a preprocessed image tensor to a probability.
pub trait Classifier: Send + Sync {
    /// Score a `[1, 224, 224, 3]` tensor from [`preprocess`].
    fn score(&self, input: &Array4<f32>) -> Result<f32, ClassifierError>;
}

/// Resize to 224×224 (bilinear) and scale each channel to `p / 127.5 - 1`.
pub fn preprocess(image: &RgbImage) -> Result<Array4<f32>, ClassifierError> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Err(ClassifierError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }

    let size = CLASSIFIER_INPUT_SIZE;
    let src = image.as_raw();
    let inv_x = w as f32 / size as f32;
    let inv_y = h as f32 / size as f32;
    let x_taps: Vec<_> = (0..size).map(|x| bilinear_taps(x, inv_x, w)).collect();

    let mut tensor = Array4::<f32>::zeros((1, size, size, CHANNELS));
    for y in 0..size {
        let (y0, y1, fy) = bilinear_taps(y, inv_y, h);
        for (x, &(x0, x1, fx)) in x_taps.iter().enumerate() {
            for c in 0..CHANNELS {
                let px = |yy: usize, xx: usize| src[(yy * w + xx) * CHANNELS + c] as f32;
                let val = px(y0, x0) * (1.0 - fx) * (1.0 - fy)
                    + px(y0, x1) * fx * (1.0 - fy)
                    + px(y1, x0) * (1.0 - fx) * fy
                    + px(y1, x1) * fx * fy;
                let pixel = val.round().clamp(0.0, 255.0);
                tensor[[0, y, x, c]] = pixel / CLASSIFIER_SCALE - CLASSIFIER_OFFSET;
            }
        }
    }

    Ok(tensor)
}

/// ONNX classifier. The session sits behind a mutex so one instance can be
/// shared across threads.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?;

        tracing::info!(
            path = %path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded screening classifier"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn score(&self, input: &Array4<f32>) -> Result<f32, ClassifierError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e}")))?;

        let raw = data
            .first()
            .copied()
            .ok_or_else(|| ClassifierError::InferenceFailed("empty output tensor".into()))?;
        validate_score(raw)
    }
}

/// Reject non-finite outputs and clamp to [0, 1].
pub fn validate_score(raw: f32) -> Result<f32, ClassifierError> {
    if !raw.is_finite() {
        return Err(ClassifierError::InferenceFailed(format!("non-finite score {raw}")));
    }
    Ok(raw.clamp(0.0, 1.0))
}
