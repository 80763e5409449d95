//! 68-point facial landmarks via an ensemble of regression trees.
//!
//! Reads dlib's `shape_predictor` serialization (raw `.dat` or `.dat.bz2`)
//! and runs the cascaded tree regression over a grayscale image.

use crate::alignment::{estimate_similarity, SimilarityTransform};
use crate::types::{FaceRegion, LandmarkSet, Point, LANDMARK_COUNT};
use bzip2::read::BzDecoder;
use image::GrayImage;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

const SUPPORTED_VERSION: i64 = 1;

// dlib encodes non-finite floats with these exponent markers.
const EXP_INF: i64 = 32000;
const EXP_NEG_INF: i64 = 32001;
const EXP_NAN: i64 = 32002;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to read landmark model: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid landmark model: {0}")]
    InvalidModel(String),
}

/// Source of fiducial points for a detected face.
pub trait LandmarkExtractor: Send + Sync {
    /// Locate landmarks inside `region`. `None` when they cannot be obtained.
    fn extract(&self, gray: &GrayImage, region: &FaceRegion) -> Option<LandmarkSet>;
}

#[derive(Debug, Clone, Copy)]
struct Split {
    idx1: usize,
    idx2: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct RegressionTree {
    splits: Vec<Split>,
    /// One flat `[x0, y0, x1, y1, ...]` delta per leaf.
    leaves: Vec<Vec<f32>>,
}

impl RegressionTree {
    fn leaf(&self, pixels: &[f32]) -> &[f32] {
        let mut i = 0;
        while i < self.splits.len() {
            let s = &self.splits[i];
            i = if pixels[s.idx1] - pixels[s.idx2] > s.threshold {
                2 * i + 1
            } else {
                2 * i + 2
            };
        }
        &self.leaves[i - self.splits.len()]
    }
}

/// Per-cascade feature pixel definitions.
#[derive(Debug, Clone)]
struct Cascade {
    trees: Vec<RegressionTree>,
    anchors: Vec<usize>,
    offsets: Vec<Point>,
}

/// Cascaded regression-tree shape predictor.
#[derive(Debug, Clone)]
pub struct ShapePredictor {
    /// Mean shape in unit-box coordinates.
    initial: Vec<Point>,
    cascades: Vec<Cascade>,
}

impl ShapePredictor {
    /// Load a model, decompressing `.bz2` files on the fly.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LandmarkError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LandmarkError::ModelNotFound(path.display().to_string()));
        }

        let reader = BufReader::new(File::open(path)?);
        let predictor = if path.extension().is_some_and(|ext| ext == "bz2") {
            Self::from_reader(BzDecoder::new(reader))?
        } else {
            Self::from_reader(reader)?
        };

        tracing::info!(
            path = %path.display(),
            landmarks = predictor.num_landmarks(),
            cascades = predictor.cascades.len(),
            "loaded shape predictor"
        );

        Ok(predictor)
    }

    /// Parse a model from any byte stream.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LandmarkError> {
        let mut r = DlibReader::new(reader);

        let version = r.read_int()?;
        if version != SUPPORTED_VERSION {
            return Err(invalid(format!("unsupported shape_predictor version {version}")));
        }

        let initial = r.read_shape()?;
        let num_parts = initial.len();
        if num_parts != LANDMARK_COUNT {
            return Err(invalid(format!(
                "model predicts {num_parts} landmarks, expected {LANDMARK_COUNT}"
            )));
        }

        let num_cascades = r.read_len()?;
        let mut forests = Vec::with_capacity(num_cascades);
        for _ in 0..num_cascades {
            let num_trees = r.read_len()?;
            let mut trees = Vec::with_capacity(num_trees);
            for _ in 0..num_trees {
                trees.push(r.read_tree(num_parts)?);
            }
            forests.push(trees);
        }

        let anchor_sets = r.read_len()?;
        let mut anchors = Vec::with_capacity(anchor_sets);
        for _ in 0..anchor_sets {
            let n = r.read_len()?;
            let mut set = Vec::with_capacity(n);
            for _ in 0..n {
                let idx = r.read_len()?;
                if idx >= num_parts {
                    return Err(invalid(format!("anchor {idx} out of range")));
                }
                set.push(idx);
            }
            anchors.push(set);
        }

        let offset_sets = r.read_len()?;
        let mut offsets = Vec::with_capacity(offset_sets);
        for _ in 0..offset_sets {
            let n = r.read_len()?;
            let mut set = Vec::with_capacity(n);
            for _ in 0..n {
                let x = r.read_float()?;
                let y = r.read_float()?;
                set.push(Point::new(x, y));
            }
            offsets.push(set);
        }

        if anchors.len() != forests.len() || offsets.len() != forests.len() {
            return Err(invalid(format!(
                "{} cascades but {} anchor sets and {} offset sets",
                forests.len(),
                anchors.len(),
                offsets.len()
            )));
        }

        let cascades = forests
            .into_iter()
            .zip(anchors)
            .zip(offsets)
            .map(|((trees, anchors), offsets)| {
                if anchors.len() != offsets.len() {
                    return Err(invalid("anchor and offset counts differ"));
                }
                let num_pixels = anchors.len();
                for tree in &trees {
                    if tree.splits.iter().any(|s| s.idx1 >= num_pixels || s.idx2 >= num_pixels) {
                        return Err(invalid("split references missing feature pixel"));
                    }
                }
                Ok(Cascade {
                    trees,
                    anchors,
                    offsets,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { initial, cascades })
    }

    pub fn num_landmarks(&self) -> usize {
        self.initial.len()
    }

    /// Run the cascade inside `region` and return points in image coordinates.
    pub fn predict(&self, gray: &GrayImage, region: &FaceRegion) -> Vec<Point> {
        let to_image = UnitBox::new(region);
        let mut current = self.initial.clone();
        let mut pixels = Vec::new();

        for cascade in &self.cascades {
            let tform = estimate_similarity(&self.initial, &current)
                .map(|t| SimilarityTransform { tx: 0.0, ty: 0.0, ..t })
                .unwrap_or(SimilarityTransform::IDENTITY);

            pixels.clear();
            pixels.extend(cascade.anchors.iter().zip(&cascade.offsets).map(|(&anchor, &offset)| {
                let d = tform.apply_linear(offset);
                let a = current[anchor];
                let p = to_image.map(Point::new(a.x + d.x, a.y + d.y));
                sample(gray, p.x.round(), p.y.round())
            }));

            for tree in &cascade.trees {
                let delta = tree.leaf(&pixels);
                for (pt, d) in current.iter_mut().zip(delta.chunks_exact(2)) {
                    pt.x += d[0];
                    pt.y += d[1];
                }
            }
        }

        current.into_iter().map(|p| to_image.map(p)).collect()
    }
}

impl LandmarkExtractor for ShapePredictor {
    fn extract(&self, gray: &GrayImage, region: &FaceRegion) -> Option<LandmarkSet> {
        if region.width <= 0 || region.height <= 0 {
            tracing::debug!(?region, "degenerate region, skipping landmarks");
            return None;
        }

        let points = self.predict(gray, region);
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            tracing::debug!("shape predictor produced non-finite points");
            return None;
        }

        match LandmarkSet::new(points) {
            Ok(set) => Some(set),
            Err(points) => {
                tracing::debug!(count = points.len(), "unexpected landmark count");
                None
            }
        }
    }
}

/// Maps unit-box coordinates onto a region: (0,0) → `(x, y)`, (1,1) →
/// `(x + width, y + height)`.
struct UnitBox {
    left: f32,
    top: f32,
    sx: f32,
    sy: f32,
}

impl UnitBox {
    fn new(region: &FaceRegion) -> Self {
        Self {
            left: region.x as f32,
            top: region.y as f32,
            sx: region.width as f32,
            sy: region.height as f32,
        }
    }

    fn map(&self, p: Point) -> Point {
        Point::new(self.left + p.x * self.sx, self.top + p.y * self.sy)
    }
}

fn sample(gray: &GrayImage, x: f32, y: f32) -> f32 {
    if x >= 0.0 && y >= 0.0 && x < gray.width() as f32 && y < gray.height() as f32 {
        gray.get_pixel(x as u32, y as u32)[0] as f32
    } else {
        0.0
    }
}

fn invalid(msg: impl Into<String>) -> LandmarkError {
    LandmarkError::InvalidModel(msg.into())
}

/// dlib binary serialization reader.
///
/// Integers: control byte (bit 7 = sign, low nibble = byte count) followed by
/// little-endian magnitude bytes. Floats: integer mantissa and exponent.
struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8, LandmarkError> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64, LandmarkError> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let num_bytes = (control & 0x0F) as usize;
        if num_bytes > 8 {
            return Err(invalid(format!("integer with {num_bytes} bytes")));
        }

        let mut magnitude: u64 = 0;
        for i in 0..num_bytes {
            magnitude |= (self.read_byte()? as u64) << (8 * i);
        }
        let value = magnitude as i64;
        Ok(if negative { -value } else { value })
    }

    /// Non-negative count or index.
    fn read_len(&mut self) -> Result<usize, LandmarkError> {
        let v = self.read_int()?;
        usize::try_from(v).map_err(|_| invalid(format!("expected unsigned value, got {v}")))
    }

    fn read_float(&mut self) -> Result<f32, LandmarkError> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        Ok(match exponent {
            EXP_INF => f32::INFINITY,
            EXP_NEG_INF => f32::NEG_INFINITY,
            EXP_NAN => f32::NAN,
            e => (mantissa as f64 * 2f64.powi(e as i32)) as f32,
        })
    }

    /// Column vector stored as `(-rows, -cols, data...)`.
    fn read_column(&mut self) -> Result<Vec<f32>, LandmarkError> {
        let rows = -self.read_int()?;
        let cols = -self.read_int()?;
        if rows < 0 || cols != 1 {
            return Err(invalid(format!("expected column vector, got {rows}x{cols}")));
        }
        (0..rows).map(|_| self.read_float()).collect()
    }

    fn read_shape(&mut self) -> Result<Vec<Point>, LandmarkError> {
        let data = self.read_column()?;
        if data.len() % 2 != 0 {
            return Err(invalid(format!("shape vector has odd length {}", data.len())));
        }
        Ok(data.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect())
    }

    fn read_tree(&mut self, num_parts: usize) -> Result<RegressionTree, LandmarkError> {
        let num_splits = self.read_len()?;
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            let idx1 = self.read_len()?;
            let idx2 = self.read_len()?;
            let threshold = self.read_float()?;
            splits.push(Split {
                idx1,
                idx2,
                threshold,
            });
        }

        let num_leaves = self.read_len()?;
        if num_leaves != num_splits + 1 {
            return Err(invalid(format!(
                "tree with {num_splits} splits has {num_leaves} leaves"
            )));
        }
        let mut leaves = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            let delta = self.read_column()?;
            if delta.len() != num_parts * 2 {
                return Err(invalid(format!(
                    "leaf delta has {} values, expected {}",
                    delta.len(),
                    num_parts * 2
                )));
            }
            leaves.push(delta);
        }

        Ok(RegressionTree { splits, leaves })
    }
}
