//! Boosted Haar cascade classifier (OpenCV cascade XML format).
//!
//! Loads `haarcascade_*.xml` definitions and runs multi-scale sliding-window
//! detection over an image pyramid, followed by neighbour grouping.

use crate::detector::{DetectParams, DetectorError, RegionDetector};
use crate::imageops;
use crate::types::FaceRegion;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

/// Relative tolerance used when clustering raw detections.
const GROUP_EPS: f64 = 0.2;
/// Windows whose intensity standard deviation is at or below this are skipped.
const MIN_WINDOW_STDDEV: f64 = 10.0;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded Haar cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    name: String,
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

/// Summed-area tables for one pyramid level, with a zero top row/left column.
struct Integral {
    stride: usize,
    sum: Vec<i64>,
    sqsum: Vec<i64>,
}

impl Integral {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sqsum = vec![0i64; stride * (h + 1)];
        let src = gray.as_raw();

        for y in 0..h {
            let mut row_sum = 0i64;
            let mut row_sq = 0i64;
            for x in 0..w {
                let p = src[y * w + x] as i64;
                row_sum += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sqsum[(y + 1) * stride + x + 1] = sqsum[y * stride + x + 1] + row_sq;
            }
        }

        Self { stride, sum, sqsum }
    }

    fn rect(table: &[i64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> i64 {
        table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
            + table[y * stride + x]
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        Self::rect(&self.sqsum, self.stride, x, y, w, h)
    }
}

/// Outcome of evaluating one window.
#[derive(Debug, PartialEq)]
enum WindowResult {
    Accepted,
    /// Rejected by the given stage.
    Rejected(usize),
    /// Too flat to evaluate.
    Skipped,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cascade = Self::from_xml(&xml)?.with_name(name);

        tracing::info!(
            path = %path.display(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            window = ?cascade.window_size(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| CascadeError::Malformed("missing <cascade> element".into()))?;

        if let Some(stage_type) = opt_text(root, "stageType") {
            if stage_type != "BOOST" {
                return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
            }
        }
        if let Some(feature_type) = opt_text(root, "featureType") {
            if feature_type != "HAAR" {
                return Err(CascadeError::Unsupported(format!("feature type {feature_type}")));
            }
        }

        let window_width: u32 = parse_one(text(root, "width")?)?;
        let window_height: u32 = parse_one(text(root, "height")?)?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Malformed(format!(
                "window {window_width}x{window_height} too small"
            )));
        }

        let features = items(child(root, "features")?)
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;
        for feature in &features {
            validate_feature(feature, window_width, window_height)?;
        }

        let stages = items(child(root, "stages")?)
            .map(parse_stage)
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Malformed("cascade has no stages".into()));
        }

        for stage in &stages {
            for wc in &stage.classifiers {
                validate_classifier(wc, features.len())?;
            }
        }

        Ok(Self {
            name: String::from("cascade"),
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Attach a display name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base detection window size `(width, height)`.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Detect objects at all scales and group overlapping hits.
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<FaceRegion> {
        let (img_w, img_h) = gray.dimensions();
        if img_w < self.window_width || img_h < self.window_height {
            return Vec::new();
        }

        let scale_factor = params.scale_factor.max(1.0001);
        let base_w = self.window_width as f64;
        let base_h = self.window_height as f64;
        let mut raw = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (base_w * factor).round() as u32;
            let win_h = (base_h * factor).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }

            if win_w >= params.min_size && win_h >= params.min_size {
                let scaled_w = (img_w as f64 / factor).round() as u32;
                let scaled_h = (img_h as f64 / factor).round() as u32;
                if scaled_w < self.window_width || scaled_h < self.window_height {
                    break;
                }

                let scaled = if factor == 1.0 {
                    gray.clone()
                } else {
                    imageops::resize_bilinear(gray, scaled_w, scaled_h)
                };
                self.scan_level(&scaled, factor, win_w, win_h, &mut raw);
            }

            factor *= scale_factor;
        }

        tracing::trace!(cascade = %self.name, raw = raw.len(), "cascade raw detections");
        group_rectangles(raw, params.min_neighbors, GROUP_EPS)
    }

    /// Slide the base window over one pyramid level.
    fn scan_level(
        &self,
        scaled: &GrayImage,
        factor: f64,
        win_w: u32,
        win_h: u32,
        out: &mut Vec<FaceRegion>,
    ) {
        let integral = Integral::new(scaled);
        let span_x = (scaled.width() - self.window_width + 1) as usize;
        let span_y = (scaled.height() - self.window_height + 1) as usize;
        let step = if factor > 2.0 { 1 } else { 2 };

        let mut y = 0;
        while y < span_y {
            let mut x = 0;
            while x < span_x {
                let result = self.eval_window(&integral, x, y);
                if result == WindowResult::Accepted {
                    out.push(FaceRegion::new(
                        (x as f64 * factor).round() as i32,
                        (y as f64 * factor).round() as i32,
                        win_w as i32,
                        win_h as i32,
                    ));
                }
                // A first-stage rejection also skips the neighbouring position.
                if result == WindowResult::Rejected(0) {
                    x += step;
                }
                x += step;
            }
            y += step;
        }
    }

    fn eval_window(&self, integral: &Integral, x: usize, y: usize) -> WindowResult {
        let nw = self.window_width as usize - 2;
        let nh = self.window_height as usize - 2;
        let area = (nw * nh) as f64;

        let sum = integral.sum(x + 1, y + 1, nw, nh) as f64;
        let sqsum = integral.sqsum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sqsum - sum * sum;
        if nf <= 0.0 {
            return WindowResult::Skipped;
        }
        let norm = nf.sqrt();
        // norm = area * stddev
        if norm <= area * MIN_WINDOW_STDDEV {
            return WindowResult::Skipped;
        }
        let inv_norm = (1.0 / norm) as f32;

        for (si, stage) in self.stages.iter().enumerate() {
            let mut stage_sum = 0.0f32;
            for wc in &stage.classifiers {
                let mut idx = 0i32;
                loop {
                    let node = &wc.nodes[idx as usize];
                    let value = self.feature_value(node.feature, integral, x, y) * inv_norm;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += wc.leaves[(-idx) as usize];
            }
            if stage_sum < stage.threshold {
                return WindowResult::Rejected(si);
            }
        }

        WindowResult::Accepted
    }

    fn feature_value(&self, feature: usize, integral: &Integral, x: usize, y: usize) -> f32 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| {
                let s = integral.sum(
                    x + r.x as usize,
                    y + r.y as usize,
                    r.width as usize,
                    r.height as usize,
                );
                r.weight * s as f32
            })
            .sum()
    }
}

impl RegionDetector for HaarCascade {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(self.detect_multi_scale(gray, params))
    }
}

/// Cluster similar rectangles and keep clusters with more than
/// `min_neighbors` members, averaged.
///
/// Clusters nested inside a better-supported cluster are dropped.
/// With `min_neighbors == 0` the input is returned unchanged.
pub fn group_rectangles(rects: Vec<FaceRegion>, min_neighbors: u32, eps: f64) -> Vec<FaceRegion> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let a = find(&mut parent, i);
                let b = find(&mut parent, j);
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    // Number classes in order of first appearance.
    let mut class_of_root = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut num_classes = 0;
    for i in 0..n {
        let root = find(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = num_classes;
            num_classes += 1;
        }
        labels.push(class_of_root[root]);
    }

    let mut sums = vec![[0i64; 4]; num_classes];
    let mut weights = vec![0u32; num_classes];
    for (r, &cls) in rects.iter().zip(&labels) {
        sums[cls][0] += r.x as i64;
        sums[cls][1] += r.y as i64;
        sums[cls][2] += r.width as i64;
        sums[cls][3] += r.height as i64;
        weights[cls] += 1;
    }

    let averaged: Vec<FaceRegion> = sums
        .iter()
        .zip(&weights)
        .map(|(s, &w)| {
            let inv = 1.0 / w as f64;
            FaceRegion::new(
                (s[0] as f64 * inv).round() as i32,
                (s[1] as f64 * inv).round() as i32,
                (s[2] as f64 * inv).round() as i32,
                (s[3] as f64 * inv).round() as i32,
            )
        })
        .collect();

    let mut out = Vec::new();
    for i in 0..num_classes {
        let n1 = weights[i];
        if n1 <= min_neighbors {
            continue;
        }
        let r1 = averaged[i];

        let nested = (0..num_classes).any(|j| {
            let n2 = weights[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r2.x - dx <= r1.x
                && r2.y - dy <= r1.y
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            out.push(r1);
        }
    }

    out
}

fn similar(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x) as f64).abs() <= delta
        && ((a.y - b.y) as f64).abs() <= delta
        && ((a.x + a.width - b.x - b.width) as f64).abs() <= delta
        && ((a.y + a.height - b.y - b.height) as f64).abs() <= delta
}

// --- XML helpers ---

fn items<'a, 'i>(node: roxmltree::Node<'a, 'i>) -> impl Iterator<Item = roxmltree::Node<'a, 'i>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'i>(node: roxmltree::Node<'a, 'i>, name: &str) -> Result<roxmltree::Node<'a, 'i>, CascadeError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| CascadeError::Malformed(format!("missing <{name}>")))
}

fn text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, CascadeError> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

fn opt_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(str::trim)
}

fn parse_one<T: std::str::FromStr>(s: &str) -> Result<T, CascadeError> {
    s.parse()
        .map_err(|_| CascadeError::Malformed(format!("cannot parse number {s:?}")))
}

fn parse_list<T: std::str::FromStr>(s: &str) -> Result<Vec<T>, CascadeError> {
    s.split_whitespace().map(parse_one).collect()
}

fn parse_feature(node: roxmltree::Node<'_, '_>) -> Result<HaarFeature, CascadeError> {
    if opt_text(node, "tilted").is_some_and(|t| t != "0") {
        return Err(CascadeError::Unsupported("tilted Haar features".into()));
    }

    let rects = items(child(node, "rects")?)
        .map(|r| {
            let values: Vec<f32> = parse_list(r.text().unwrap_or(""))?;
            if values.len() != 5 {
                return Err(CascadeError::Malformed(format!(
                    "rect needs 5 values, got {}",
                    values.len()
                )));
            }
            Ok(WeightedRect {
                x: values[0] as i32,
                y: values[1] as i32,
                width: values[2] as i32,
                height: values[3] as i32,
                weight: values[4],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() || rects.len() > 3 {
        return Err(CascadeError::Malformed(format!(
            "feature has {} rects",
            rects.len()
        )));
    }

    Ok(HaarFeature { rects })
}

fn parse_stage(node: roxmltree::Node<'_, '_>) -> Result<Stage, CascadeError> {
    let threshold: f32 = parse_one(text(node, "stageThreshold")?)?;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(|wc| {
            let raw: Vec<f64> = parse_list(text(wc, "internalNodes")?)?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                return Err(CascadeError::Malformed(format!(
                    "internalNodes length {} not a multiple of 4",
                    raw.len()
                )));
            }
            let nodes = raw
                .chunks_exact(4)
                .map(|c| TreeNode {
                    left: c[0] as i32,
                    right: c[1] as i32,
                    feature: c[2] as usize,
                    threshold: c[3] as f32,
                })
                .collect();
            let leaves = parse_list(text(wc, "leafValues")?)?;
            Ok(WeakClassifier { nodes, leaves })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stage {
        threshold,
        classifiers,
    })
}

/// Every rect must lie inside the detection window.
fn validate_feature(feature: &HaarFeature, window_width: u32, window_height: u32) -> Result<(), CascadeError> {
    for r in &feature.rects {
        let inside = r.x >= 0
            && r.y >= 0
            && r.width >= 0
            && r.height >= 0
            && r.x + r.width <= window_width as i32
            && r.y + r.height <= window_height as i32;
        if !inside {
            return Err(CascadeError::Malformed(format!(
                "rect ({}, {}, {}, {}) outside {window_width}x{window_height} window",
                r.x, r.y, r.width, r.height
            )));
        }
    }
    Ok(())
}

/// Check every node and leaf reference so evaluation can index directly.
fn validate_classifier(wc: &WeakClassifier, num_features: usize) -> Result<(), CascadeError> {
    for node in &wc.nodes {
        if node.feature >= num_features {
            return Err(CascadeError::Malformed(format!(
                "feature index {} out of range ({num_features} features)",
                node.feature
            )));
        }
        for link in [node.left, node.right] {
            let ok = if link > 0 {
                (link as usize) < wc.nodes.len()
            } else {
                ((-link) as usize) < wc.leaves.len()
            };
            if !ok {
                return Err(CascadeError::Malformed(format!("dangling tree link {link}")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// 8x8 window, one stump: fires when the left half is brighter than the right.
    const LEFT_BRIGHT_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 8 8 -1.</_>
        <_>
          0 0 4 8 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn params(min_neighbors: u32) -> DetectParams {
        DetectParams {
            scale_factor: 1.1,
            min_neighbors,
            min_size: 0,
        }
    }

    #[test]
    fn test_parse_synthetic_cascade() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        assert_eq!(cascade.window_size(), (8, 8));
        assert_eq!(cascade.stages.len(), 1);
        assert_eq!(cascade.features.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
    }

    #[test]
    fn test_single_window_accepts_left_bright() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 200 } else { 0 }]));
        let hits = cascade.detect_multi_scale(&gray, &params(0));
        assert_eq!(hits, vec![FaceRegion::new(0, 0, 8, 8)]);
    }

    #[test]
    fn test_single_window_rejects_mirrored() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 0 } else { 200 }]));
        assert!(cascade.detect_multi_scale(&gray, &params(0)).is_empty());
    }

    #[test]
    fn test_flat_window_skipped() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        let gray = GrayImage::from_pixel(8, 8, Luma([128]));
        assert!(cascade.detect_multi_scale(&gray, &params(0)).is_empty());
    }

    #[test]
    fn test_image_smaller_than_window() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        let gray = GrayImage::from_pixel(4, 4, Luma([128]));
        assert!(cascade.detect_multi_scale(&gray, &params(3)).is_empty());
    }

    #[test]
    fn test_min_size_filters_all_scales() {
        let cascade = HaarCascade::from_xml(LEFT_BRIGHT_XML).unwrap();
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 200 } else { 0 }]));
        let p = DetectParams {
            min_size: 30,
            ..params(0)
        };
        assert!(cascade.detect_multi_scale(&gray, &p).is_empty());
    }

    #[test]
    fn test_tilted_features_rejected() {
        let xml = LEFT_BRIGHT_XML.replace(
            "0 0 4 8 2.</_></rects>",
            "0 0 4 8 2.</_></rects><tilted>1</tilted>",
        );
        assert!(matches!(
            HaarCascade::from_xml(&xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_dangling_feature_index_rejected() {
        let xml = LEFT_BRIGHT_XML.replace("0 -1 0 5.0", "0 -1 7 5.0");
        assert!(matches!(
            HaarCascade::from_xml(&xml),
            Err(CascadeError::Malformed(_))
        ));
    }

    #[test]
    fn test_rect_outside_window_rejected() {
        for rect in ["6 0 4 8 2.", "0 1 4 8 2.", "-1 0 4 8 2."] {
            let xml = LEFT_BRIGHT_XML.replace("0 0 4 8 2.", rect);
            assert!(
                matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Malformed(_))),
                "rect {rect} accepted"
            );
        }
        // Touching the far edge is fine
        let xml = LEFT_BRIGHT_XML.replace("0 0 4 8 2.", "4 0 4 8 2.");
        assert!(HaarCascade::from_xml(&xml).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            HaarCascade::load("/nonexistent/haarcascade.xml"),
            Err(CascadeError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haarcascade_test.xml");
        std::fs::write(&path, LEFT_BRIGHT_XML).unwrap();
        let cascade = HaarCascade::load(&path).unwrap();
        assert_eq!(cascade.name(), "haarcascade_test");
    }

    #[test]
    fn test_group_rectangles_clusters_and_thresholds() {
        let mut rects = vec![
            FaceRegion::new(100, 100, 50, 50),
            FaceRegion::new(102, 101, 50, 50),
            FaceRegion::new(98, 99, 52, 52),
            FaceRegion::new(101, 100, 48, 48),
        ];
        // Lone detection far away: dropped with min_neighbors = 3
        rects.push(FaceRegion::new(400, 400, 50, 50));

        let grouped = group_rectangles(rects, 3, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        let r = grouped[0];
        assert_eq!((r.x, r.y, r.width, r.height), (100, 100, 50, 50));
    }

    #[test]
    fn test_group_rectangles_drops_nested() {
        let mut rects = Vec::new();
        // Strong outer cluster (5 members)
        for _ in 0..5 {
            rects.push(FaceRegion::new(0, 0, 100, 100));
        }
        // Weaker inner cluster (2 members)
        for _ in 0..2 {
            rects.push(FaceRegion::new(30, 30, 30, 30));
        }
        let grouped = group_rectangles(rects, 1, GROUP_EPS);
        assert_eq!(grouped, vec![FaceRegion::new(0, 0, 100, 100)]);
    }

    #[test]
    fn test_group_rectangles_zero_neighbors_passthrough() {
        let rects = vec![FaceRegion::new(1, 2, 3, 4), FaceRegion::new(1, 2, 3, 4)];
        assert_eq!(group_rectangles(rects.clone(), 0, GROUP_EPS), rects);
    }
}
