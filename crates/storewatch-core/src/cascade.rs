//! Haar cascade face detector.
//!
//! Loads OpenCV's `opencv-cascade-classifier` XML (e.g.
//! `haarcascade_frontalface_default.xml`) and scans an image pyramid with
//! the boosted stage classifier, then merges overlapping hits the way
//! OpenCV's `groupRectangles` does.

use crate::imgproc::{self, IntegralImage};
use crate::types::FaceRect;
use image::GrayImage;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Detection defaults ---
const DEFAULT_SCALE_FACTOR: f32 = 1.1;
const DEFAULT_MIN_NEIGHBORS: u32 = 5;
const DEFAULT_MIN_SIZE: (u32, u32) = (30, 30);
const GROUP_EPS: f32 = 0.2;

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
const SYSTEM_CASCADE_DIRS: [&str; 5] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv/haarcascades",
];

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}; install OpenCV data or set STOREWATCH_CASCADE_PATH")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cascade XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("missing element <{0}> in cascade")]
    MissingElement(&'static str),
    #[error("invalid value in <{element}>: {detail}")]
    InvalidValue { element: &'static str, detail: String },
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Tuning for [`HaarCascade::detect_multi_scale`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f32,
    /// Hits a merged rectangle needs to survive; 0 disables grouping.
    pub min_neighbors: u32,
    pub min_size: (u32, u32),
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_SIZE,
            max_size: None,
        }
    }
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f32,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    /// Child index; values <= 0 are leaf indices negated.
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

/// A boosted Haar-feature cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: usize,
    window_height: usize,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

impl HaarCascade {
    /// Load a cascade XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse the OpenCV cascade XML format.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = parse_tree(xml)?;
        let root = doc
            .children
            .iter()
            .flat_map(|storage| storage.children.iter())
            .find(|n| n.child("stages").is_some())
            .ok_or(CascadeError::MissingElement("stages"))?;

        let stage_type = root.required("stageType")?.text.trim();
        if stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
        }
        let feature_type = root.required("featureType")?.text.trim();
        if feature_type != "HAAR" {
            return Err(CascadeError::Unsupported(format!("feature type {feature_type}")));
        }

        let window_width = parse_scalar::<usize>(root.required("width")?, "width")?;
        let window_height = parse_scalar::<usize>(root.required("height")?, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::InvalidValue {
                element: "width",
                detail: format!("window {window_width}x{window_height} is too small"),
            });
        }

        let features = root
            .required("features")?
            .children
            .iter()
            .map(|f| parse_feature(f, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = root
            .required("stages")?
            .children
            .iter()
            .map(|s| parse_stage(s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::MissingElement("stages"));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Training window size (width, height).
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width as u32, self.window_height as u32)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether the window at (x, y) passes every stage.
    pub fn evaluate(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        self.run_at(ii, x, y).is_none()
    }

    /// Run the cascade at one window. Returns the rejecting stage, or `None`
    /// when all stages pass.
    fn run_at(&self, ii: &IntegralImage, x: usize, y: usize) -> Option<usize> {
        if x + self.window_width > ii.width() || y + self.window_height > ii.height() {
            return Some(0);
        }

        // Normalizer over the window shrunk by one pixel on each side.
        let (nx, ny) = (x + 1, y + 1);
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = ii.rect_sum(nx, ny, nw, nh) as f64;
        let sq_sum = ii.rect_sq_sum(nx, ny, nw, nh) as f64;
        let nf = area * sq_sum - sum * sum;
        let nf = (if nf > 0.0 { nf.sqrt() } else { 1.0 }) as f32;

        for (si, stage) in self.stages.iter().enumerate() {
            let mut stage_sum = 0.0f32;
            for weak in &stage.classifiers {
                let mut idx: i32 = 0;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.feature_value(ii, node.feature, x, y);
                    idx = if value < node.threshold * nf {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += weak.leaves[(-idx) as usize];
            }
            if stage_sum < stage.threshold {
                return Some(si);
            }
        }
        None
    }

    fn feature_value(&self, ii: &IntegralImage, feature: usize, x: usize, y: usize) -> f32 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f32)
            .sum()
    }

    /// Detect faces at every pyramid scale and merge the hits.
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &DetectParams) -> Vec<FaceRect> {
        let (img_w, img_h) = image.dimensions();
        let scale_factor = params.scale_factor.max(1.0001);
        let mut candidates = Vec::new();
        let mut factor = 1.0f32;

        loop {
            let win_w = (self.window_width as f32 * factor).round() as u32;
            let win_h = (self.window_height as f32 * factor).round() as u32;
            let scaled_w = (img_w as f32 / factor).round() as usize;
            let scaled_h = (img_h as f32 / factor).round() as usize;

            if scaled_w <= self.window_width || scaled_h <= self.window_height {
                break;
            }
            if let Some((max_w, max_h)) = params.max_size {
                if win_w > max_w || win_h > max_h {
                    break;
                }
            }
            if win_w < params.min_size.0 || win_h < params.min_size.1 {
                factor *= scale_factor;
                continue;
            }

            let scaled = if factor == 1.0 {
                image.clone()
            } else {
                imgproc::resize_bilinear(image, scaled_w as u32, scaled_h as u32)
            };
            let ii = IntegralImage::new(&scaled);
            let step = window_step(factor);
            let before = candidates.len();

            let mut y = 0;
            while y < scaled_h - self.window_height {
                let mut x = 0;
                while x < scaled_w - self.window_width {
                    match self.run_at(&ii, x, y) {
                        None => candidates.push(FaceRect {
                            x: (x as f32 * factor).round() as u32,
                            y: (y as f32 * factor).round() as u32,
                            width: win_w,
                            height: win_h,
                        }),
                        // Rejected by the first stage: skip the neighbour too.
                        Some(0) => x += step,
                        Some(_) => {}
                    }
                    x += step;
                }
                y += step;
            }

            tracing::trace!(factor, window = win_w, hits = candidates.len() - before, "scanned scale");
            factor *= scale_factor;
        }

        let grouped = group_rectangles(candidates, params.min_neighbors, GROUP_EPS);
        tracing::debug!(faces = grouped.len(), "detection finished");
        grouped
    }
}

/// Merge clusters of similar rectangles.
///
/// Two rectangles are similar when every edge differs by at most
/// `eps * (min widths + min heights) / 2`. Each cluster is averaged; clusters
/// with `count <= group_threshold` are dropped, and so is a cluster lying
/// inside a stronger one. `group_threshold == 0` returns the input as-is.
pub fn group_rectangles(rects: Vec<FaceRect>, group_threshold: u32, eps: f32) -> Vec<FaceRect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects;
    }

    let labels = partition(&rects, |a, b| similar_rects(a, b, eps));
    let nclasses = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![(0u64, 0u64, 0u64, 0u64); nclasses];
    let mut weights = vec![0u32; nclasses];
    for (rect, &cls) in rects.iter().zip(labels.iter()) {
        let s = &mut sums[cls];
        s.0 += rect.x as u64;
        s.1 += rect.y as u64;
        s.2 += rect.width as u64;
        s.3 += rect.height as u64;
        weights[cls] += 1;
    }

    let averaged: Vec<FaceRect> = sums
        .iter()
        .zip(weights.iter())
        .map(|(s, &n)| {
            let inv = 1.0 / n as f32;
            FaceRect {
                x: (s.0 as f32 * inv).round() as u32,
                y: (s.1 as f32 * inv).round() as u32,
                width: (s.2 as f32 * inv).round() as u32,
                height: (s.3 as f32 * inv).round() as u32,
            }
        })
        .collect();

    let mut out = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = weights[i];
        if n1 <= group_threshold {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = weights[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i64;
            let dy = (r2.height as f32 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            out.push(*r1);
        }
    }
    out
}

fn similar_rects(a: &FaceRect, b: &FaceRect, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let diff = |p: u32, q: u32| (p as f32 - q as f32).abs();
    diff(a.x, b.x) <= delta
        && diff(a.y, b.y) <= delta
        && diff(a.x + a.width, b.x + b.width) <= delta
        && diff(a.y + a.height, b.y + b.height) <= delta
}

/// Equivalence classes under `same`, numbered in order of first appearance.
fn partition<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut next = 0;
    (0..items.len())
        .map(|i| {
            let root = find(&mut parent, i);
            if class_of_root[root] == usize::MAX {
                class_of_root[root] = next;
                next += 1;
            }
            class_of_root[root]
        })
        .collect()
}

/// Window stride at a pyramid scale: every other position while windows are
/// small, every position once they are more than twice the base size.
fn window_step(factor: f32) -> usize {
    if factor > 2.0 {
        1
    } else {
        2
    }
}

/// Resolve the cascade file: the configured path if given, else the first
/// existing well-known location (`models/` under the working directory, then
/// the system OpenCV data directories).
pub fn find_cascade(configured: Option<&Path>) -> Result<PathBuf, CascadeError> {
    search_cascade(configured, Path::new(""))
}

fn search_cascade(configured: Option<&Path>, base: &Path) -> Result<PathBuf, CascadeError> {
    if let Some(path) = configured {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(CascadeError::NotFound(path.display().to_string()))
        };
    }

    let local = base.join("models").join(CASCADE_FILE);
    std::iter::once(local)
        .chain(SYSTEM_CASCADE_DIRS.iter().map(|d| Path::new(d).join(CASCADE_FILE)))
        .find(|p| p.exists())
        .ok_or_else(|| CascadeError::NotFound(CASCADE_FILE.to_string()))
}

// --- XML ---

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &'static str) -> Result<&XmlNode, CascadeError> {
        self.child(name).ok_or(CascadeError::MissingElement(name))
    }
}

fn parse_tree(xml: &str) -> Result<XmlNode, CascadeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack = vec![XmlNode::named(b"#document")];
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(XmlNode::named(e.name().as_ref())),
            Event::Empty(e) => {
                let node = XmlNode::named(e.name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                    top.text.push(' ');
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(CascadeError::Unsupported("unbalanced closing tag".into()));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(CascadeError::Unsupported("unclosed element at end of file".into()));
    }
    stack.pop().ok_or(CascadeError::MissingElement("opencv_storage"))
}

fn parse_list<T: std::str::FromStr>(node: &XmlNode, element: &'static str) -> Result<Vec<T>, CascadeError> {
    node.text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<T>().map_err(|_| CascadeError::InvalidValue {
                element,
                detail: format!("cannot parse {tok:?}"),
            })
        })
        .collect()
}

fn parse_scalar<T: std::str::FromStr>(node: &XmlNode, element: &'static str) -> Result<T, CascadeError> {
    let mut values = parse_list::<T>(node, element)?;
    if values.len() != 1 {
        return Err(CascadeError::InvalidValue {
            element,
            detail: format!("expected one value, got {}", values.len()),
        });
    }
    values.pop().ok_or(CascadeError::MissingElement(element))
}

fn parse_feature(node: &XmlNode, win_w: usize, win_h: usize) -> Result<Feature, CascadeError> {
    if let Some(tilted) = node.child("tilted") {
        if parse_scalar::<i32>(tilted, "tilted")? != 0 {
            return Err(CascadeError::Unsupported("tilted Haar features".into()));
        }
    }

    let rects = node
        .required("rects")?
        .children
        .iter()
        .map(|r| {
            let v = parse_list::<f32>(r, "rects")?;
            if v.len() != 5 {
                return Err(CascadeError::InvalidValue {
                    element: "rects",
                    detail: format!("expected 5 values, got {}", v.len()),
                });
            }
            let rect = WeightedRect {
                x: v[0] as usize,
                y: v[1] as usize,
                width: v[2] as usize,
                height: v[3] as usize,
                weight: v[4],
            };
            if v[..4].iter().any(|c| *c < 0.0)
                || rect.x + rect.width > win_w
                || rect.y + rect.height > win_h
            {
                return Err(CascadeError::InvalidValue {
                    element: "rects",
                    detail: format!("rectangle {:?} outside {win_w}x{win_h} window", &v[..4]),
                });
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::MissingElement("rects"));
    }
    Ok(Feature { rects })
}

fn parse_stage(node: &XmlNode, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold = parse_scalar::<f32>(node.required("stageThreshold")?, "stageThreshold")?;
    let classifiers = node
        .required("weakClassifiers")?
        .children
        .iter()
        .map(|w| parse_weak(w, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak(node: &XmlNode, feature_count: usize) -> Result<WeakClassifier, CascadeError> {
    let raw = parse_list::<f64>(node.required("internalNodes")?, "internalNodes")?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::InvalidValue {
            element: "internalNodes",
            detail: format!("{} values is not a whole number of nodes", raw.len()),
        });
    }
    let leaves = parse_list::<f32>(node.required("leafValues")?, "leafValues")?;

    let nodes: Vec<TreeNode> = raw
        .chunks_exact(4)
        .map(|c| TreeNode {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3] as f32,
        })
        .collect();

    let valid_child = |idx: i32| {
        if idx > 0 {
            (idx as usize) < nodes.len()
        } else {
            ((-idx) as usize) < leaves.len()
        }
    };
    for n in &nodes {
        if n.feature >= feature_count || !valid_child(n.left) || !valid_child(n.right) {
            return Err(CascadeError::InvalidValue {
                element: "internalNodes",
                detail: format!("node {n:?} references a missing feature, node or leaf"),
            });
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}
