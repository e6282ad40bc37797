// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facade element detection
//!
//! Detection proper (a learned model) lives outside this crate. The pipeline
//! only needs boxes, so it talks to a [`Detector`]: either a deterministic
//! synthetic grid for demos and tests, or boxes recorded offline by a model
//! or an annotation tool.

use crate::artifact;
use crate::error::{Error, Result, Stage};
use crate::types::{DetectionBox, DetectionLabel, ImageSize, Point2D};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of labeled boxes in rectified image space
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, image: &RgbaImage) -> Result<Vec<DetectionBox>>;
}

/// Clip detections into the frame, dropping empty or non-finite ones
pub fn sanitize(detections: Vec<DetectionBox>, size: ImageSize) -> Vec<DetectionBox> {
    let total = detections.len();
    let kept: Vec<DetectionBox> = detections
        .into_iter()
        .filter_map(|d| d.clamp_to(size))
        .collect();
    if kept.len() < total {
        tracing::debug!(
            dropped = total - kept.len(),
            "Dropped detections outside the image"
        );
    }
    kept
}

/// Regular window grid proportional to the image
///
/// One building box inset by `margin_ratio`, `stories x bays` windows, and an
/// entrance door replacing the middle ground-floor window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticDetector {
    pub stories: u32,
    pub bays: u32,
    pub margin_ratio: f64,
    /// Window width relative to the bay width
    pub window_width_ratio: f64,
    /// Window height relative to the story height
    pub window_height_ratio: f64,
    pub entrance_door: bool,
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self {
            stories: 3,
            bays: 4,
            margin_ratio: 0.05,
            window_width_ratio: 0.4,
            window_height_ratio: 0.45,
            entrance_door: true,
        }
    }
}

impl Detector for SyntheticDetector {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn detect(&self, image: &RgbaImage) -> Result<Vec<DetectionBox>> {
        let (w, h) = (image.width() as f64, image.height() as f64);
        if w == 0.0 || h == 0.0 || self.stories == 0 || self.bays == 0 {
            return Err(Error::degenerate(
                Stage::Detection,
                "empty image or empty synthetic grid",
            ));
        }

        let margin = self.margin_ratio.clamp(0.0, 0.45);
        let left = w * margin;
        let top = h * margin;
        let building_w = w - 2.0 * left;
        let building_h = h - 2.0 * top;
        let story_h = building_h / self.stories as f64;
        let bay_w = building_w / self.bays as f64;
        let window_w = bay_w * self.window_width_ratio;
        let window_h = story_h * self.window_height_ratio;

        let mut boxes = vec![DetectionBox::new(
            DetectionLabel::Building,
            left,
            top,
            building_w,
            building_h,
        )];

        let ground = self.stories - 1;
        let entrance_bay = self.bays / 2;
        for story in 0..self.stories {
            let story_top = top + story as f64 * story_h;
            for bay in 0..self.bays {
                let bay_left = left + bay as f64 * bay_w;
                if self.entrance_door && story == ground && bay == entrance_bay {
                    let door_w = bay_w * 0.6;
                    let door_h = story_h * 0.8;
                    boxes.push(DetectionBox::door(
                        bay_left + (bay_w - door_w) / 2.0,
                        story_top + story_h - door_h,
                        door_w,
                        door_h,
                    ));
                    continue;
                }
                boxes.push(DetectionBox::window(
                    bay_left + (bay_w - window_w) / 2.0,
                    story_top + (story_h - window_h) / 2.0,
                    window_w,
                    window_h,
                ));
            }
        }

        Ok(boxes)
    }
}

/// One labeled shape of a LabelMe-style annotation file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelMeShape {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub points: Vec<Point2D>,
    #[serde(default = "default_shape_type")]
    pub shape_type: String,
}

fn default_shape_type() -> String {
    "polygon".to_string()
}

impl LabelMeShape {
    /// Axis-aligned bounds of the shape; `None` without points
    ///
    /// Circles are stored as center plus one rim point.
    pub fn bounding_box(&self) -> Option<DetectionBox> {
        let label = DetectionLabel::from_annotation(&self.label);
        if self.shape_type == "circle" && self.points.len() >= 2 {
            let (center, rim) = (self.points[0], self.points[1]);
            let r = center.distance_to(&rim);
            return Some(DetectionBox::new(label, center.x - r, center.y - r, 2.0 * r, 2.0 * r));
        }

        let first = self.points.first()?;
        let (mut min, mut max) = (*first, *first);
        for p in &self.points[1..] {
            min = Point2D::new(min.x.min(p.x), min.y.min(p.y));
            max = Point2D::new(max.x.max(p.x), max.y.max(p.y));
        }
        Some(DetectionBox::new(label, min.x, min.y, max.x - min.x, max.y - min.y))
    }
}

/// Accepted layouts of a recorded detection file
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordedFile {
    Boxes(Vec<DetectionBox>),
    LabelMe { shapes: Vec<LabelMeShape> },
}

/// Boxes produced offline, replayed from a JSON file
#[derive(Debug, Clone)]
pub struct RecordedDetector {
    source: PathBuf,
    boxes: Vec<DetectionBox>,
}

impl RecordedDetector {
    pub fn new(source: impl Into<PathBuf>, boxes: Vec<DetectionBox>) -> Self {
        Self {
            source: source.into(),
            boxes,
        }
    }

    /// Read either a box array
    /// `[{"label": .., "x": .., "y": .., "width": .., "height": ..}]`
    /// or a LabelMe document `{"shapes": [{"label": .., "points": [[x, y], ..]}]}`
    pub fn load(path: &Path) -> Result<Self> {
        let boxes = match artifact::read_json::<RecordedFile>(path)? {
            RecordedFile::Boxes(boxes) => boxes,
            RecordedFile::LabelMe { shapes } => {
                let boxes: Vec<DetectionBox> =
                    shapes.iter().filter_map(LabelMeShape::bounding_box).collect();
                if boxes.len() < shapes.len() {
                    tracing::debug!(
                        skipped = shapes.len() - boxes.len(),
                        "Skipped annotation shapes without points"
                    );
                }
                boxes
            }
        };
        tracing::debug!(path = %path.display(), count = boxes.len(), "Loaded recorded detections");
        Ok(Self::new(path, boxes))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl Detector for RecordedDetector {
    fn name(&self) -> &str {
        "recorded"
    }

    fn detect(&self, image: &RgbaImage) -> Result<Vec<DetectionBox>> {
        let size = ImageSize::new(image.width(), image.height());
        Ok(sanitize(self.boxes.clone(), size))
    }
}

/// Detector selection in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DetectorKind {
    Synthetic(SyntheticDetector),
    Recorded { path: PathBuf },
}

impl Default for DetectorKind {
    fn default() -> Self {
        DetectorKind::Synthetic(SyntheticDetector::default())
    }
}

impl DetectorKind {
    pub fn build(&self) -> Result<Box<dyn Detector>> {
        match self {
            DetectorKind::Synthetic(detector) => Ok(Box::new(detector.clone())),
            DetectorKind::Recorded { path } => Ok(Box::new(RecordedDetector::load(path)?)),
        }
    }
}
