// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for facade analysis and floor plan reconstruction

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A 2D point (simplified for serialization)
///
/// Serializes as `{"x": .., "y": ..}` and also accepts `[x, y]` pairs on input,
/// which is how annotation tools usually write polygon vertices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "PointRepr")]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Named { x: f64, y: f64 },
    Pair([f64; 2]),
}

impl From<PointRepr> for Point2D {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Named { x, y } => Point2D::new(x, y),
            PointRepr::Pair([x, y]) => Point2D::new(x, y),
        }
    }
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_homogeneous(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, 1.0)
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether `p` lies inside `[0, width] x [0, height]`
    pub fn contains(&self, p: &Point2D) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= self.width as f64 && p.y <= self.height as f64
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Detector label classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DetectionLabel {
    Window,
    Door,
    Building,
    Ac,
    Other,
}

impl DetectionLabel {
    /// Windows and doors pierce the facade; everything else does not
    pub fn is_opening(&self) -> bool {
        matches!(self, DetectionLabel::Window | DetectionLabel::Door)
    }

    /// Classify a free-form annotation label such as `window_3` or `AC-unit`
    ///
    /// `window`, `building` and `door` match anywhere in the label; `ac` must
    /// be a word of its own so that e.g. `facade` is not an air conditioner.
    pub fn from_annotation(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("window") {
            DetectionLabel::Window
        } else if label.contains("building") {
            DetectionLabel::Building
        } else if label
            .split(|c: char| !c.is_ascii_alphabetic())
            .any(|word| word == "ac")
        {
            DetectionLabel::Ac
        } else if label.contains("door") {
            DetectionLabel::Door
        } else {
            DetectionLabel::Other
        }
    }
}

/// Number of detected facade elements per label
///
/// Building outlines are not facade elements and are not counted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionCounts {
    pub window: usize,
    pub ac: usize,
    pub door: usize,
    pub other: usize,
}

impl DetectionCounts {
    pub fn from_detections(detections: &[DetectionBox]) -> Self {
        let mut counts = Self::default();
        for d in detections {
            match d.label {
                DetectionLabel::Window => counts.window += 1,
                DetectionLabel::Ac => counts.ac += 1,
                DetectionLabel::Door => counts.door += 1,
                DetectionLabel::Other => counts.other += 1,
                DetectionLabel::Building => {}
            }
        }
        counts
    }
}

/// Axis-aligned detection in rectified-image pixel space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DetectionBox {
    pub label: DetectionLabel,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DetectionBox {
    pub fn new(label: DetectionLabel, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            label,
            x,
            y,
            width,
            height,
        }
    }

    pub fn window(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(DetectionLabel::Window, x, y, width, height)
    }

    pub fn door(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(DetectionLabel::Door, x, y, width, height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Clip the box to `[0, width] x [0, height]`.
    ///
    /// Returns `None` when nothing of the box remains inside the frame or
    /// when its coordinates are not finite.
    pub fn clamp_to(&self, size: ImageSize) -> Option<DetectionBox> {
        if !(self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite())
        {
            return None;
        }
        let (w, h) = (size.width as f64, size.height as f64);
        let x0 = self.x.min(self.right()).clamp(0.0, w);
        let y0 = self.y.min(self.bottom()).clamp(0.0, h);
        let x1 = self.x.max(self.right()).clamp(0.0, w);
        let y1 = self.y.max(self.bottom()).clamp(0.0, h);
        if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
            return None;
        }
        Some(DetectionBox::new(self.label, x0, y0, x1 - x0, y1 - y0))
    }
}

/// Building extent in rectified pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BuildingBounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BuildingBounds {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// The whole rectified frame
    pub fn from_frame(size: ImageSize) -> Self {
        Self::new(0.0, 0.0, size.width as f64, size.height as f64)
    }

    /// Use the largest `building` detection, falling back to the frame
    pub fn from_detections(detections: &[DetectionBox], size: ImageSize) -> Self {
        detections
            .iter()
            .filter(|d| d.label == DetectionLabel::Building && d.area() > 0.0)
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .map(|d| Self::new(d.x, d.y, d.right(), d.bottom()))
            .unwrap_or_else(|| Self::from_frame(size))
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Whether `p` lies strictly inside the building
    pub fn contains(&self, p: Point2D) -> bool {
        p.x > self.left && p.x < self.right && p.y > self.top && p.y < self.bottom
    }
}

/// Soft-story risk level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    High,
}

/// Coarse structural system guessed from the facade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StructureType {
    GlassCurtainWall,
    Masonry,
    RCFrame,
}

impl std::fmt::Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureType::GlassCurtainWall => write!(f, "Glass Curtain Wall"),
            StructureType::Masonry => write!(f, "Masonry"),
            StructureType::RCFrame => write!(f, "RC Frame"),
        }
    }
}

/// Structural risk report derived from one set of detections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacadeMetrics {
    /// Window-to-wall ratio in [0, 1]
    pub wwr: f64,
    pub story_count: u32,
    #[serde(rename = "opening_ratio_gf")]
    pub opening_ratio_ground_floor: f64,
    pub risk_soft_story: RiskLevel,
    pub structure_type: StructureType,
}

/// Wall classification in the generated layout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WallKind {
    Exterior,
    Partition,
    Corridor,
}

/// Straight wall in drawing millimeters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WallSegment {
    pub start: Point2D,
    pub end: Point2D,
    pub kind: WallKind,
}

impl WallSegment {
    pub fn new(start: Point2D, end: Point2D, kind: WallKind) -> Self {
        Self { start, end, kind }
    }

    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }
}

/// Symbolic door on the corridor line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoorSymbol {
    /// Door center on the corridor line (mm)
    pub position: Point2D,
    /// Clear opening width (mm)
    pub width: f64,
    /// Index into `LayoutGeometry::bays`
    pub bay: usize,
}

/// Opening type on the facade wall
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpeningKind {
    Window,
    Door,
}

/// Detected window or door projected onto the facade wall plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpeningPlacement {
    pub kind: OpeningKind,
    /// Left edge along the facade (mm from the building's left edge)
    pub start_x: f64,
    /// Width along the facade (mm)
    pub width: f64,
    /// Opening height (mm)
    pub height: f64,
    /// Area of the source detection in square pixels
    pub area_px: f64,
    /// Bay the opening belongs to, if any
    pub bay: Option<usize>,
}

impl OpeningPlacement {
    pub fn end_x(&self) -> f64 {
        self.start_x + self.width
    }
}

/// One structural bay between two partition (or exterior) walls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bay {
    pub index: usize,
    /// Left boundary (mm)
    pub start_x: f64,
    /// Right boundary (mm)
    pub end_x: f64,
    /// Mean window center of the bay's cluster (mm)
    pub mean_center_x: f64,
    pub window_count: usize,
    /// Area of the bay's largest window in square pixels
    pub largest_window_area_px: f64,
}

impl Bay {
    pub fn center_x(&self) -> f64 {
        (self.start_x + self.end_x) / 2.0
    }

    pub fn contains_x(&self, x: f64) -> bool {
        x >= self.start_x && x <= self.end_x
    }
}

/// Generated floor plan, consumed by the DXF exporter
///
/// Coordinates are millimeters with the origin at the building's top-left
/// corner, Y pointing up. The facade runs along `y = 0` and the building
/// extends to `y = -depth_mm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutGeometry {
    pub walls: Vec<WallSegment>,
    pub doors: Vec<DoorSymbol>,
    pub openings: Vec<OpeningPlacement>,
    pub bays: Vec<Bay>,
    pub story_count: u32,
    pub structure_type: StructureType,
    pub width_mm: f64,
    pub depth_mm: f64,
    pub wall_thickness_mm: f64,
}

impl LayoutGeometry {
    pub fn walls_of(&self, kind: WallKind) -> impl Iterator<Item = &WallSegment> {
        self.walls.iter().filter(move |w| w.kind == kind)
    }

    pub fn partition_count(&self) -> usize {
        self.walls_of(WallKind::Partition).count()
    }

    pub fn openings_of(&self, kind: OpeningKind) -> impl Iterator<Item = &OpeningPlacement> {
        self.openings.iter().filter(move |o| o.kind == kind)
    }
}
