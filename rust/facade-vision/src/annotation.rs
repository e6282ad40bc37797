// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping annotations between rectified and source image space
//!
//! Projective maps do not preserve right angles or circles, so rectangles
//! come back as quadrilaterals and circles are sampled into polygons before
//! mapping. Mapped points are never clamped; each one carries a flag telling
//! whether it landed outside the target frame.

use crate::artifact;
use crate::error::{Error, Result, Stage};
use crate::rectification::{apply_homography, TransformRecord};
use crate::types::{ImageSize, Point2D};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::path::Path;

/// Default number of samples around a circle
pub const DEFAULT_CIRCLE_SAMPLES: usize = 16;

/// Which matrix of the record to apply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    /// Inverse matrix; the usual case for labels drawn on the rectified image
    RectifiedToSource,
    /// Forward matrix
    SourceToRectified,
}

/// Annotation geometry as drawn by a labeling tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Point {
        x: f64,
        y: f64,
    },
    Rectangle {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Polygon {
        points: Vec<Point2D>,
    },
    Circle {
        center_x: f64,
        center_y: f64,
        radius: f64,
    },
}

/// A mapped coordinate and whether it fell outside the target frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MappedPoint {
    pub x: f64,
    pub y: f64,
    pub out_of_bounds: bool,
}

impl MappedPoint {
    pub fn point(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Shape after mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MappedShape {
    Point {
        point: MappedPoint,
    },
    /// Rectangle corners in TL, TR, BR, BL order of the input rectangle
    Quadrilateral {
        points: [MappedPoint; 4],
    },
    Polygon {
        points: Vec<MappedPoint>,
    },
    /// Sampled circle; the image of a circle is in general a conic
    Ellipse {
        center: MappedPoint,
        boundary_points: Vec<MappedPoint>,
    },
}

impl MappedShape {
    pub fn points(&self) -> Vec<MappedPoint> {
        match self {
            MappedShape::Point { point } => vec![*point],
            MappedShape::Quadrilateral { points } => points.to_vec(),
            MappedShape::Polygon { points } => points.clone(),
            MappedShape::Ellipse {
                center,
                boundary_points,
            } => std::iter::once(*center)
                .chain(boundary_points.iter().copied())
                .collect(),
        }
    }

    /// A shape is out of bounds when any of its points is
    pub fn out_of_bounds(&self) -> bool {
        self.points().iter().any(|p| p.out_of_bounds)
    }
}

/// One labeled annotation in a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    #[serde(flatten)]
    pub shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Annotation file: `{"image": .., "annotations": [{"type": .., .., "label": ..}]}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationDocument {
    pub image: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl AnnotationDocument {
    pub fn load(path: &Path) -> Result<Self> {
        artifact::read_json(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub original: Shape,
    pub mapped: MappedShape,
    pub out_of_bounds: bool,
}

/// Result of mapping a whole annotation document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedDocument {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    pub direction: MappingDirection,
    pub target_size: ImageSize,
    pub annotations: Vec<MappedAnnotation>,
}

/// Maps shapes through one transform record
#[derive(Debug, Clone)]
pub struct AnnotationMapper<'a> {
    record: &'a TransformRecord,
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
    circle_samples: usize,
}

impl<'a> AnnotationMapper<'a> {
    pub fn new(record: &'a TransformRecord) -> Self {
        Self {
            record,
            forward: record.forward(),
            inverse: record.inverse(),
            circle_samples: DEFAULT_CIRCLE_SAMPLES,
        }
    }

    /// Number of boundary samples for circles (at least 3)
    pub fn with_circle_samples(mut self, samples: usize) -> Self {
        self.circle_samples = samples.max(3);
        self
    }

    /// Frame that mapped points are checked against
    pub fn target_size(&self, direction: MappingDirection) -> ImageSize {
        match direction {
            MappingDirection::RectifiedToSource => self.record.source_size,
            MappingDirection::SourceToRectified => self.record.rectified_size,
        }
    }

    pub fn map_point(&self, p: Point2D, direction: MappingDirection) -> Result<MappedPoint> {
        if !p.is_finite() {
            return Err(Error::InvalidInput(format!(
                "annotation point ({}, {}) is not finite",
                p.x, p.y
            )));
        }

        let matrix = match direction {
            MappingDirection::RectifiedToSource => &self.inverse,
            MappingDirection::SourceToRectified => &self.forward,
        };
        let mapped = apply_homography(matrix, p).ok_or_else(|| {
            Error::degenerate(
                Stage::Annotation,
                format!("point ({}, {}) maps to infinity", p.x, p.y),
            )
        })?;

        Ok(MappedPoint {
            x: mapped.x,
            y: mapped.y,
            out_of_bounds: !self.target_size(direction).contains(&mapped),
        })
    }

    pub fn map_shape(&self, shape: &Shape, direction: MappingDirection) -> Result<MappedShape> {
        match shape {
            Shape::Point { x, y } => Ok(MappedShape::Point {
                point: self.map_point(Point2D::new(*x, *y), direction)?,
            }),
            Shape::Rectangle { x1, y1, x2, y2 } => {
                let (left, right) = (x1.min(*x2), x1.max(*x2));
                let (top, bottom) = (y1.min(*y2), y1.max(*y2));
                let corners = [
                    Point2D::new(left, top),
                    Point2D::new(right, top),
                    Point2D::new(right, bottom),
                    Point2D::new(left, bottom),
                ];
                let mut points = [MappedPoint {
                    x: 0.0,
                    y: 0.0,
                    out_of_bounds: false,
                }; 4];
                for (slot, corner) in points.iter_mut().zip(corners) {
                    *slot = self.map_point(corner, direction)?;
                }
                Ok(MappedShape::Quadrilateral { points })
            }
            Shape::Polygon { points } => {
                if points.is_empty() {
                    return Err(Error::InvalidInput("polygon annotation has no points".into()));
                }
                let points = points
                    .iter()
                    .map(|p| self.map_point(*p, direction))
                    .collect::<Result<Vec<_>>>()?;
                Ok(MappedShape::Polygon { points })
            }
            Shape::Circle {
                center_x,
                center_y,
                radius,
            } => {
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(Error::InvalidInput(format!(
                        "circle radius {radius} is not a non-negative number"
                    )));
                }
                let center = self.map_point(Point2D::new(*center_x, *center_y), direction)?;
                let boundary_points = (0..self.circle_samples)
                    .map(|i| {
                        let angle = TAU * i as f64 / self.circle_samples as f64;
                        let p = Point2D::new(
                            center_x + radius * angle.cos(),
                            center_y + radius * angle.sin(),
                        );
                        self.map_point(p, direction)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MappedShape::Ellipse {
                    center,
                    boundary_points,
                })
            }
        }
    }

    /// Map every annotation of `document`; any failing shape fails the document
    pub fn map_document(
        &self,
        document: &AnnotationDocument,
        direction: MappingDirection,
        transform: Option<&Path>,
    ) -> Result<MappedDocument> {
        let annotations = document
            .annotations
            .iter()
            .map(|ann| {
                let mapped = self.map_shape(&ann.shape, direction)?;
                Ok(MappedAnnotation {
                    label: ann.label.clone(),
                    original: ann.shape.clone(),
                    out_of_bounds: mapped.out_of_bounds(),
                    mapped,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let outside = annotations.iter().filter(|a| a.out_of_bounds).count();
        if outside > 0 {
            tracing::warn!(
                outside,
                total = annotations.len(),
                "Some annotations map outside the target image"
            );
        }
        tracing::info!(count = annotations.len(), "Mapped annotations");

        Ok(MappedDocument {
            image: document.image.clone(),
            transform: transform.map(|p| p.display().to_string()),
            direction,
            target_size: self.target_size(direction),
            annotations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rectification::RectificationEngine;
    use approx::assert_abs_diff_eq;

    fn record() -> TransformRecord {
        RectificationEngine::default()
            .compute_transform(
                ImageSize::new(1200, 900),
                &[
                    Point2D::new(150.0, 60.0),
                    Point2D::new(1050.0, 120.0),
                    Point2D::new(1100.0, 840.0),
                    Point2D::new(100.0, 800.0),
                ],
            )
            .unwrap()
    }

    #[test]
    fn test_round_trip_inside_frame() {
        let record = record();
        let mapper = AnnotationMapper::new(&record);
        let size = record.rectified_size;

        for fx in [0.0, 0.1, 0.5, 0.93, 1.0] {
            for fy in [0.0, 0.25, 0.5, 1.0] {
                let p = Point2D::new(size.width as f64 * fx, size.height as f64 * fy);
                let src = mapper.map_point(p, MappingDirection::RectifiedToSource).unwrap();
                let back = mapper
                    .map_point(src.point(), MappingDirection::SourceToRectified)
                    .unwrap();
                assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-3);
                assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_rectangle_maps_to_source_corners() {
        let record = record();
        let mapper = AnnotationMapper::new(&record);
        let size = record.rectified_size;
        let shape = Shape::Rectangle {
            x1: size.width as f64,
            y1: size.height as f64,
            x2: 0.0,
            y2: 0.0,
        };

        let mapped = mapper
            .map_shape(&shape, MappingDirection::RectifiedToSource)
            .unwrap();
        let MappedShape::Quadrilateral { points } = mapped else {
            panic!("expected quadrilateral");
        };
        for (p, corner) in points.iter().zip(record.source_points.iter()) {
            assert_abs_diff_eq!(p.x, corner.x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, corner.y, epsilon = 1e-6);
            assert!(!p.out_of_bounds);
        }
    }

    #[test]
    fn test_circle_sampling() {
        let record = record();
        let mapper = AnnotationMapper::new(&record).with_circle_samples(8);
        let shape = Shape::Circle {
            center_x: 200.0,
            center_y: 200.0,
            radius: 30.0,
        };
        let mapped = mapper
            .map_shape(&shape, MappingDirection::RectifiedToSource)
            .unwrap();
        match mapped {
            MappedShape::Ellipse {
                boundary_points, ..
            } => assert_eq!(boundary_points.len(), 8),
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_out_of_bounds_flagged_not_clamped() {
        let record = record();
        let mapper = AnnotationMapper::new(&record);
        let p = Point2D::new(-500.0, -500.0);
        let mapped = mapper
            .map_point(p, MappingDirection::RectifiedToSource)
            .unwrap();
        assert!(mapped.out_of_bounds);
        assert!(mapped.x < 0.0);

        let shape = Shape::Polygon {
            points: vec![Point2D::new(10.0, 10.0), p],
        };
        assert!(mapper
            .map_shape(&shape, MappingDirection::RectifiedToSource)
            .unwrap()
            .out_of_bounds());
    }

    #[test]
    fn test_point_at_infinity_is_degenerate() {
        let mut record = record();
        // Bottom row (0, 1, -100) sends y = 100 to w = 0
        record.inverse_matrix = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, -100.0]];
        let mapper = AnnotationMapper::new(&record);
        let err = mapper
            .map_point(Point2D::new(5.0, 100.0), MappingDirection::RectifiedToSource)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Annotation));
    }

    #[test]
    fn test_document_mapping_keeps_labels() {
        let record = record();
        let mapper = AnnotationMapper::new(&record);
        let doc: AnnotationDocument = serde_json::from_str(
            r#"{
                "image": "facade_rectified.png",
                "annotations": [
                    {"type": "point", "x": 100, "y": 200, "label": "crack"},
                    {"type": "rectangle", "x1": 10, "y1": 20, "x2": 110, "y2": 120, "label": "window"},
                    {"type": "polygon", "points": [[5, 5], [50, 5], [50, 60]]},
                    {"type": "circle", "center_x": 300, "center_y": 300, "radius": 12}
                ]
            }"#,
        )
        .unwrap();

        let mapped = mapper
            .map_document(&doc, MappingDirection::RectifiedToSource, Some(Path::new("t.json")))
            .unwrap();
        assert_eq!(mapped.annotations.len(), 4);
        assert_eq!(mapped.annotations[0].label.as_deref(), Some("crack"));
        assert_eq!(mapped.annotations[2].label, None);
        assert_eq!(mapped.transform.as_deref(), Some("t.json"));
        assert_eq!(mapped.target_size, record.source_size);

        let json = serde_json::to_value(&mapped).unwrap();
        assert_eq!(json["annotations"][1]["mapped"]["type"], "quadrilateral");
        assert_eq!(json["annotations"][1]["original"]["type"], "rectangle");
    }
}
