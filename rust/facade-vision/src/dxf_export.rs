// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layered DXF export of generated layouts
//!
//! The layout is first flattened into a list of [`DrawingRecord`]s, which is
//! pure and deterministic, and only then turned into a DXF document. Units
//! are millimeters with the origin at the building's top-left corner.

use crate::artifact;
use crate::error::{Error, Result};
use crate::types::{Bay, LayoutGeometry, OpeningKind, Point2D};
use dxf::entities::{Arc, Entity, EntityType, Line, LwPolyline, Text};
use dxf::enums::{AcadVersion, Units};
use dxf::tables::Layer;
use dxf::{Color, Drawing, LwPolylineVertex};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

pub const LAYER_WALL: &str = "WALL";
pub const LAYER_WINDOW: &str = "WINDOW";
pub const LAYER_DOOR: &str = "DOOR";
pub const LAYER_ANNOTATION: &str = "ANNOTATION";

/// Layer names with their ACI colors: white, cyan, red, yellow
pub const LAYERS: [(&str, u8); 4] = [
    (LAYER_WALL, 7),
    (LAYER_WINDOW, 4),
    (LAYER_DOOR, 1),
    (LAYER_ANNOTATION, 2),
];

/// Export options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Window area percentile (0..=100) above which a bay counts as a living room
    pub living_room_percentile: f64,
    pub text_height_mm: f64,
    /// Offset of room labels from the bay's left boundary
    pub label_margin_mm: f64,
    /// Add a title line with story count and structure type
    pub include_title: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            living_room_percentile: 50.0,
            text_height_mm: 250.0,
            label_margin_mm: 300.0,
            include_title: true,
        }
    }
}

/// Guesses a room name for each bay
pub trait RoomNamePolicy: Send + Sync + std::fmt::Debug {
    fn room_name(&self, bay: &Bay, layout: &LayoutGeometry) -> String;
}

/// Large windows mean living rooms, small ones bedrooms or toilets
#[derive(Debug, Clone, Copy)]
pub struct WindowAreaPercentile {
    percentile: f64,
}

impl WindowAreaPercentile {
    pub fn new(percentile: f64) -> Self {
        Self {
            percentile: percentile.clamp(0.0, 100.0),
        }
    }
}

impl RoomNamePolicy for WindowAreaPercentile {
    fn room_name(&self, bay: &Bay, layout: &LayoutGeometry) -> String {
        let areas: Vec<f64> = layout
            .openings_of(OpeningKind::Window)
            .map(|o| o.area_px)
            .collect();
        if bay.largest_window_area_px > percentile(&areas, self.percentile) {
            "Living Room".to_string()
        } else {
            "Bedroom/Toilet".to_string()
        }
    }
}

/// Linear-interpolated percentile; 0 for no values
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// One drawing primitive on a named layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum DrawingRecord {
    Line {
        layer: &'static str,
        start: Point2D,
        end: Point2D,
    },
    Polyline {
        layer: &'static str,
        points: Vec<Point2D>,
        closed: bool,
    },
    /// Angles in degrees, counter-clockwise
    Arc {
        layer: &'static str,
        center: Point2D,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Text {
        layer: &'static str,
        position: Point2D,
        height: f64,
        value: String,
    },
}

impl DrawingRecord {
    pub fn layer(&self) -> &'static str {
        match self {
            DrawingRecord::Line { layer, .. }
            | DrawingRecord::Polyline { layer, .. }
            | DrawingRecord::Arc { layer, .. }
            | DrawingRecord::Text { layer, .. } => *layer,
        }
    }

    fn to_entity(&self) -> Entity {
        let specific = match self {
            DrawingRecord::Line { start, end, .. } => {
                EntityType::Line(Line::new(dxf_point(start), dxf_point(end)))
            }
            DrawingRecord::Polyline { points, closed, .. } => {
                let mut polyline = LwPolyline::default();
                for p in points {
                    polyline.vertices.push(LwPolylineVertex {
                        x: p.x,
                        y: p.y,
                        ..Default::default()
                    });
                }
                polyline.set_is_closed(*closed);
                EntityType::LwPolyline(polyline)
            }
            DrawingRecord::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                ..
            } => EntityType::Arc(Arc::new(dxf_point(center), *radius, *start_angle, *end_angle)),
            DrawingRecord::Text {
                position,
                height,
                value,
                ..
            } => EntityType::Text(Text {
                location: dxf_point(position),
                text_height: *height,
                value: value.clone(),
                ..Default::default()
            }),
        };

        let mut entity = Entity::new(specific);
        entity.common.layer = self.layer().to_string();
        entity
    }
}

fn dxf_point(p: &Point2D) -> dxf::Point {
    dxf::Point::new(p.x, p.y, 0.0)
}

/// Serializes [`LayoutGeometry`] to DXF
#[derive(Debug)]
pub struct DxfExporter {
    config: ExportConfig,
    policy: Box<dyn RoomNamePolicy>,
}

impl Default for DxfExporter {
    fn default() -> Self {
        Self::new(ExportConfig::default())
    }
}

impl DxfExporter {
    pub fn new(config: ExportConfig) -> Self {
        let policy = Box::new(WindowAreaPercentile::new(config.living_room_percentile));
        Self { config, policy }
    }

    /// Replace the room naming heuristic
    pub fn with_policy(mut self, policy: impl RoomNamePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Flatten the layout into drawing primitives, in a fixed order:
    /// walls, window openings, door openings, door symbols, labels
    pub fn records(&self, layout: &LayoutGeometry) -> Vec<DrawingRecord> {
        let mut records = Vec::new();

        for wall in &layout.walls {
            records.push(DrawingRecord::Line {
                layer: LAYER_WALL,
                start: wall.start,
                end: wall.end,
            });
        }

        let half = layout.wall_thickness_mm / 2.0;
        for kind in [OpeningKind::Window, OpeningKind::Door] {
            let layer = match kind {
                OpeningKind::Window => LAYER_WINDOW,
                OpeningKind::Door => LAYER_DOOR,
            };
            for opening in layout.openings_of(kind) {
                records.push(DrawingRecord::Polyline {
                    layer,
                    points: vec![
                        Point2D::new(opening.start_x, -half),
                        Point2D::new(opening.end_x(), -half),
                        Point2D::new(opening.end_x(), half),
                        Point2D::new(opening.start_x, half),
                    ],
                    closed: true,
                });
            }
        }

        for door in &layout.doors {
            let hinge = Point2D::new(door.position.x - door.width / 2.0, door.position.y);
            records.push(DrawingRecord::Line {
                layer: LAYER_DOOR,
                start: hinge,
                end: Point2D::new(hinge.x, hinge.y + door.width),
            });
            records.push(DrawingRecord::Arc {
                layer: LAYER_DOOR,
                center: hinge,
                radius: door.width,
                start_angle: 0.0,
                end_angle: 90.0,
            });
        }

        for bay in &layout.bays {
            records.push(DrawingRecord::Text {
                layer: LAYER_ANNOTATION,
                position: Point2D::new(
                    bay.start_x + self.config.label_margin_mm,
                    -layout.depth_mm / 4.0,
                ),
                height: self.config.text_height_mm,
                value: self.policy.room_name(bay, layout),
            });
        }

        if self.config.include_title {
            records.push(DrawingRecord::Text {
                layer: LAYER_ANNOTATION,
                position: Point2D::new(0.0, -layout.depth_mm - 2.0 * self.config.text_height_mm),
                height: self.config.text_height_mm,
                value: format!(
                    "{} stories, {}",
                    layout.story_count, layout.structure_type
                ),
            });
        }

        records
    }

    /// Build the DXF document
    pub fn build_drawing(&self, layout: &LayoutGeometry) -> Drawing {
        let mut drawing = Drawing::new();
        drawing.header.version = AcadVersion::R2010;
        drawing.header.default_drawing_units = Units::Millimeters;

        for (name, color) in LAYERS {
            drawing.add_layer(Layer {
                name: name.to_string(),
                color: Color::from_index(color),
                ..Default::default()
            });
        }

        for record in self.records(layout) {
            drawing.add_entity(record.to_entity());
        }
        drawing
    }

    /// Write the layout to `path`; nothing is left behind on failure
    pub fn export(&self, layout: &LayoutGeometry, path: &Path) -> Result<()> {
        let drawing = self.build_drawing(layout);

        let mut buffer = Vec::new();
        drawing
            .save(&mut buffer)
            .map_err(|e| Error::Dxf(e.to_string()))?;

        artifact::write_atomic(path, |w: &mut dyn Write| {
            w.write_all(&buffer).map_err(|source| Error::Write {
                path: path.to_path_buf(),
                source,
            })
        })?;

        tracing::info!(
            path = %path.display(),
            entities = drawing.entities().count(),
            "Exported DXF layout"
        );
        Ok(())
    }
}
