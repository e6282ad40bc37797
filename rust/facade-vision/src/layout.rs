// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Heuristic floor plan reconstruction from facade openings
//!
//! Window columns on the facade are taken as structural bays. Partitions run
//! between adjacent bays, a corridor splits the plan at half depth, and each
//! bay gets one door onto the corridor. The plan is an educated guess from
//! one elevation, not a survey. Openings whose center lies outside the
//! building bounds are ignored.

use crate::cluster::{gap_threshold, greedy_gap_clusters, Cluster1D};
use crate::error::{Error, Result, Stage};
use crate::types::{
    Bay, BuildingBounds, DetectionBox, DetectionLabel, DoorSymbol, FacadeMetrics,
    LayoutGeometry, OpeningKind, OpeningPlacement, Point2D, WallKind, WallSegment,
};
use serde::{Deserialize, Serialize};

/// Layout parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Assumed building depth behind the facade
    pub depth_mm: f64,
    /// Drawing millimeters per rectified pixel
    pub scale_mm_per_px: f64,
    /// Bay gap threshold as a multiple of the average window width
    pub bay_gap_factor: f64,
    /// Absolute bay gap threshold in pixels; overrides the factor
    pub bay_gap_px: Option<f64>,
    pub door_width_mm: f64,
    pub wall_thickness_mm: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            depth_mm: 12000.0,
            scale_mm_per_px: 10.0,
            bay_gap_factor: 1.0,
            bay_gap_px: None,
            door_width_mm: 900.0,
            wall_thickness_mm: 200.0,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("depth_mm", self.depth_mm),
            ("scale_mm_per_px", self.scale_mm_per_px),
            ("door_width_mm", self.door_width_mm),
            ("wall_thickness_mm", self.wall_thickness_mm),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("layout.{name} must be positive, got {value}")));
            }
        }
        if !(self.bay_gap_factor.is_finite() && self.bay_gap_factor >= 0.0) {
            return Err(Error::Config("layout.bay_gap_factor must be non-negative".into()));
        }
        Ok(())
    }
}

/// Pixel to drawing conversion
///
/// The only place where rectified pixels become millimeters and plan depth
/// becomes drawing Y. The drawing origin is the building's top-left corner;
/// the facade runs along `y = 0` and the plan extends into negative Y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawingFrame {
    left_px: f64,
    scale: f64,
}

impl DrawingFrame {
    pub fn new(bounds: &BuildingBounds, scale_mm_per_px: f64) -> Self {
        Self {
            left_px: bounds.left,
            scale: scale_mm_per_px,
        }
    }

    /// Facade pixel X to drawing X
    pub fn x_mm(&self, x_px: f64) -> f64 {
        (x_px - self.left_px) * self.scale
    }

    /// Pixel length to millimeters
    pub fn length_mm(&self, px: f64) -> f64 {
        px * self.scale
    }

    /// Plan point `depth_mm` behind the facade line
    pub fn plan_point(&self, x_mm: f64, depth_mm: f64) -> Point2D {
        Point2D::new(x_mm, -depth_mm)
    }
}

/// Builds [`LayoutGeometry`] from metrics and detections
#[derive(Debug, Clone, Default)]
pub struct LayoutGenerator {
    config: LayoutConfig,
}

impl LayoutGenerator {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn generate(
        &self,
        metrics: &FacadeMetrics,
        detections: &[DetectionBox],
        bounds: &BuildingBounds,
    ) -> Result<LayoutGeometry> {
        self.config.validate()?;

        let frame = DrawingFrame::new(bounds, self.config.scale_mm_per_px);
        let width_mm = frame.length_mm(bounds.width());
        let depth = self.config.depth_mm;

        let mut walls = vec![
            WallSegment::new(
                frame.plan_point(0.0, 0.0),
                frame.plan_point(0.0, depth),
                WallKind::Exterior,
            ),
            WallSegment::new(
                frame.plan_point(width_mm, 0.0),
                frame.plan_point(width_mm, depth),
                WallKind::Exterior,
            ),
            WallSegment::new(
                frame.plan_point(0.0, depth / 2.0),
                frame.plan_point(width_mm, depth / 2.0),
                WallKind::Corridor,
            ),
        ];

        let facade: Vec<&DetectionBox> = detections
            .iter()
            .filter(|d| d.label.is_opening())
            .filter(|d| bounds.contains(Point2D::new(d.center_x(), d.center_y())))
            .collect();
        let outside = detections.iter().filter(|d| d.label.is_opening()).count() - facade.len();
        if outside > 0 {
            tracing::debug!(outside, "Ignoring openings outside the building bounds");
        }
        let windows: Vec<&DetectionBox> = facade
            .iter()
            .copied()
            .filter(|d| d.label == DetectionLabel::Window)
            .collect();

        let mut bays = Vec::new();
        let mut doors = Vec::new();

        if windows.len() >= 2 {
            let clusters = self.bay_clusters(&windows)?;
            let partitions_px = partition_positions(&clusters, &windows);

            for &x_px in &partitions_px {
                let x = frame.x_mm(x_px);
                walls.push(WallSegment::new(
                    frame.plan_point(x, 0.0),
                    frame.plan_point(x, depth),
                    WallKind::Partition,
                ));
            }

            let mut boundaries = Vec::with_capacity(partitions_px.len() + 2);
            boundaries.push(0.0);
            boundaries.extend(partitions_px.iter().map(|&x| frame.x_mm(x)));
            boundaries.push(width_mm);

            for (index, cluster) in clusters.iter().enumerate() {
                let largest_window_area_px = cluster
                    .members
                    .iter()
                    .map(|&i| windows[i].area())
                    .fold(0.0, f64::max);
                let bay = Bay {
                    index,
                    start_x: boundaries[index],
                    end_x: boundaries[index + 1],
                    mean_center_x: frame.x_mm(cluster.mean),
                    window_count: cluster.len(),
                    largest_window_area_px,
                };
                doors.push(DoorSymbol {
                    position: frame.plan_point(bay.center_x(), depth / 2.0),
                    width: self.config.door_width_mm,
                    bay: index,
                });
                bays.push(bay);
            }
        } else {
            tracing::debug!(
                windows = windows.len(),
                "Too few windows for bays; emitting shell and corridor only"
            );
        }

        let openings = facade
            .iter()
            .filter_map(|d| {
                let kind = match d.label {
                    DetectionLabel::Window => OpeningKind::Window,
                    DetectionLabel::Door => OpeningKind::Door,
                    _ => return None,
                };
                let center = frame.x_mm(d.center_x());
                Some(OpeningPlacement {
                    kind,
                    start_x: frame.x_mm(d.x),
                    width: frame.length_mm(d.width),
                    height: frame.length_mm(d.height),
                    area_px: d.area(),
                    bay: bays.iter().position(|b: &Bay| b.contains_x(center)),
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            bays = bays.len(),
            walls = walls.len(),
            doors = doors.len(),
            openings = openings.len(),
            width_mm,
            depth_mm = depth,
            "Generated layout"
        );

        Ok(LayoutGeometry {
            walls,
            doors,
            openings,
            bays,
            story_count: metrics.story_count,
            structure_type: metrics.structure_type,
            width_mm,
            depth_mm: depth,
            wall_thickness_mm: self.config.wall_thickness_mm,
        })
    }

    fn bay_clusters(&self, windows: &[&DetectionBox]) -> Result<Vec<Cluster1D>> {
        let widths: Vec<f64> = windows.iter().map(|w| w.width).collect();
        let threshold = gap_threshold(&widths, self.config.bay_gap_factor, self.config.bay_gap_px);
        let centers: Vec<f64> = windows.iter().map(|w| w.center_x()).collect();

        let clusters = greedy_gap_clusters(&centers, threshold);
        if clusters.is_empty() {
            return Err(Error::EmptyClusters {
                stage: Stage::Layout,
            });
        }
        tracing::debug!(threshold, bays = clusters.len(), "Clustered window columns");
        Ok(clusters)
    }
}

/// Partition X (pixels) between each pair of adjacent bays
///
/// The midpoint between the left bay's rightmost window edge and the right
/// bay's leftmost window edge, unless that falls outside the open interval
/// between the two cluster means; then the midpoint of the means.
fn partition_positions(clusters: &[Cluster1D], windows: &[&DetectionBox]) -> Vec<f64> {
    clusters
        .windows(2)
        .map(|pair| {
            let (left, right) = (&pair[0], &pair[1]);
            let left_edge = left
                .members
                .iter()
                .map(|&i| windows[i].right())
                .fold(f64::MIN, f64::max);
            let right_edge = right
                .members
                .iter()
                .map(|&i| windows[i].x)
                .fold(f64::MAX, f64::min);

            let mid = (left_edge + right_edge) / 2.0;
            if mid > left.mean && mid < right.mean {
                mid
            } else {
                (left.mean + right.mean) / 2.0
            }
        })
        .collect()
}
