// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural risk metrics from facade detections

use crate::cluster::{gap_threshold, greedy_gap_clusters};
use crate::error::{Error, Result, Stage};
use crate::types::{
    BuildingBounds, DetectionBox, DetectionLabel, FacadeMetrics, RiskLevel, StructureType,
};
use serde::{Deserialize, Serialize};

/// Thresholds for the facade metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Story gap threshold as a multiple of the average window height
    pub story_gap_factor: f64,
    /// Absolute story gap threshold in pixels; overrides the factor
    pub story_gap_px: Option<f64>,
    /// Ground-floor opening ratio above which the soft-story risk is HIGH
    pub soft_story_opening_ratio: f64,
    /// Ground story height, relative to the typical story height, above
    /// which the soft-story risk is HIGH
    pub soft_story_height_factor: f64,
    pub glass_curtain_min_wwr: f64,
    pub masonry_max_wwr: f64,
    /// Masonry requires fewer stories than this
    pub masonry_max_stories: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            story_gap_factor: 1.0,
            story_gap_px: None,
            soft_story_opening_ratio: 0.6,
            soft_story_height_factor: 1.5,
            glass_curtain_min_wwr: 0.7,
            masonry_max_wwr: 0.3,
            masonry_max_stories: 6,
        }
    }
}

/// Story structure recovered from window rows
#[derive(Debug, Clone, PartialEq)]
pub struct StoryProfile {
    /// Mean window center of each story, top to bottom (image Y)
    pub centers: Vec<f64>,
    /// Gap threshold the rows were clustered with
    pub threshold: f64,
}

impl StoryProfile {
    /// Cluster window rows; no windows gives an empty profile
    pub fn from_windows(windows: &[&DetectionBox], config: &MetricsConfig) -> Self {
        let heights: Vec<f64> = windows.iter().map(|w| w.height).collect();
        let threshold = gap_threshold(&heights, config.story_gap_factor, config.story_gap_px);
        let centers: Vec<f64> = windows.iter().map(|w| w.center_y()).collect();
        let centers = greedy_gap_clusters(&centers, threshold)
            .into_iter()
            .map(|c| c.mean)
            .collect();
        Self { centers, threshold }
    }

    /// Number of stories; at least one
    pub fn story_count(&self) -> u32 {
        (self.centers.len() as u32).max(1)
    }

    /// Mean spacing between consecutive story centers
    pub fn typical_story_height(&self) -> Option<f64> {
        let n = self.centers.len();
        if n < 2 {
            return None;
        }
        Some((self.centers[n - 1] - self.centers[0]) / (n - 1) as f64)
    }

    /// Distance from the building bottom to the boundary between the two
    /// lowest stories
    pub fn ground_story_height(&self, building_bottom: f64) -> Option<f64> {
        let n = self.centers.len();
        if n < 2 {
            return None;
        }
        let boundary = (self.centers[n - 2] + self.centers[n - 1]) / 2.0;
        Some(building_bottom - boundary)
    }
}

/// Derives [`FacadeMetrics`] from detections in rectified pixel space
#[derive(Debug, Clone, Default)]
pub struct FacadeMetricsAnalyzer {
    config: MetricsConfig,
}

impl FacadeMetricsAnalyzer {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        detections: &[DetectionBox],
        bounds: &BuildingBounds,
    ) -> Result<FacadeMetrics> {
        if ![bounds.left, bounds.top, bounds.right, bounds.bottom]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(Error::degenerate(
                Stage::Metrics,
                "building bounds are not finite",
            ));
        }

        let windows: Vec<&DetectionBox> = detections
            .iter()
            .filter(|d| d.label == DetectionLabel::Window)
            .collect();

        let wwr = window_to_wall_ratio(&windows, bounds);
        let stories = StoryProfile::from_windows(&windows, &self.config);
        let story_count = stories.story_count();

        let opening_ratio = ground_floor_opening_ratio(detections, bounds, story_count);

        let ground_height = stories.ground_story_height(bounds.bottom);
        let typical_height = stories.typical_story_height();
        let tall_ground_floor = match (ground_height, typical_height) {
            (Some(ground), Some(typical)) if typical > 0.0 => {
                ground > self.config.soft_story_height_factor * typical
            }
            _ => false,
        };

        // Without windows there are no stories to compare; door-only openings
        // are still reported but never raise the risk.
        let risk_soft_story = if windows.is_empty() {
            RiskLevel::Low
        } else if opening_ratio > self.config.soft_story_opening_ratio || tall_ground_floor {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };

        let structure_type = classify_structure(wwr, story_count, &self.config);

        tracing::info!(
            windows = windows.len(),
            wwr,
            story_count,
            opening_ratio_gf = opening_ratio,
            tall_ground_floor,
            risk = ?risk_soft_story,
            structure = %structure_type,
            "Analyzed facade"
        );

        Ok(FacadeMetrics {
            wwr,
            story_count,
            opening_ratio_ground_floor: opening_ratio,
            risk_soft_story,
            structure_type,
        })
    }
}

/// Total window area over building area, clamped to [0, 1]
pub fn window_to_wall_ratio(windows: &[&DetectionBox], bounds: &BuildingBounds) -> f64 {
    let area = bounds.area();
    if area <= 0.0 {
        return 0.0;
    }
    let window_area = windows.iter().fold(0.0, |acc, w| acc + w.area());
    (window_area / area).clamp(0.0, 1.0)
}

/// Sum of opening widths in the bottom story band over the building width
///
/// Not clamped: overlapping doors and windows can exceed 1.
pub fn ground_floor_opening_ratio(
    detections: &[DetectionBox],
    bounds: &BuildingBounds,
    story_count: u32,
) -> f64 {
    let width = bounds.width();
    if width <= 0.0 {
        return 0.0;
    }
    let ground_top = bounds.bottom - bounds.height() / story_count.max(1) as f64;
    let opening_width = detections
        .iter()
        .filter(|d| d.label.is_opening() && d.center_y() > ground_top)
        .fold(0.0, |acc, d| acc + d.width);
    opening_width / width
}

pub fn classify_structure(wwr: f64, story_count: u32, config: &MetricsConfig) -> StructureType {
    if wwr > config.glass_curtain_min_wwr {
        StructureType::GlassCurtainWall
    } else if wwr < config.masonry_max_wwr && story_count < config.masonry_max_stories {
        StructureType::Masonry
    } else {
        StructureType::RCFrame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 4 windows of 80x120 per row, rows centered at the given heights
    fn window_grid(rows: &[f64]) -> Vec<DetectionBox> {
        let mut boxes = Vec::new();
        for &cy in rows {
            for col in 0..4 {
                boxes.push(DetectionBox::window(
                    100.0 + 200.0 * col as f64,
                    cy - 60.0,
                    80.0,
                    120.0,
                ));
            }
        }
        boxes
    }

    #[test]
    fn test_wwr_and_story_count() {
        let detections = window_grid(&[200.0, 600.0, 1000.0]);
        let bounds = BuildingBounds::new(0.0, 0.0, 1000.0, 1365.0);

        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();

        assert_relative_eq!(metrics.wwr, 12.0 * 80.0 * 120.0 / (1000.0 * 1365.0));
        assert_relative_eq!(metrics.wwr, 0.0844, epsilon = 1e-4);
        assert_eq!(metrics.story_count, 3);
        assert_relative_eq!(metrics.opening_ratio_ground_floor, 0.32);
        assert_eq!(metrics.risk_soft_story, RiskLevel::Low);
        assert_eq!(metrics.structure_type, StructureType::Masonry);
    }

    #[test]
    fn test_story_clustering_with_absolute_threshold() {
        let detections = window_grid(&[1000.0, 200.0, 600.0]);
        let windows: Vec<&DetectionBox> = detections.iter().collect();
        let config = MetricsConfig {
            story_gap_px: Some(399.0),
            ..Default::default()
        };
        let profile = StoryProfile::from_windows(&windows, &config);
        assert_eq!(profile.story_count(), 3);
        assert_eq!(profile.centers, vec![200.0, 600.0, 1000.0]);
        assert_eq!(profile.typical_story_height(), Some(400.0));
        assert_eq!(profile.ground_story_height(1365.0), Some(565.0));
    }

    #[test]
    fn test_soft_story_from_wide_ground_openings() {
        let mut detections = window_grid(&[200.0, 600.0, 1000.0]);
        detections.push(DetectionBox::door(50.0, 900.0, 900.0, 300.0));
        let bounds = BuildingBounds::new(0.0, 0.0, 1000.0, 1200.0);

        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();

        assert_relative_eq!(metrics.opening_ratio_ground_floor, 1.22);
        assert_eq!(metrics.risk_soft_story, RiskLevel::High);
    }

    #[test]
    fn test_soft_story_from_tall_ground_floor() {
        let detections = window_grid(&[200.0, 600.0, 1000.0]);
        // Ground story spans 800..1700, more than 1.5x the 400 px story spacing
        let bounds = BuildingBounds::new(0.0, 0.0, 1000.0, 1700.0);

        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();
        assert!(metrics.opening_ratio_ground_floor <= 0.6);
        assert_eq!(metrics.risk_soft_story, RiskLevel::High);
    }

    #[test]
    fn test_zero_windows_fallback() {
        let detections = vec![DetectionBox::door(400.0, 800.0, 200.0, 200.0)];
        let bounds = BuildingBounds::new(0.0, 0.0, 1000.0, 1000.0);

        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();
        assert_eq!(metrics.story_count, 1);
        assert_eq!(metrics.wwr, 0.0);
        assert_eq!(metrics.risk_soft_story, RiskLevel::Low);
        assert_relative_eq!(metrics.opening_ratio_ground_floor, 0.2);

        let empty = FacadeMetricsAnalyzer::default()
            .analyze(&[], &BuildingBounds::new(0.0, 0.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(empty.wwr, 0.0);
        assert_eq!(empty.opening_ratio_ground_floor, 0.0);
    }

    #[test]
    fn test_wide_door_without_windows_stays_low() {
        let detections = vec![DetectionBox::door(100.0, 800.0, 700.0, 200.0)];
        let bounds = BuildingBounds::new(0.0, 0.0, 1000.0, 1000.0);

        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();
        assert_eq!(metrics.story_count, 1);
        assert_relative_eq!(metrics.opening_ratio_ground_floor, 0.7);
        assert_eq!(metrics.risk_soft_story, RiskLevel::Low);

        // Report carries a positive zero
        assert!(metrics.wwr.is_sign_positive());
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains(r#""wwr":0.0"#), "{json}");
    }

    #[test]
    fn test_non_finite_bounds_rejected() {
        let err = FacadeMetricsAnalyzer::default()
            .analyze(&[], &BuildingBounds::new(0.0, 0.0, f64::NAN, 10.0))
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Metrics));
    }

    #[test]
    fn test_structure_classification() {
        let config = MetricsConfig::default();
        assert_eq!(classify_structure(0.8, 3, &config), StructureType::GlassCurtainWall);
        assert_eq!(classify_structure(0.2, 5, &config), StructureType::Masonry);
        assert_eq!(classify_structure(0.2, 6, &config), StructureType::RCFrame);
        assert_eq!(classify_structure(0.5, 2, &config), StructureType::RCFrame);
    }

    #[test]
    fn test_report_field_names() {
        let metrics = FacadeMetrics {
            wwr: 0.1,
            story_count: 2,
            opening_ratio_ground_floor: 0.3,
            risk_soft_story: RiskLevel::High,
            structure_type: StructureType::RCFrame,
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["risk_soft_story"], "HIGH");
        assert_eq!(json["opening_ratio_gf"], 0.3);
        assert_eq!(json["structure_type"], "RCFrame");
    }
}
