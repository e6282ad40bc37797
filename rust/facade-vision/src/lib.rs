// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facade rectification, risk metrics and floor plan reconstruction
//!
//! This crate turns a single facade photograph into:
//! 1. A perspective-corrected image plus the transform that produced it
//! 2. Structural risk metrics (window-to-wall ratio, stories, soft story)
//! 3. A heuristic floor plan exported as a layered DXF drawing
//!
//! # Usage
//!
//! ```rust,ignore
//! use facade_vision::{FacadePipeline, Job, PipelineConfig, Point2D};
//!
//! let pipeline = FacadePipeline::new(PipelineConfig::default())?;
//! let job = Job::new("facade.jpg").with_points(vec![
//!     Point2D::new(120.0, 80.0),
//!     Point2D::new(860.0, 140.0),
//!     Point2D::new(900.0, 700.0),
//!     Point2D::new(90.0, 760.0),
//! ]);
//! let outcome = pipeline.run(&job)?;
//! println!("{:?}", outcome.metrics.risk_soft_story);
//! ```

pub mod annotation;
pub mod artifact;
pub mod cluster;
pub mod config;
pub mod detector;
pub mod dxf_export;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod rectification;
pub mod types;

// Re-export commonly used types and functions
pub use annotation::{
    AnnotationDocument, AnnotationMapper, MappedDocument, MappedPoint, MappedShape,
    MappingDirection, Shape,
};
pub use config::PipelineConfig;
pub use detector::{Detector, DetectorKind, LabelMeShape, RecordedDetector, SyntheticDetector};
pub use dxf_export::{DxfExporter, ExportConfig, RoomNamePolicy, WindowAreaPercentile};
pub use error::{Error, ErrorKind, Result, Stage};
pub use layout::{DrawingFrame, LayoutConfig, LayoutGenerator};
pub use metrics::{FacadeMetricsAnalyzer, MetricsConfig};
pub use pipeline::{FacadeAnalysis, FacadePipeline, Job, JobOutcome};
pub use rectification::{Rectification, RectificationConfig, RectificationEngine, TransformRecord};
pub use types::{
    BuildingBounds, DetectionBox, DetectionCounts, DetectionLabel, FacadeMetrics, ImageSize,
    LayoutGeometry, Point2D, RiskLevel, StructureType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectified_annotations_map_back_to_source() {
        let engine = RectificationEngine::default();
        let record = engine
            .compute_transform(
                ImageSize::new(800, 600),
                &[
                    Point2D::new(90.0, 40.0),
                    Point2D::new(700.0, 70.0),
                    Point2D::new(690.0, 560.0),
                    Point2D::new(110.0, 520.0),
                ],
            )
            .unwrap();

        let mapper = AnnotationMapper::new(&record);
        let center = Point2D::new(
            record.rectified_size.width as f64 / 2.0,
            record.rectified_size.height as f64 / 2.0,
        );
        let source = mapper
            .map_point(center, MappingDirection::RectifiedToSource)
            .unwrap();
        assert!(!source.out_of_bounds);
        // The center of the rectangle maps inside the source quadrilateral
        assert!(source.x > 110.0 && source.x < 690.0);
        assert!(source.y > 70.0 && source.y < 520.0);
    }

    #[test]
    fn test_metrics_feed_layout_and_export() {
        let detections = vec![
            DetectionBox::window(100.0, 100.0, 80.0, 120.0),
            DetectionBox::window(400.0, 100.0, 80.0, 120.0),
            DetectionBox::window(100.0, 400.0, 80.0, 120.0),
            DetectionBox::window(400.0, 400.0, 80.0, 120.0),
        ];
        let bounds = BuildingBounds::new(0.0, 0.0, 600.0, 600.0);
        let metrics = FacadeMetricsAnalyzer::default()
            .analyze(&detections, &bounds)
            .unwrap();
        let layout = LayoutGenerator::default()
            .generate(&metrics, &detections, &bounds)
            .unwrap();
        let records = DxfExporter::default().records(&layout);

        assert_eq!(metrics.story_count, 2);
        assert_eq!(layout.partition_count(), 1);
        assert!(!records.is_empty());
    }
}
