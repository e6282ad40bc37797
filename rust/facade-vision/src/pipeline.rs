// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end facade processing
//!
//! One job is one photograph: rectify (or just scale), detect, analyze,
//! generate the layout and publish the artifacts. Jobs share nothing but the
//! output directory; artifact names derive from the job id.

use crate::artifact;
use crate::config::PipelineConfig;
use crate::detector::{sanitize, Detector};
use crate::dxf_export::DxfExporter;
use crate::error::{Error, Result};
use crate::layout::LayoutGenerator;
use crate::metrics::FacadeMetricsAnalyzer;
use crate::overlay;
use crate::rectification::{Rectification, RectificationEngine};
use crate::types::{
    BuildingBounds, DetectionBox, DetectionCounts, FacadeMetrics, ImageSize, LayoutGeometry,
    Point2D,
};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One photograph to process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Artifact name prefix; defaults to the image file stem
    #[serde(default)]
    pub id: Option<String>,
    pub image: PathBuf,
    /// Facade corner clicks in source pixels; empty means no rectification
    #[serde(default)]
    pub points: Vec<Point2D>,
}

impl Job {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            image: image.into(),
            points: Vec::new(),
        }
    }

    pub fn with_points(mut self, points: Vec<Point2D>) -> Self {
        self.points = points;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Artifact name prefix
    pub fn stem(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            self.image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "facade".to_string())
        })
    }
}

/// Where a job's artifacts were published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactPaths {
    pub rectified: PathBuf,
    pub transform: PathBuf,
    pub layout: PathBuf,
    pub report: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn for_stem(output_dir: &Path, stem: &str, overlay: bool) -> Self {
        Self {
            rectified: output_dir.join(format!("{stem}_rectified.png")),
            transform: output_dir.join(format!("{stem}_transform.json")),
            layout: output_dir.join(format!("{stem}_layout.dxf")),
            report: output_dir.join(format!("{stem}_report.json")),
            overlay: overlay.then(|| output_dir.join(format!("{stem}_overlay.png"))),
        }
    }
}

/// In-memory result of analyzing one image
#[derive(Debug, Clone)]
pub struct FacadeAnalysis {
    pub rectification: Rectification,
    pub detections: Vec<DetectionBox>,
    pub bounds: BuildingBounds,
    pub metrics: FacadeMetrics,
    pub layout: LayoutGeometry,
}

/// Summary of a completed job
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub metrics: FacadeMetrics,
    pub detections: usize,
    pub counts: DetectionCounts,
    pub bays: usize,
    pub border_ratio: f64,
    pub artifacts: ArtifactPaths,
}

/// Runs jobs with a fixed configuration and detector
pub struct FacadePipeline {
    config: PipelineConfig,
    detector: Box<dyn Detector>,
    engine: RectificationEngine,
    analyzer: FacadeMetricsAnalyzer,
    generator: LayoutGenerator,
    exporter: DxfExporter,
}

impl FacadePipeline {
    /// Build with the detector named in the configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let detector = config.detector.build()?;
        Self::with_detector(config, detector)
    }

    pub fn with_detector(config: PipelineConfig, detector: Box<dyn Detector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: RectificationEngine::new(config.rectification.clone()),
            analyzer: FacadeMetricsAnalyzer::new(config.metrics.clone()),
            generator: LayoutGenerator::new(config.layout.clone()),
            exporter: DxfExporter::new(config.export.clone()),
            detector,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Every stage up to the layout, without touching the filesystem
    pub fn analyze(&self, image: &RgbaImage, points: &[Point2D]) -> Result<FacadeAnalysis> {
        let rectification = if points.is_empty() {
            self.engine.resize(image, self.config.working_width)?
        } else {
            self.engine.rectify(image, points)?
        };

        let size = ImageSize::new(rectification.image.width(), rectification.image.height());
        let raw = self.detector.detect(&rectification.image)?;
        let detections = sanitize(raw, size);
        tracing::info!(
            detector = self.detector.name(),
            count = detections.len(),
            "Detected facade elements"
        );

        let bounds = BuildingBounds::from_detections(&detections, size);
        let metrics = self.analyzer.analyze(&detections, &bounds)?;
        let layout = self.generator.generate(&metrics, &detections, &bounds)?;

        Ok(FacadeAnalysis {
            rectification,
            detections,
            bounds,
            metrics,
            layout,
        })
    }

    /// Process one job and publish its artifacts
    pub fn run(&self, job: &Job) -> Result<JobOutcome> {
        let stem = job.stem();
        let span = tracing::info_span!("job", id = %stem);
        let _guard = span.enter();

        let image = image::open(&job.image)
            .map_err(|source| Error::ImageDecode {
                path: job.image.clone(),
                source,
            })?
            .to_rgba8();

        let analysis = self.analyze(&image, &job.points)?;

        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|source| Error::Write {
            path: output_dir.clone(),
            source,
        })?;
        let paths = ArtifactPaths::for_stem(output_dir, &stem, self.config.write_overlay);

        artifact::write_png(&paths.rectified, &analysis.rectification.image)?;
        analysis.rectification.record.save(&paths.transform)?;
        self.exporter.export(&analysis.layout, &paths.layout)?;
        artifact::write_json(&paths.report, &analysis.metrics)?;
        if let Some(overlay_path) = &paths.overlay {
            let drawn = overlay::draw_detections(&analysis.rectification.image, &analysis.detections);
            artifact::write_png(overlay_path, &drawn)?;
        }

        tracing::info!(
            stories = analysis.metrics.story_count,
            risk = ?analysis.metrics.risk_soft_story,
            layout = %paths.layout.display(),
            "Job complete"
        );

        Ok(JobOutcome {
            job_id: stem,
            metrics: analysis.metrics,
            detections: analysis.detections.len(),
            counts: DetectionCounts::from_detections(&analysis.detections),
            bays: analysis.layout.bays.len(),
            border_ratio: analysis.rectification.border_ratio,
            artifacts: paths,
        })
    }

    /// Run jobs in parallel; each result is independent
    ///
    /// Jobs whose artifact stem repeats an earlier job's fail without running.
    pub fn run_batch(&self, jobs: &[Job]) -> Vec<(String, Result<JobOutcome>)> {
        let mut seen = HashSet::new();
        let unique: Vec<bool> = jobs.iter().map(|job| seen.insert(job.stem())).collect();

        let results: Vec<(String, Result<JobOutcome>)> = jobs
            .par_iter()
            .zip(unique.par_iter())
            .map(|(job, &is_unique)| {
                let stem = job.stem();
                let result = if is_unique {
                    self.run(job)
                } else {
                    Err(Error::InvalidInput(format!(
                        "duplicate job id '{stem}' would overwrite another job's artifacts"
                    )))
                };
                (stem, result)
            })
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::info!(total = jobs.len(), failed, "Batch finished");
        results
    }
}
