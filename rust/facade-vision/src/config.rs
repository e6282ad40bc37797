// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline configuration loaded from a JSON file and environment variables.

use crate::detector::DetectorKind;
use crate::dxf_export::ExportConfig;
use crate::error::{Error, Result};
use crate::layout::LayoutConfig;
use crate::metrics::MetricsConfig;
use crate::rectification::RectificationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory all artifacts are published to.
    pub output_dir: PathBuf,
    /// Width images are scaled to when no corner points are given.
    pub working_width: u32,
    /// Also write `<stem>_overlay.png` with the detections drawn.
    pub write_overlay: bool,
    /// Rayon worker threads for batches (all cores when unset).
    pub worker_threads: Option<usize>,
    pub detector: DetectorKind,
    pub rectification: RectificationConfig,
    pub metrics: MetricsConfig,
    pub layout: LayoutConfig,
    pub export: ExportConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            working_width: 1024,
            write_overlay: false,
            worker_threads: None,
            detector: DetectorKind::default(),
            rectification: RectificationConfig::default(),
            metrics: MetricsConfig::default(),
            layout: LayoutConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Optional file, then environment overrides, then validation.
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `FACADE_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACADE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "FACADE_SCALE_MM_PER_PX", &mut self.layout.scale_mm_per_px);
        override_parsed(&lookup, "FACADE_DEPTH_MM", &mut self.layout.depth_mm);
        override_parsed(&lookup, "FACADE_WORKING_WIDTH", &mut self.working_width);
        if let Some(threads) = parsed::<usize>(&lookup, "FACADE_WORKER_THREADS") {
            self.worker_threads = Some(threads);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.working_width == 0 {
            return Err(Error::Config("working_width must be positive".into()));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::Config("worker_threads must be positive".into()));
        }
        let r = &self.rectification;
        if !(r.merge_radius_px.is_finite() && r.merge_radius_px >= 0.0) {
            return Err(Error::Config("rectification.merge_radius_px must be non-negative".into()));
        }
        if !(r.collinearity_tolerance.is_finite() && r.collinearity_tolerance >= 0.0) {
            return Err(Error::Config(
                "rectification.collinearity_tolerance must be non-negative".into(),
            ));
        }
        let m = &self.metrics;
        if !(m.story_gap_factor.is_finite() && m.story_gap_factor >= 0.0) {
            return Err(Error::Config("metrics.story_gap_factor must be non-negative".into()));
        }
        if !(0.0..=100.0).contains(&self.export.living_room_percentile) {
            return Err(Error::Config(
                "export.living_room_percentile must be within 0..=100".into(),
            ));
        }
        if !(self.export.text_height_mm.is_finite() && self.export.text_height_mm > 0.0) {
            return Err(Error::Config("export.text_height_mm must be positive".into()));
        }
        self.layout.validate()
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable override");
            None
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(value) = parsed(lookup, key) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.layout.depth_mm, 12000.0);
        assert_eq!(config.layout.scale_mm_per_px, 10.0);
        assert_eq!(config.working_width, 1024);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"layout": {"depth_mm": 9000}, "detector": {"kind": "synthetic", "bays": 6}}"#,
        )
        .unwrap();
        assert_eq!(config.layout.depth_mm, 9000.0);
        assert_eq!(config.layout.door_width_mm, 900.0);
        assert_eq!(config.metrics, MetricsConfig::default());
        match config.detector {
            DetectorKind::Synthetic(d) => assert_eq!(d.bays, 6),
            other => panic!("unexpected detector {other:?}"),
        }
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FACADE_OUTPUT_DIR", "/tmp/facades"),
            ("FACADE_SCALE_MM_PER_PX", "12.5"),
            ("FACADE_DEPTH_MM", "not-a-number"),
            ("FACADE_WORKER_THREADS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.output_dir, PathBuf::from("/tmp/facades"));
        assert_eq!(config.layout.scale_mm_per_px, 12.5);
        assert_eq!(config.layout.depth_mm, 12000.0);
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.working_width, 1024);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.layout.depth_mm = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.export.living_room_percentile = 120.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"write_overlay": true, "working_width": 800}"#).unwrap();
        let config = PipelineConfig::from_sources(Some(&path)).unwrap();
        assert!(config.write_overlay);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(Error::Config(_))));
    }
}
