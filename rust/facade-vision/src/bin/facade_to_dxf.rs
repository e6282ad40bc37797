// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI tool: facade photograph to rectified image, risk report and DXF layout
//!
//! Usage:
//!   facade-to-dxf rectify --image facade.jpg --point 120,80 --point 860,140 --point 900,700
//!   facade-to-dxf map --transform facade_transform.json --annotations labels.json
//!   facade-to-dxf analyze --image facade.jpg [--point x,y ...]
//!   facade-to-dxf batch --jobs jobs.json

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use facade_vision::annotation::DEFAULT_CIRCLE_SAMPLES;
use facade_vision::artifact;
use facade_vision::pipeline::ArtifactPaths;
use facade_vision::{
    AnnotationDocument, AnnotationMapper, FacadePipeline, Job, MappingDirection, PipelineConfig,
    Point2D, RectificationEngine, TransformRecord,
};
use std::path::{Path, PathBuf};

/// Facade rectification and floor plan reconstruction.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON pipeline configuration; defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (overrides config and FACADE_OUTPUT_DIR).
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rectify a photograph and write the image plus its transform record.
    Rectify {
        #[arg(long)]
        image: PathBuf,
        /// Facade corner as `x,y` in source pixels; repeat 3 or more times.
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<Point2D>,
        /// Artifact name prefix (defaults to the image file stem).
        #[arg(long)]
        id: Option<String>,
    },
    /// Map an annotation document through a stored transform record.
    Map {
        #[arg(long)]
        transform: PathBuf,
        #[arg(long)]
        annotations: PathBuf,
        #[arg(long, value_enum, default_value_t = Direction::RectifiedToSource)]
        direction: Direction,
        #[arg(long, default_value_t = DEFAULT_CIRCLE_SAMPLES)]
        circle_samples: usize,
        /// Write the mapped document here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the full pipeline on one photograph.
    Analyze {
        #[arg(long)]
        image: PathBuf,
        /// Facade corner as `x,y`; without points the image is only scaled.
        #[arg(long = "point", value_parser = parse_point)]
        points: Vec<Point2D>,
        #[arg(long)]
        id: Option<String>,
    },
    /// Run a JSON array of jobs in parallel.
    Batch {
        #[arg(long)]
        jobs: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    RectifiedToSource,
    SourceToRectified,
}

impl From<Direction> for MappingDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::RectifiedToSource => MappingDirection::RectifiedToSource,
            Direction::SourceToRectified => MappingDirection::SourceToRectified,
        }
    }
}

fn parse_point(s: &str) -> std::result::Result<Point2D, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{s}`"))?;
    let x: f64 = x.trim().parse().map_err(|_| format!("invalid x in `{s}`"))?;
    let y: f64 = y.trim().parse().map_err(|_| format!("invalid y in `{s}`"))?;
    Ok(Point2D::new(x, y))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,facade_vision=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_sources(cli.config.as_deref())
        .context("loading pipeline configuration")?;
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    tracing::info!(
        output_dir = %config.output_dir.display(),
        working_width = config.working_width,
        scale_mm_per_px = config.layout.scale_mm_per_px,
        depth_mm = config.layout.depth_mm,
        "Starting facade-to-dxf"
    );

    match cli.command {
        Command::Rectify { image, points, id } => rectify(&config, &image, &points, id),
        Command::Map {
            transform,
            annotations,
            direction,
            circle_samples,
            output,
        } => map(&transform, &annotations, direction.into(), circle_samples, output.as_deref()),
        Command::Analyze { image, points, id } => {
            let pipeline = FacadePipeline::new(config)?;
            let mut job = Job::new(image).with_points(points);
            job.id = id;
            let outcome = pipeline.run(&job)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Batch { jobs } => batch(config, &jobs),
    }
}

fn rectify(config: &PipelineConfig, image: &Path, points: &[Point2D], id: Option<String>) -> Result<()> {
    let mut job = Job::new(image);
    job.id = id;
    let stem = job.stem();

    let source = image::open(image)
        .with_context(|| format!("decoding {}", image.display()))?
        .to_rgba8();
    let engine = RectificationEngine::new(config.rectification.clone());
    let result = engine.rectify(&source, points)?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let paths = ArtifactPaths::for_stem(&config.output_dir, &stem, false);
    artifact::write_png(&paths.rectified, &result.image)?;
    result.record.save(&paths.transform)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "rectified": paths.rectified,
            "transform": paths.transform,
            "rectified_size": result.record.rectified_size,
            "border_ratio": result.border_ratio,
        }))?
    );
    Ok(())
}

fn map(
    transform: &Path,
    annotations: &Path,
    direction: MappingDirection,
    circle_samples: usize,
    output: Option<&Path>,
) -> Result<()> {
    let record = TransformRecord::load(transform)
        .with_context(|| format!("loading transform {}", transform.display()))?;
    let document = AnnotationDocument::load(annotations)
        .with_context(|| format!("loading annotations {}", annotations.display()))?;

    let mapper = AnnotationMapper::new(&record).with_circle_samples(circle_samples);
    let mapped = mapper.map_document(&document, direction, Some(transform))?;

    match output {
        Some(path) => {
            artifact::write_json(path, &mapped)?;
            tracing::info!(path = %path.display(), "Wrote mapped annotations");
        }
        None => println!("{}", serde_json::to_string_pretty(&mapped)?),
    }
    Ok(())
}

fn batch(config: PipelineConfig, jobs_path: &Path) -> Result<()> {
    let data = std::fs::read_to_string(jobs_path)
        .with_context(|| format!("reading {}", jobs_path.display()))?;
    let jobs: Vec<Job> = serde_json::from_str(&data)
        .with_context(|| format!("parsing {}", jobs_path.display()))?;

    // Initialize rayon thread pool
    if let Some(threads) = config.worker_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("initializing worker pool")?;
    }

    let pipeline = FacadePipeline::new(config)?;
    let results = pipeline.run_batch(&jobs);

    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(outcome) => println!(
                "{id}: {} stories, wwr {:.2}, soft story {:?} -> {}",
                outcome.metrics.story_count,
                outcome.metrics.wwr,
                outcome.metrics.risk_soft_story,
                outcome.artifacts.layout.display()
            ),
            Err(err) => {
                failed += 1;
                eprintln!("{id}: failed ({:?}): {err}", err.kind());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} jobs failed", results.len());
    }
    Ok(())
}
