// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo of the facade pipeline on a synthetic oblique photograph
//!
//! Run with: cargo run -p facade-vision --example demo_pipeline

use facade_vision::{
    AnnotationMapper, DxfExporter, FacadePipeline, MappingDirection, PipelineConfig, Point2D,
};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

fn main() -> anyhow::Result<()> {
    println!("=== Facade Pipeline Demo ===\n");

    // Step 1: Render a flat facade and photograph it at an angle
    println!("Step 1: Create synthetic oblique photograph...");
    let facade = create_synthetic_facade();
    let corners: [(f32, f32); 4] = [(140.0, 90.0), (1080.0, 40.0), (1120.0, 880.0), (100.0, 800.0)];
    let photo = photograph(&facade, &corners)?;
    println!("  Photo size: {}x{}", photo.width(), photo.height());

    // Step 2: Full analysis with the synthetic detector
    println!("\nStep 2: Rectify, detect, analyze...");
    let config = PipelineConfig {
        output_dir: std::env::temp_dir().join("facade-vision-demo"),
        ..Default::default()
    };
    let pipeline = FacadePipeline::new(config.clone())?;
    let points: Vec<Point2D> = corners
        .iter()
        .map(|&(x, y)| Point2D::new(x as f64, y as f64))
        .collect();
    let analysis = pipeline.analyze(&photo, &points)?;

    let record = &analysis.rectification.record;
    println!(
        "  Rectified size: {}x{} (border {:.1}%)",
        record.rectified_size.width,
        record.rectified_size.height,
        analysis.rectification.border_ratio * 100.0
    );
    println!("  Detections: {}", analysis.detections.len());
    println!("  WWR: {:.3}", analysis.metrics.wwr);
    println!("  Stories: {}", analysis.metrics.story_count);
    println!(
        "  Ground floor opening ratio: {:.2}",
        analysis.metrics.opening_ratio_ground_floor
    );
    println!("  Soft story risk: {:?}", analysis.metrics.risk_soft_story);
    println!("  Structure: {}", analysis.metrics.structure_type);

    // Step 3: Map a rectified annotation back into the photograph
    println!("\nStep 3: Map annotations back to the photograph...");
    let mapper = AnnotationMapper::new(record);
    for det in analysis.detections.iter().take(3) {
        let p = mapper.map_point(
            Point2D::new(det.center_x(), det.center_y()),
            MappingDirection::RectifiedToSource,
        )?;
        println!(
            "  {:?} at ({:.0}, {:.0}) -> photo ({:.1}, {:.1})",
            det.label,
            det.center_x(),
            det.center_y(),
            p.x,
            p.y
        );
    }

    // Step 4: Layout and DXF
    println!("\nStep 4: Export layout...");
    let layout = &analysis.layout;
    println!(
        "  {} bays, {} walls, {} doors, {:.0} x {:.0} mm",
        layout.bays.len(),
        layout.walls.len(),
        layout.doors.len(),
        layout.width_mm,
        layout.depth_mm
    );
    std::fs::create_dir_all(&config.output_dir)?;
    let dxf_path = config.output_dir.join("demo_layout.dxf");
    DxfExporter::new(config.export.clone()).export(layout, &dxf_path)?;
    println!("  DXF written: {}", dxf_path.display());

    println!("\n=== Demo complete ===");
    Ok(())
}

/// Plain facade: 3 stories x 4 bays of dark windows on a light wall
fn create_synthetic_facade() -> RgbaImage {
    let (width, height) = (1000u32, 800u32);
    let mut img = RgbaImage::from_pixel(width, height, Rgba([225, 215, 200, 255]));
    for story in 0..3u32 {
        for bay in 0..4u32 {
            let x0 = 90 + bay * 225;
            let y0 = 80 + story * 240;
            for y in y0..y0 + 110 {
                for x in x0..x0 + 90 {
                    img.put_pixel(x, y, Rgba([40, 60, 80, 255]));
                }
            }
        }
    }
    img
}

/// Warp the facade so its corners land on `corners` in a 1200x960 photo
fn photograph(facade: &RgbaImage, corners: &[(f32, f32); 4]) -> anyhow::Result<RgbaImage> {
    let (w, h) = (facade.width() as f32, facade.height() as f32);
    let projection = Projection::from_control_points(
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)],
        *corners,
    )
    .ok_or_else(|| anyhow::anyhow!("degenerate demo corners"))?;

    let background = Rgba([90, 120, 90, 255]);
    let mut photo = RgbaImage::from_pixel(1200, 960, background);
    warp_into(facade, &projection, Interpolation::Bilinear, background, &mut photo);
    Ok(photo)
}
