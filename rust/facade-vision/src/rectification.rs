// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Perspective rectification of facade photographs
//!
//! The user marks three or more points on the facade outline. They are
//! reduced to four canonically ordered corners, a planar homography onto an
//! upright rectangle is solved, and the photograph is resampled through it.
//! When more than four points outline the facade, everything outside that
//! outline is blanked in the rectified image.
//! The resulting [`TransformRecord`] is the single source of truth for every
//! later coordinate mapping between the two image spaces.

use crate::artifact;
use crate::error::{Error, Result, Stage};
use crate::types::{ImageSize, Point2D};
use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;
use nalgebra::{Matrix3, SMatrix, SVector};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Homogeneous coordinates with |w| below this are treated as points at infinity
const HOMOGENEOUS_EPS: f64 = 1e-12;

/// Configuration for corner handling and resampling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RectificationConfig {
    /// Points closer than this (pixels) are treated as the same click
    pub merge_radius_px: f64,
    /// Minimum triangle area, relative to the squared point spread, below
    /// which three corners count as collinear
    pub collinearity_tolerance: f64,
    /// Fill color for rectified pixels that fall outside the photograph
    pub border_color: [u8; 4],
    /// Border fraction above which the result is reported as suspicious
    pub border_warning_ratio: f64,
    /// Largest rectified image, in pixels, that will be allocated
    pub max_output_pixels: u64,
}

impl Default for RectificationConfig {
    fn default() -> Self {
        Self {
            merge_radius_px: 5.0,
            collinearity_tolerance: 1e-3,
            border_color: [200, 200, 200, 255],
            border_warning_ratio: 0.5,
            max_output_pixels: 64 * 1024 * 1024,
        }
    }
}

/// Immutable record of one rectification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformRecord {
    #[serde(alias = "original_size")]
    pub source_size: ImageSize,
    pub rectified_size: ImageSize,
    /// Source corners in TL, TR, BR, BL order
    pub source_points: [Point2D; 4],
    pub destination_points: [Point2D; 4],
    /// Source -> rectified, row-major
    #[serde(alias = "transform_matrix")]
    pub forward_matrix: [[f64; 3]; 3],
    /// Rectified -> source, row-major
    pub inverse_matrix: [[f64; 3]; 3],
}

impl TransformRecord {
    pub fn forward(&self) -> Matrix3<f64> {
        array_to_matrix(&self.forward_matrix)
    }

    pub fn inverse(&self) -> Matrix3<f64> {
        array_to_matrix(&self.inverse_matrix)
    }

    /// Source -> rectified
    pub fn map_forward(&self, p: Point2D) -> Option<Point2D> {
        apply_homography(&self.forward(), p)
    }

    /// Rectified -> source
    pub fn map_inverse(&self, p: Point2D) -> Option<Point2D> {
        apply_homography(&self.inverse(), p)
    }

    /// Check that the matrices are finite and mutually inverse (up to scale)
    pub fn validate(&self) -> Result<()> {
        let forward = self.forward();
        let inverse = self.inverse();
        if forward.iter().chain(inverse.iter()).any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(
                "transform record contains non-finite matrix entries".into(),
            ));
        }

        let product = forward * inverse;
        let scale = product[(2, 2)];
        if scale.abs() <= HOMOGENEOUS_EPS {
            return Err(Error::InvalidInput(
                "forward and inverse matrices are not inverses".into(),
            ));
        }
        let deviation = (product / scale - Matrix3::identity()).abs().max();
        if deviation > 1e-6 {
            return Err(Error::InvalidInput(format!(
                "forward x inverse deviates from identity by {deviation:.3e}"
            )));
        }
        Ok(())
    }

    /// Load and validate a persisted record
    pub fn load(path: &Path) -> Result<Self> {
        let record: TransformRecord = artifact::read_json(path)?;
        record.validate()?;
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        artifact::write_json(path, self)
    }
}

/// Rectified image together with its transform record
#[derive(Debug, Clone)]
pub struct Rectification {
    pub image: RgbaImage,
    pub record: TransformRecord,
    /// Fraction of output pixels that fell outside the photograph
    pub border_ratio: f64,
}

/// Computes homographies and rectified images
#[derive(Debug, Clone, Default)]
pub struct RectificationEngine {
    config: RectificationConfig,
}

impl RectificationEngine {
    pub fn new(config: RectificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RectificationConfig {
        &self.config
    }

    /// Solve the transform for a photograph of `source_size` from user points
    pub fn compute_transform(
        &self,
        source_size: ImageSize,
        points: &[Point2D],
    ) -> Result<TransformRecord> {
        let corners = prepare_corners(points, &self.config)?;

        for corner in &corners {
            if !source_size.contains(corner) {
                tracing::warn!(
                    x = corner.x,
                    y = corner.y,
                    "Corner lies outside the source image"
                );
            }
        }

        let rectified_size = destination_size(&corners);
        let pixels = rectified_size.width as u64 * rectified_size.height as u64;
        if pixels > self.config.max_output_pixels {
            return Err(Error::InvalidInput(format!(
                "rectified image would be {}x{} pixels, above the limit of {}",
                rectified_size.width, rectified_size.height, self.config.max_output_pixels
            )));
        }
        let (w, h) = (rectified_size.width as f64, rectified_size.height as f64);
        let destination = [
            Point2D::new(0.0, 0.0),
            Point2D::new(w, 0.0),
            Point2D::new(w, h),
            Point2D::new(0.0, h),
        ];

        let forward = solve_homography(&corners, &destination)?;
        let inverse = forward
            .try_inverse()
            .ok_or_else(|| Error::degenerate(Stage::Rectification, "homography is not invertible"))?;

        let record = TransformRecord {
            source_size,
            rectified_size,
            source_points: corners,
            destination_points: destination,
            forward_matrix: matrix_to_array(&forward),
            inverse_matrix: matrix_to_array(&inverse),
        };

        tracing::debug!(
            width = rectified_size.width,
            height = rectified_size.height,
            "Solved rectifying homography"
        );
        Ok(record)
    }

    /// Rectify `image` using the user-marked facade points
    pub fn rectify(&self, image: &RgbaImage, points: &[Point2D]) -> Result<Rectification> {
        let source_size = ImageSize::new(image.width(), image.height());
        let record = self.compute_transform(source_size, points)?;

        let projection = Projection::from_matrix(matrix_to_f32(&record.forward_matrix))
            .ok_or_else(|| Error::degenerate(Stage::Rectification, "projection is singular"))?;

        let border = Rgba(self.config.border_color);
        let mut output = RgbaImage::from_pixel(
            record.rectified_size.width,
            record.rectified_size.height,
            border,
        );
        warp_into(image, &projection, Interpolation::Bilinear, border, &mut output);

        let border_ratio = border_fraction(&output, border);
        if border_ratio > self.config.border_warning_ratio {
            tracing::warn!(
                border_ratio,
                "Most of the rectified image lies outside the photograph; corner points are probably misplaced"
            );
        }

        let outline = dedupe_points(points, self.config.merge_radius_px);
        if outline.len() > 4 {
            mask_outside_outline(&mut output, &record, &outline, border);
        }

        tracing::info!(
            source_width = source_size.width,
            source_height = source_size.height,
            rectified_width = record.rectified_size.width,
            rectified_height = record.rectified_size.height,
            "Rectified facade"
        );

        Ok(Rectification {
            image: output,
            record,
            border_ratio,
        })
    }

    /// Scale `image` to `working_width` without perspective correction
    ///
    /// Used when no corner points are given. The record is a pure scaling, so
    /// annotation mapping works the same way as for rectified images.
    pub fn resize(&self, image: &RgbaImage, working_width: u32) -> Result<Rectification> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidInput("image has zero size".into()));
        }
        let source_size = ImageSize::new(image.width(), image.height());
        let width = working_width.max(1);
        let height = ((image.height() as f64 * width as f64 / image.width() as f64).round() as u32).max(1);
        let record = scaling_record(source_size, ImageSize::new(width, height));

        let resized = imageops::resize(image, width, height, imageops::FilterType::Lanczos3);
        tracing::info!(width, height, "Resized facade without rectification");

        Ok(Rectification {
            image: resized,
            record,
            border_ratio: 0.0,
        })
    }
}

/// Axis-aligned scaling from `source` to `target` as a transform record
pub fn scaling_record(source: ImageSize, target: ImageSize) -> TransformRecord {
    let sx = target.width as f64 / source.width.max(1) as f64;
    let sy = target.height as f64 / source.height.max(1) as f64;
    let forward = Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0);
    let inverse = Matrix3::new(1.0 / sx, 0.0, 0.0, 0.0, 1.0 / sy, 0.0, 0.0, 0.0, 1.0);

    let corners = |size: ImageSize| {
        let (w, h) = (size.width as f64, size.height as f64);
        [
            Point2D::new(0.0, 0.0),
            Point2D::new(w, 0.0),
            Point2D::new(w, h),
            Point2D::new(0.0, h),
        ]
    };

    TransformRecord {
        source_size: source,
        rectified_size: target,
        source_points: corners(source),
        destination_points: corners(target),
        forward_matrix: matrix_to_array(&forward),
        inverse_matrix: matrix_to_array(&inverse),
    }
}

/// Reduce user points to four ordered, non-degenerate corners
///
/// * near-duplicate clicks are merged
/// * three points are completed to a parallelogram
/// * more than four points contribute their four extreme points
pub fn prepare_corners(points: &[Point2D], config: &RectificationConfig) -> Result<[Point2D; 4]> {
    if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "correspondence point ({}, {}) is not finite",
            bad.x, bad.y
        )));
    }

    let unique = dedupe_points(points, config.merge_radius_px);
    if unique.len() < 3 {
        return Err(Error::InsufficientPoints { got: unique.len() });
    }

    let corners = match unique.len() {
        3 => synthesize_fourth_corner([unique[0], unique[1], unique[2]], config)?,
        4 => [unique[0], unique[1], unique[2], unique[3]],
        _ => {
            let extremes = extreme_points(&unique);
            tracing::debug!(
                input = unique.len(),
                selected = extremes.len(),
                "Selected extreme corner candidates"
            );
            match extremes.len() {
                4 => [extremes[0], extremes[1], extremes[2], extremes[3]],
                3 => synthesize_fourth_corner([extremes[0], extremes[1], extremes[2]], config)?,
                _ => {
                    return Err(Error::degenerate(
                        Stage::Rectification,
                        "points do not span a quadrilateral",
                    ))
                }
            }
        }
    };

    let ordered = order_corners(corners);
    check_quadrilateral(&ordered, config.collinearity_tolerance)?;
    Ok(ordered)
}

/// Merge points closer than `radius`, keeping the first occurrence
fn dedupe_points(points: &[Point2D], radius: f64) -> Vec<Point2D> {
    let mut unique: Vec<Point2D> = Vec::with_capacity(points.len());
    for p in points {
        if unique.iter().all(|u| u.distance_to(p) >= radius) {
            unique.push(*p);
        }
    }
    unique
}

/// Extreme points along the diagonals: TL, TR, BR, BL candidates
fn extreme_points(points: &[Point2D]) -> Vec<Point2D> {
    fn argmax(points: &[Point2D], key: impl Fn(&Point2D) -> f64) -> Option<usize> {
        points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| key(a).total_cmp(&key(b)))
            .map(|(i, _)| i)
    }

    let candidates = [
        argmax(points, |p| -(p.x + p.y)),
        argmax(points, |p| p.x - p.y),
        argmax(points, |p| p.x + p.y),
        argmax(points, |p| p.y - p.x),
    ];

    let mut indices: Vec<usize> = Vec::with_capacity(4);
    for idx in candidates.into_iter().flatten() {
        if !indices.contains(&idx) {
            indices.push(idx);
        }
    }
    indices.into_iter().map(|i| points[i]).collect()
}

/// Complete three corners to a quadrilateral
///
/// The vertex opposite the longest side of the triangle is taken as the
/// shared corner `B` of the two known edges; the missing corner is
/// `A + C - B`, which makes the quadrilateral a parallelogram.
pub fn synthesize_fourth_corner(
    points: [Point2D; 3],
    config: &RectificationConfig,
) -> Result<[Point2D; 4]> {
    let span = max_pairwise_distance(&points);
    if span <= 0.0 || triangle_area2(&points[0], &points[1], &points[2]) < config.collinearity_tolerance * span * span {
        return Err(Error::degenerate(
            Stage::Rectification,
            "the three correspondence points are collinear",
        ));
    }

    let opposite_side = |k: usize| {
        let a = &points[(k + 1) % 3];
        let c = &points[(k + 2) % 3];
        a.distance_to(c)
    };
    let corner = (0..3)
        .max_by(|&i, &j| opposite_side(i).total_cmp(&opposite_side(j)))
        .unwrap_or(0);

    let b = points[corner];
    let a = points[(corner + 1) % 3];
    let c = points[(corner + 2) % 3];
    let d = Point2D::new(a.x + c.x - b.x, a.y + c.y - b.y);

    tracing::debug!(x = d.x, y = d.y, "Synthesized fourth corner");
    Ok([a, b, c, d])
}

/// Order four corners as TL, TR, BR, BL
///
/// Corners are sorted by angle around their centroid (clockwise on screen,
/// since image Y points down) and rotated so the corner with the smallest
/// `x + y` comes first. The result does not depend on input order.
pub fn order_corners(points: [Point2D; 4]) -> [Point2D; 4] {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

    let mut sorted = points;
    sorted.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });

    let start = (0..4)
        .min_by(|&i, &j| (sorted[i].x + sorted[i].y).total_cmp(&(sorted[j].x + sorted[j].y)))
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

/// Reject nearly collinear or non-convex corner sets
fn check_quadrilateral(quad: &[Point2D; 4], tolerance: f64) -> Result<()> {
    let span = max_pairwise_distance(quad);
    if span <= 0.0 {
        return Err(Error::degenerate(Stage::Rectification, "all corners coincide"));
    }
    let min_area2 = tolerance * span * span;

    for skip in 0..4 {
        let tri: Vec<&Point2D> = (0..4).filter(|&i| i != skip).map(|i| &quad[i]).collect();
        if triangle_area2(tri[0], tri[1], tri[2]) < min_area2 {
            return Err(Error::degenerate(
                Stage::Rectification,
                "three of the corners are collinear",
            ));
        }
    }

    let mut sign = 0.0;
    for i in 0..4 {
        let a = &quad[i];
        let b = &quad[(i + 1) % 4];
        let c = &quad[(i + 2) % 4];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return Err(Error::degenerate(
                Stage::Rectification,
                "corner quadrilateral is not convex",
            ));
        }
    }
    Ok(())
}

/// Size of the upright target rectangle for ordered corners
///
/// Height keeps the quadrilateral's vertical span; width follows the aspect
/// ratio of its longer horizontal edge to its longer vertical edge.
pub fn destination_size(quad: &[Point2D; 4]) -> ImageSize {
    let [tl, tr, br, bl] = quad;
    let min_y = quad.iter().map(|p| p.y).fold(f64::MAX, f64::min);
    let max_y = quad.iter().map(|p| p.y).fold(f64::MIN, f64::max);
    let height = max_y - min_y;

    let horizontal = tl.distance_to(tr).max(bl.distance_to(br));
    let vertical = tl.distance_to(bl).max(tr.distance_to(br));
    let width = if vertical > 0.0 {
        height * horizontal / vertical
    } else {
        horizontal
    };

    ImageSize::new(
        (width.round() as u32).max(1),
        (height.round() as u32).max(1),
    )
}

/// Solve `dst ~ H * src` from four correspondences with `h33 = 1`
///
/// Both point sets are normalized (centroid at the origin, mean distance
/// sqrt(2)) before the 8x8 system is solved, then the result is
/// de-normalized.
pub fn solve_homography(src: &[Point2D; 4], dst: &[Point2D; 4]) -> Result<Matrix3<f64>> {
    let t_src = normalization_transform(src)?;
    let t_dst = normalization_transform(dst)?;

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let s = t_src * src[i].to_homogeneous();
        let d = t_dst * dst[i].to_homogeneous();
        let (x, y) = (s.x / s.z, s.y / s.z);
        let (u, v) = (d.x / d.z, d.y / d.z);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let h = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::degenerate(Stage::Rectification, "correspondence system is singular"))?;

    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| Error::degenerate(Stage::Rectification, "destination normalization failed"))?;

    let mut homography = t_dst_inv * normalized * t_src;
    let scale = homography[(2, 2)];
    if scale.abs() > HOMOGENEOUS_EPS {
        homography /= scale;
    }

    if homography.iter().any(|v| !v.is_finite()) || homography.determinant().abs() <= HOMOGENEOUS_EPS {
        return Err(Error::degenerate(
            Stage::Rectification,
            "homography is singular",
        ));
    }
    Ok(homography)
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2)
fn normalization_transform(points: &[Point2D; 4]) -> Result<Matrix3<f64>> {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| p.distance_to(&Point2D::new(cx, cy)))
        .sum::<f64>()
        / 4.0;
    if mean_dist <= f64::EPSILON {
        return Err(Error::degenerate(
            Stage::Rectification,
            "points collapse to a single location",
        ));
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Ok(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Apply `h` to `p`; `None` for points mapped to infinity
pub fn apply_homography(h: &Matrix3<f64>, p: Point2D) -> Option<Point2D> {
    let v = h * p.to_homogeneous();
    let w = v.z;
    if !w.is_finite() || w.abs() <= HOMOGENEOUS_EPS {
        return None;
    }
    let mapped = Point2D::new(v.x / w, v.y / w);
    mapped.is_finite().then_some(mapped)
}

/// Blank every pixel outside the user's outline, mapped into the rectified frame
///
/// Outline points are used in click order. The mask is skipped if a point
/// maps to infinity or the outline collapses below three vertices.
fn mask_outside_outline(
    image: &mut RgbaImage,
    record: &TransformRecord,
    outline: &[Point2D],
    border: Rgba<u8>,
) {
    let mut polygon: Vec<Point<i32>> = Vec::with_capacity(outline.len());
    for p in outline {
        let Some(mapped) = record.map_forward(*p) else {
            tracing::warn!(x = p.x, y = p.y, "Outline point maps to infinity; mask skipped");
            return;
        };
        let vertex = Point::new(mapped.x.round() as i32, mapped.y.round() as i32);
        if polygon.last() != Some(&vertex) {
            polygon.push(vertex);
        }
    }
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        tracing::debug!(vertices = polygon.len(), "Outline too small to mask");
        return;
    }

    let mut mask = GrayImage::new(image.width(), image.height());
    draw_polygon_mut(&mut mask, &polygon, Luma([255u8]));
    let mut blanked = 0usize;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            *pixel = border;
            blanked += 1;
        }
    }
    tracing::debug!(vertices = polygon.len(), blanked, "Masked outside the facade outline");
}

/// Twice the triangle area
fn triangle_area2(a: &Point2D, b: &Point2D, c: &Point2D) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

fn max_pairwise_distance(points: &[Point2D]) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            max = max.max(a.distance_to(b));
        }
    }
    max
}

fn border_fraction(image: &RgbaImage, border: Rgba<u8>) -> f64 {
    let total = image.width() as f64 * image.height() as f64;
    if total == 0.0 {
        return 0.0;
    }
    let count = image.pixels().filter(|p| **p == border).count();
    count as f64 / total
}

fn array_to_matrix(m: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    )
}

fn matrix_to_array(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    out
}

fn matrix_to_f32(m: &[[f64; 3]; 3]) -> [f32; 9] {
    let mut out = [0.0_f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[r * 3 + c] = m[r][c] as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    fn engine() -> RectificationEngine {
        RectificationEngine::default()
    }

    fn skewed_quad() -> Vec<Point2D> {
        vec![
            Point2D::new(120.0, 80.0),
            Point2D::new(860.0, 140.0),
            Point2D::new(900.0, 700.0),
            Point2D::new(90.0, 760.0),
        ]
    }

    #[test]
    fn test_order_corners_independent_of_input_order() {
        let quad = skewed_quad();
        let expected = order_corners([quad[0], quad[1], quad[2], quad[3]]);
        assert_eq!(expected[0], quad[0]);
        assert_eq!(expected[1], quad[1]);
        assert_eq!(expected[2], quad[2]);
        assert_eq!(expected[3], quad[3]);

        let shuffled = order_corners([quad[2], quad[0], quad[3], quad[1]]);
        assert_eq!(shuffled, expected);
        let reversed = order_corners([quad[3], quad[2], quad[1], quad[0]]);
        assert_eq!(reversed, expected);
    }

    #[test]
    fn test_homography_maps_corners() {
        let record = engine()
            .compute_transform(ImageSize::new(1000, 800), &skewed_quad())
            .unwrap();

        for (src, dst) in record.source_points.iter().zip(record.destination_points.iter()) {
            let mapped = record.map_forward(*src).unwrap();
            assert_relative_eq!(mapped.x, dst.x, epsilon = 1e-6);
            assert_relative_eq!(mapped.y, dst.y, epsilon = 1e-6);
        }

        let product = record.forward() * record.inverse();
        assert!((product - Matrix3::identity()).abs().max() < 1e-9);
        record.validate().unwrap();
    }

    #[test]
    fn test_destination_size_keeps_vertical_span() {
        let quad = order_corners([
            Point2D::new(0.0, 0.0),
            Point2D::new(400.0, 0.0),
            Point2D::new(400.0, 200.0),
            Point2D::new(0.0, 200.0),
        ]);
        assert_eq!(destination_size(&quad), ImageSize::new(400, 200));

        let record = engine()
            .compute_transform(ImageSize::new(1000, 800), &skewed_quad())
            .unwrap();
        // Vertical span of the skewed quad is 760 - 80
        assert_eq!(record.rectified_size.height, 680);
    }

    #[test]
    fn test_three_collinear_points_are_degenerate() {
        let points = [
            Point2D::new(0.0, 0.0),
            Point2D::new(50.0, 50.0),
            Point2D::new(100.0, 100.0),
        ];
        let err = engine()
            .compute_transform(ImageSize::new(200, 200), &points)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DegenerateGeometry {
                stage: Stage::Rectification,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn test_rectify_collinear_produces_nothing() {
        let image = RgbaImage::new(200, 200);
        let points = [
            Point2D::new(10.0, 10.0),
            Point2D::new(100.0, 10.5),
            Point2D::new(190.0, 11.0),
        ];
        assert!(engine().rectify(&image, &points).is_err());
    }

    #[test]
    fn test_insufficient_points() {
        let err = engine()
            .compute_transform(
                ImageSize::new(100, 100),
                &[Point2D::new(1.0, 1.0), Point2D::new(50.0, 50.0)],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPoints { got: 2 }));

        // Duplicate clicks do not count as separate points
        let err = engine()
            .compute_transform(
                ImageSize::new(100, 100),
                &[
                    Point2D::new(10.0, 10.0),
                    Point2D::new(11.0, 11.0),
                    Point2D::new(80.0, 10.0),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPoints { got: 2 }));
    }

    #[test]
    fn test_fourth_corner_is_parallelogram_completion() {
        let config = RectificationConfig::default();
        // Right angle at (0, 0): missing corner is (100, 50)
        let corners = synthesize_fourth_corner(
            [
                Point2D::new(100.0, 0.0),
                Point2D::new(0.0, 0.0),
                Point2D::new(0.0, 50.0),
            ],
            &config,
        )
        .unwrap();
        assert_eq!(corners[3], Point2D::new(100.0, 50.0));

        // Same triangle in a different order gives the same corner
        let again = synthesize_fourth_corner(
            [
                Point2D::new(0.0, 50.0),
                Point2D::new(100.0, 0.0),
                Point2D::new(0.0, 0.0),
            ],
            &config,
        )
        .unwrap();
        assert_eq!(again[3], Point2D::new(100.0, 50.0));
    }

    #[test]
    fn test_three_points_produce_rectangle_target() {
        let record = engine()
            .compute_transform(
                ImageSize::new(500, 500),
                &[
                    Point2D::new(100.0, 100.0),
                    Point2D::new(400.0, 100.0),
                    Point2D::new(400.0, 300.0),
                ],
            )
            .unwrap();
        assert_eq!(record.source_points[0], Point2D::new(100.0, 100.0));
        assert_eq!(record.source_points[3], Point2D::new(100.0, 300.0));
        assert_eq!(record.rectified_size, ImageSize::new(300, 200));
    }

    #[test]
    fn test_many_points_use_extremes() {
        let mut points = skewed_quad();
        points.push(Point2D::new(500.0, 110.0));
        points.push(Point2D::new(480.0, 730.0));
        points.push(Point2D::new(500.0, 400.0));

        let corners = prepare_corners(&points, &RectificationConfig::default()).unwrap();
        assert_eq!(corners, order_corners([points[0], points[1], points[2], points[3]]));
    }

    #[test]
    fn test_non_convex_rejected() {
        let points = [
            Point2D::new(0.0, 0.0),
            Point2D::new(100.0, 0.0),
            Point2D::new(30.0, 30.0),
            Point2D::new(0.0, 100.0),
        ];
        let err = prepare_corners(&points, &RectificationConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn test_rectify_identity_quad_keeps_content() {
        let mut image = RgbaImage::from_pixel(100, 80, Rgba([255, 255, 255, 255]));
        for x in 40..60 {
            for y in 30..50 {
                image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let points = [
            Point2D::new(0.0, 0.0),
            Point2D::new(100.0, 0.0),
            Point2D::new(100.0, 80.0),
            Point2D::new(0.0, 80.0),
        ];
        let result = engine().rectify(&image, &points).unwrap();
        assert_eq!(result.image.dimensions(), (100, 80));
        assert_eq!(result.image.get_pixel(50, 40), &Rgba([0, 0, 0, 255]));
        assert_eq!(result.image.get_pixel(10, 10), &Rgba([255, 255, 255, 255]));
        assert!(result.border_ratio < 0.1);
    }

    #[test]
    fn test_resize_record_maps_corners() {
        let image = RgbaImage::new(2048, 1600);
        let result = engine().resize(&image, 1024).unwrap();
        assert_eq!(result.image.dimensions(), (1024, 800));
        let p = result.record.map_inverse(Point2D::new(512.0, 400.0)).unwrap();
        assert_relative_eq!(p.x, 1024.0);
        assert_relative_eq!(p.y, 800.0);
        result.record.validate().unwrap();
    }

    #[test]
    fn test_record_json_roundtrip_and_legacy_names() {
        let record = engine()
            .compute_transform(ImageSize::new(1000, 800), &skewed_quad())
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "source_size",
            "rectified_size",
            "source_points",
            "destination_points",
            "forward_matrix",
            "inverse_matrix",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }

        let legacy = serde_json::json!({
            "original_size": {"width": 1000, "height": 800},
            "rectified_size": json["rectified_size"],
            "source_points": record.source_points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>(),
            "destination_points": json["destination_points"],
            "transform_matrix": json["forward_matrix"],
            "inverse_matrix": json["inverse_matrix"],
        });
        let parsed: TransformRecord = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.source_size, record.source_size);
        assert_eq!(parsed.source_points, record.source_points);
        assert!((parsed.forward() - record.forward()).abs().max() < 1e-9);
        parsed.validate().unwrap();
    }

    #[test]
    fn test_oversized_output_rejected_before_allocation() {
        let points = [
            Point2D::new(0.0, 0.0),
            Point2D::new(200_000.0, 0.0),
            Point2D::new(200_000.0, 150_000.0),
            Point2D::new(0.0, 150_000.0),
        ];
        let err = engine()
            .compute_transform(ImageSize::new(100, 100), &points)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.kind(), ErrorKind::Input);

        let small = RectificationEngine::new(RectificationConfig {
            max_output_pixels: 1000,
            ..Default::default()
        });
        let image = RgbaImage::new(100, 80);
        let frame = [
            Point2D::new(0.0, 0.0),
            Point2D::new(100.0, 0.0),
            Point2D::new(100.0, 80.0),
            Point2D::new(0.0, 80.0),
        ];
        assert!(matches!(
            small.rectify(&image, &frame),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_outline_with_notch_is_masked() {
        let photo = Rgba([10, 20, 30, 255]);
        let border = Rgba(RectificationConfig::default().border_color);
        let image = RgbaImage::from_pixel(500, 500, photo);
        // Square facade with a notch cut up into its bottom edge
        let outline = [
            Point2D::new(100.0, 100.0),
            Point2D::new(400.0, 100.0),
            Point2D::new(400.0, 400.0),
            Point2D::new(250.0, 300.0),
            Point2D::new(100.0, 400.0),
        ];

        let result = engine().rectify(&image, &outline).unwrap();
        assert_eq!(result.image.dimensions(), (300, 300));
        assert_eq!(result.image.get_pixel(150, 100), &photo);
        assert_eq!(result.image.get_pixel(150, 280), &border);
        assert_eq!(result.image.get_pixel(20, 150), &photo);

        // Four points keep the whole rectangle
        let corners = [outline[0], outline[1], outline[2], outline[4]];
        let plain = engine().rectify(&image, &corners).unwrap();
        assert_eq!(plain.image.get_pixel(150, 280), &photo);
    }

    #[test]
    fn test_malformed_record_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facade_transform.json");
        std::fs::write(&path, r#"{"source_size": {"width": 10}}"#).unwrap();

        let err = TransformRecord::load(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_validate_rejects_mismatched_matrices() {
        let mut record = engine()
            .compute_transform(ImageSize::new(1000, 800), &skewed_quad())
            .unwrap();
        record.inverse_matrix[0][2] += 50.0;
        assert!(record.validate().is_err());
    }
}
