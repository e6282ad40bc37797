// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Debug overlay of detections on the rectified image

use crate::types::{DetectionBox, DetectionLabel};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Outline thickness in pixels
const STROKE: u32 = 2;

fn label_color(label: DetectionLabel) -> Rgba<u8> {
    match label {
        DetectionLabel::Window => Rgba([0, 200, 0, 255]),
        DetectionLabel::Door => Rgba([255, 0, 0, 255]),
        DetectionLabel::Building => Rgba([0, 100, 255, 255]),
        DetectionLabel::Ac => Rgba([255, 0, 255, 255]),
        DetectionLabel::Other => Rgba([255, 200, 0, 255]),
    }
}

/// Copy of `image` with every detection outlined in its label color
pub fn draw_detections(image: &RgbaImage, detections: &[DetectionBox]) -> RgbaImage {
    let mut canvas = image.clone();
    for det in detections {
        let color = label_color(det.label);
        for inset in 0..STROKE {
            let w = det.width.round() as i64 - 2 * inset as i64;
            let h = det.height.round() as i64 - 2 * inset as i64;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(
                det.x.round() as i32 + inset as i32,
                det.y.round() as i32 + inset as i32,
            )
            .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlines_drawn_inside_box() {
        let image = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255]));
        let out = draw_detections(&image, &[DetectionBox::window(10.0, 10.0, 20.0, 20.0)]);

        let green = Rgba([0, 200, 0, 255]);
        assert_eq!(out.get_pixel(10, 10), &green);
        assert_eq!(out.get_pixel(11, 15), &green);
        assert_eq!(out.get_pixel(20, 20), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(5, 5), &Rgba([0, 0, 0, 255]));
        // Source image untouched
        assert_eq!(image.get_pixel(10, 10), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_degenerate_boxes_skipped() {
        let image = RgbaImage::new(10, 10);
        let out = draw_detections(&image, &[DetectionBox::door(2.0, 2.0, 0.2, 5.0)]);
        assert_eq!(out, image);
    }
}
