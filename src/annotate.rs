//! Annotated frame rendering for the streaming output.
//!
//! Draws detection boxes and the nose-tip marker onto a copy of the frame
//! and returns it as a `data:image/jpeg;base64,...` URI.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::detect::DetectionBox;
use crate::frame::RgbView;
use crate::landmarks::{Keypoint, LandmarkSet};

const JPEG_QUALITY: u8 = 70;
const BOX_COLOR: Rgb<u8> = Rgb([255, 64, 64]);
const NOSE_COLOR: Rgb<u8> = Rgb([64, 255, 64]);
const NOSE_RADIUS: i64 = 3;

pub fn annotated_data_uri(
    view: &RgbView<'_>,
    face: Option<&LandmarkSet>,
    boxes: &[DetectionBox],
) -> Result<String> {
    let mut image = RgbImage::from_raw(view.width(), view.height(), view.pixels().to_vec())
        .ok_or_else(|| anyhow!("pixel buffer does not match frame size"))?;

    for detection in boxes {
        draw_rect(&mut image, detection.bbox, BOX_COLOR);
    }
    if let Some(nose) = face.and_then(|f| f.point(Keypoint::NoseTip)) {
        let (x, y) = nose.to_pixels(view.width(), view.height());
        draw_marker(&mut image, x as i64, y as i64, NOSE_COLOR);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&image)
        .context("encode annotated frame")?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(format!("data:image/jpeg;base64,{}", encoded))
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(image: &mut RgbImage, bbox: [f32; 4], color: Rgb<u8>) {
    if !bbox.iter().all(|v| v.is_finite()) {
        return;
    }
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x1 = (bbox[0].min(bbox[2]) as i64).max(-1);
    let x2 = (bbox[0].max(bbox[2]) as i64).min(w);
    let y1 = (bbox[1].min(bbox[3]) as i64).max(-1);
    let y2 = (bbox[1].max(bbox[3]) as i64).min(h);
    for x in x1..=x2 {
        put(image, x, y1, color);
        put(image, x, y2, color);
    }
    for y in y1..=y2 {
        put(image, x1, y, color);
        put(image, x2, y, color);
    }
}

fn draw_marker(image: &mut RgbImage, cx: i64, cy: i64, color: Rgb<u8>) {
    for dy in -NOSE_RADIUS..=NOSE_RADIUS {
        for dx in -NOSE_RADIUS..=NOSE_RADIUS {
            if dx * dx + dy * dy <= NOSE_RADIUS * NOSE_RADIUS {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::synthetic_face;
    use crate::frame::{Frame, PixelFormat};

    #[test]
    fn renders_a_jpeg_data_uri() {
        let mut frame = Frame::new(vec![30; 32 * 24 * 3], 32, 24, PixelFormat::Rgb8, 0);
        let view = frame.rgb_view().unwrap();
        let face = synthetic_face((32, 24), (0.5, 0.5), 0.1, 0.0);
        let boxes = [DetectionBox::new("book", 0.9, [2.0, 2.0, 40.0, 10.0])];
        let uri = annotated_data_uri(&view, Some(&face), &boxes).unwrap();
        let payload = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn drawing_clips_to_the_image() {
        let mut image = RgbImage::new(4, 4);
        draw_rect(&mut image, [-10.0, -10.0, 100.0, 100.0], BOX_COLOR);
        draw_marker(&mut image, 0, 0, NOSE_COLOR);
        assert_eq!(*image.get_pixel(0, 0), NOSE_COLOR);
    }
}
