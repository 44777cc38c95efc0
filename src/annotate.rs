use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::yolo::Detection;

const LINE_WIDTH: i64 = 2;
const JPEG_QUALITY: u8 = 90;

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb([255, ((class_id * 40) % 255) as u8, 0])
}

/// Outlines `bbox` on `image`, clipped to the image bounds.
pub fn draw_box(image: &mut RgbImage, bbox: [i32; 4], color: Rgb<u8>) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let [x1, y1, x2, y2] = bbox.map(i64::from);
    let mut put = |x: i64, y: i64| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            image.put_pixel(x as u32, y as u32, color);
        }
    };
    for t in 0..LINE_WIDTH {
        for x in x1..=x2 {
            put(x, y1 + t);
            put(x, y2 - t);
        }
        for y in y1..=y2 {
            put(x1 + t, y);
            put(x2 - t, y);
        }
    }
}

pub fn annotate(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        draw_box(image, detection.int_box(), class_color(detection.class_id));
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(image)?;
    Ok(buffer)
}

/// Annotated copy of `image` as a base64 JPEG.
pub fn preview(image: &RgbImage, detections: &[Detection]) -> Result<String, image::ImageError> {
    let mut canvas = image.clone();
    annotate(&mut canvas, detections);
    Ok(STANDARD.encode(encode_jpeg(&canvas)?))
}
