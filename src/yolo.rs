use crate::model_config::DetectorConfig;
use crate::onnx::{ModelError, build_session};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView2, Axis, Ix3};
use ort::inputs;
use ort::session::{Session, SessionOutputs};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const PAD_VALUE: f32 = 114.0 / 255.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub score: f32,
    /// `[x1, y1, x2, y2]` in original image pixels.
    pub bbox: [f32; 4],
}

impl Detection {
    /// Box corners truncated toward zero.
    pub fn int_box(&self) -> [i32; 4] {
        self.bbox.map(|v| v as i32)
    }

    fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

/// Placement of the original image inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, input_size: usize) -> Self {
        let size = input_size as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, input_size as u32);
        Self {
            scale,
            pad_x: ((input_size as u32 - scaled_width) / 2) as f32,
            pad_y: ((input_size as u32 - scaled_height) / 2) as f32,
            scaled_width,
            scaled_height,
            width,
            height,
        }
    }

    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let ox = ((x - self.pad_x) / self.scale).clamp(0.0, self.width as f32);
        let oy = ((y - self.pad_y) / self.scale).clamp(0.0, self.height as f32);
        (ox, oy)
    }
}

pub struct YoloModel {
    session: Session,
    config: DetectorConfig,
}

impl YoloModel {
    pub fn new(
        model_dir: &Path,
        default_names: &[&str],
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        let config = DetectorConfig::load_or(model_dir, default_names)?;
        let session = build_session(&model_dir.join("model.onnx"), intra_threads)?;
        debug!(
            classes = config.names.len(),
            input_size = config.input_size,
            "YOLO detector ready"
        );
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.config.input_size;
        let letterbox = Letterbox::new(image.width(), image.height(), size);
        let resized = imageops::resize(
            image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            FilterType::Triangle,
        );

        let mut array = Array4::from_elem((1, 3, size, size), PAD_VALUE);
        let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize + off_y, x as usize + off_x]] = pixel[c] as f32 / 255.0;
            }
        }
        (array, letterbox)
    }

    /// Runs one forward pass and returns NMS-filtered detections scoring at
    /// least `conf_threshold`.
    pub fn predict(
        &self,
        image: &RgbImage,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, ModelError> {
        let (tensor, letterbox) = self.preprocess(image);

        let input_name = self.session.inputs[0].name.clone();
        let outputs: SessionOutputs = self.session.run(inputs![input_name => tensor.view()]?)?;

        let output_name = self.session.outputs[0].name.clone();
        let output_value = outputs
            .get(&output_name)
            .ok_or(ModelError::OutputFormatUnexpected)?;
        let raw = output_value.try_extract_tensor::<f32>()?;
        let raw = raw
            .into_dimensionality::<Ix3>()
            .map_err(|_| ModelError::OutputFormatUnexpected)?;
        let mut predictions = raw.index_axis_move(Axis(0), 0);
        // Some exports emit [anchors, 4 + classes].
        if predictions.nrows() > predictions.ncols() {
            predictions = predictions.reversed_axes();
        }
        if predictions.nrows() <= 4 {
            return Err(ModelError::InputShapeMismatch);
        }

        let candidates = decode(predictions, &letterbox, conf_threshold, &self.config);
        Ok(non_max_suppression(
            candidates,
            self.config.iou_threshold,
            self.config.max_detections,
        ))
    }
}

/// Decodes a `[4 + classes, anchors]` prediction matrix of centre/size boxes.
pub fn decode(
    predictions: ArrayView2<f32>,
    letterbox: &Letterbox,
    conf_threshold: f32,
    config: &DetectorConfig,
) -> Vec<Detection> {
    let classes = predictions.nrows() - 4;
    let mut detections = Vec::new();
    for anchor in predictions.axis_iter(Axis(1)) {
        let (class_id, score) = (0..classes)
            .map(|c| (c, anchor[4 + c]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 { cur } else { best }
            });
        if score < conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);
        detections.push(Detection {
            class_id,
            label: config.class_name(class_id),
            score,
            bbox: [x1, y1, x2, y2],
        });
    }
    detections
}

pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix1 = a.bbox[0].max(b.bbox[0]);
    let iy1 = a.bbox[1].max(b.bbox[1]);
    let ix2 = a.bbox[2].min(b.bbox[2]);
    let iy2 = a.bbox[3].min(b.bbox[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Class-aware greedy NMS; output is sorted by descending score.
pub fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn det(class_id: usize, score: f32, bbox: [f32; 4]) -> Detection {
        Detection {
            class_id,
            label: format!("c{class_id}"),
            score,
            bbox,
        }
    }

    #[test]
    fn letterbox_centres_wide_images() {
        let lb = Letterbox::new(1280, 640, 640);
        assert_eq!(lb.scaled_width, 640);
        assert_eq!(lb.scaled_height, 320);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        let (x, y) = lb.to_original(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 320.0).abs() < 1e-3);
    }

    #[test]
    fn letterbox_clamps_to_image() {
        let lb = Letterbox::new(100, 100, 640);
        assert_eq!(lb.to_original(-50.0, 700.0), (0.0, 100.0));
    }

    #[test]
    fn decode_picks_best_class_and_maps_back() {
        let config = DetectorConfig::with_names(&["person", "car"]);
        let lb = Letterbox::new(640, 640, 640);
        // two anchors: one confident car, one below threshold
        let mut preds = Array2::<f32>::zeros((6, 2));
        preds.column_mut(0).assign(&ndarray::arr1(&[100.0, 100.0, 40.0, 20.0, 0.1, 0.9]));
        preds.column_mut(1).assign(&ndarray::arr1(&[300.0, 300.0, 10.0, 10.0, 0.2, 0.1]));

        let found = decode(preds.view(), &lb, 0.25, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "car");
        assert_eq!(found[0].int_box(), [80, 90, 120, 110]);
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let dets = vec![
            det(0, 0.8, [0.0, 0.0, 10.0, 10.0]),
            det(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
            det(1, 0.7, [0.0, 0.0, 10.0, 10.0]),
            det(0, 0.6, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = non_max_suppression(dets, 0.5, 300);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn nms_respects_max_detections() {
        let dets = (0..5)
            .map(|i| det(0, 0.5 + i as f32 * 0.01, [i as f32 * 20.0, 0.0, i as f32 * 20.0 + 5.0, 5.0]))
            .collect();
        assert_eq!(non_max_suppression(dets, 0.5, 2).len(), 2);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = det(0, 1.0, [0.0, 0.0, 1.0, 1.0]);
        let b = det(0, 1.0, [2.0, 2.0, 3.0, 3.0]);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }
}
