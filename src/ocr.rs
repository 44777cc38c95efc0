//! Two-stage text reader: a DB-style text detector proposes line boxes and a
//! CTC recognizer reads each crop.

use crate::onnx::{ModelError, build_session, require_files, softmax};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView2, Axis, Ix3, Ix4};
use ort::inputs;
use ort::session::Session;
use std::collections::VecDeque;
use std::path::Path;
use tracing::debug;

const DET_LIMIT_SIDE: u32 = 960;
const DET_BIN_THRESH: f32 = 0.3;
const DET_BOX_THRESH: f32 = 0.6;
const DET_MIN_SIDE: f32 = 3.0;
const UNCLIP_RATIO: f32 = 1.5;
const REC_HEIGHT: u32 = 48;
const REC_MAX_WIDTH: u32 = 320;
const REC_MIN_WIDTH: u32 = 16;
const SAME_LINE_TOLERANCE: f32 = 10.0;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source image pixels.
    pub bbox: [f32; 4],
}

pub struct OcrEngine {
    detector: Session,
    recognizer: Session,
    charset: Vec<String>,
}

impl OcrEngine {
    pub fn new(model_dir: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let dict_path = model_dir.join("dict.txt");
        require_files(&[&dict_path])?;
        let charset = load_charset(&std::fs::read_to_string(&dict_path)?);
        let detector = build_session(&model_dir.join("det.onnx"), intra_threads)?;
        let recognizer = build_session(&model_dir.join("rec.onnx"), intra_threads)?;
        debug!(symbols = charset.len(), "OCR engine ready");
        Ok(Self {
            detector,
            recognizer,
            charset,
        })
    }

    /// All recognized lines joined by single spaces.
    pub fn read_text(&self, image: &RgbImage) -> Result<String, ModelError> {
        let lines = self.read_lines(image)?;
        Ok(lines
            .into_iter()
            .map(|line| line.text)
            .collect::<Vec<_>>()
            .join(" "))
    }

    pub fn read_lines(&self, image: &RgbImage) -> Result<Vec<OcrLine>, ModelError> {
        let boxes = self.detect_boxes(image)?;
        let mut lines = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let [x1, y1, x2, y2] = bbox;
            let (w, h) = ((x2 - x1) as u32, (y2 - y1) as u32);
            if w == 0 || h == 0 {
                continue;
            }
            let crop = imageops::crop_imm(image, x1 as u32, y1 as u32, w, h).to_image();
            let (text, confidence) = self.recognize(&crop)?;
            if !text.trim().is_empty() {
                lines.push(OcrLine {
                    text,
                    confidence,
                    bbox,
                });
            }
        }
        Ok(lines)
    }

    fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<[f32; 4]>, ModelError> {
        let (det_w, det_h) = det_input_size(image.width(), image.height(), DET_LIMIT_SIDE);
        let resized = imageops::resize(image, det_w, det_h, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, det_h as usize, det_w as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] =
                    (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        let input_name = self.detector.inputs[0].name.clone();
        let outputs = self.detector.run(inputs![input_name => tensor.view()]?)?;
        let output_name = self.detector.outputs[0].name.clone();
        let map = outputs
            .get(&output_name)
            .ok_or(ModelError::OutputFormatUnexpected)?
            .try_extract_tensor::<f32>()?;
        let map = map
            .into_dimensionality::<Ix4>()
            .map_err(|_| ModelError::OutputFormatUnexpected)?;
        let map = map.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0);

        let sx = image.width() as f32 / det_w as f32;
        let sy = image.height() as f32 / det_h as f32;
        let mut boxes: Vec<[f32; 4]> =
            boxes_from_probability_map(map, DET_BIN_THRESH, DET_BOX_THRESH, DET_MIN_SIDE)
                .into_iter()
                .map(|[x1, y1, x2, y2]| {
                    [
                        (x1 * sx).clamp(0.0, image.width() as f32).floor(),
                        (y1 * sy).clamp(0.0, image.height() as f32).floor(),
                        (x2 * sx).clamp(0.0, image.width() as f32).ceil(),
                        (y2 * sy).clamp(0.0, image.height() as f32).ceil(),
                    ]
                })
                .collect();
        sort_reading_order(&mut boxes);
        Ok(boxes)
    }

    fn recognize(&self, crop: &RgbImage) -> Result<(String, f32), ModelError> {
        let width = ((REC_HEIGHT as f32 * crop.width() as f32 / crop.height() as f32).ceil()
            as u32)
            .clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);
        let resized = imageops::resize(crop, width, REC_HEIGHT, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, REC_HEIGHT as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }

        let input_name = self.recognizer.inputs[0].name.clone();
        let outputs = self.recognizer.run(inputs![input_name => tensor.view()]?)?;
        let output_name = self.recognizer.outputs[0].name.clone();
        let probs = outputs
            .get(&output_name)
            .ok_or(ModelError::OutputFormatUnexpected)?
            .try_extract_tensor::<f32>()?;
        let probs = probs
            .into_dimensionality::<Ix3>()
            .map_err(|_| ModelError::OutputFormatUnexpected)?;
        Ok(ctc_greedy_decode(
            probs.index_axis_move(Axis(0), 0),
            &self.charset,
        ))
    }
}

/// Dictionary lines plus the trailing space symbol.
pub fn load_charset(dict: &str) -> Vec<String> {
    let mut charset: Vec<String> = dict
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect();
    charset.push(" ".to_string());
    charset
}

/// Largest size within `limit` that keeps the aspect ratio and is a multiple of 32.
pub fn det_input_size(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let longest = width.max(height) as f32;
    let ratio = if longest > limit as f32 {
        limit as f32 / longest
    } else {
        1.0
    };
    let round32 = |v: f32| (((v / 32.0).round() as u32) * 32).max(32);
    (round32(width as f32 * ratio), round32(height as f32 * ratio))
}

/// Connected regions of the binarized map, as expanded axis-aligned boxes in
/// map coordinates.
pub fn boxes_from_probability_map(
    map: ArrayView2<f32>,
    bin_thresh: f32,
    box_thresh: f32,
    min_side: f32,
) -> Vec<[f32; 4]> {
    let (rows, cols) = map.dim();
    let mut visited = vec![false; rows * cols];
    let mut boxes = Vec::new();
    let mut queue = VecDeque::new();

    for start_y in 0..rows {
        for start_x in 0..cols {
            let idx = start_y * cols + start_x;
            if visited[idx] || map[[start_y, start_x]] <= bin_thresh {
                continue;
            }
            visited[idx] = true;
            queue.push_back((start_y, start_x));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (start_x, start_y, start_x, start_y);
            let (mut score_sum, mut count) = (0.0f32, 0usize);

            while let Some((y, x)) = queue.pop_front() {
                score_sum += map[[y, x]];
                count += 1;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                let neighbours = [
                    (y.wrapping_sub(1), x),
                    (y + 1, x),
                    (y, x.wrapping_sub(1)),
                    (y, x + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny >= rows || nx >= cols {
                        continue;
                    }
                    let nidx = ny * cols + nx;
                    if !visited[nidx] && map[[ny, nx]] > bin_thresh {
                        visited[nidx] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }

            let w = (max_x - min_x + 1) as f32;
            let h = (max_y - min_y + 1) as f32;
            if w.min(h) < min_side || score_sum / (count as f32) < box_thresh {
                continue;
            }
            let d = w * h * UNCLIP_RATIO / (2.0 * (w + h));
            boxes.push([
                (min_x as f32 - d).max(0.0),
                (min_y as f32 - d).max(0.0),
                ((max_x + 1) as f32 + d).min(cols as f32),
                ((max_y + 1) as f32 + d).min(rows as f32),
            ]);
        }
    }
    boxes
}

/// Top-to-bottom, then left-to-right for boxes on the same line.
pub fn sort_reading_order(boxes: &mut [[f32; 4]]) {
    boxes.sort_by(|a, b| a[1].total_cmp(&b[1]).then(a[0].total_cmp(&b[0])));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0
            && (boxes[j][1] - boxes[j - 1][1]).abs() < SAME_LINE_TOLERANCE
            && boxes[j][0] < boxes[j - 1][0]
        {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Greedy CTC over `[steps, classes]`; class 0 is blank.
pub fn ctc_greedy_decode(probs: ArrayView2<f32>, charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;
    for step in probs.axis_iter(Axis(0)) {
        let row: Vec<f32> = step.iter().copied().collect();
        let total: f32 = row.iter().sum();
        let row = if (total - 1.0).abs() > 1e-3 || row.iter().any(|&p| p < 0.0) {
            softmax(&row)
        } else {
            row
        };
        let (best, score) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if best != 0 && best != previous {
            if let Some(symbol) = charset.get(best - 1) {
                text.push_str(symbol);
                scores.push(score);
            }
        }
        previous = best;
    }
    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    (text, confidence)
}
