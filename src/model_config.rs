// src/model_config.rs
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::onnx::ModelError;

/// `detector_config.json` next to a YOLO-style `model.onnx`.
#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_input_size")]
    pub input_size: usize,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

fn default_input_size() -> usize {
    640
}

fn default_conf_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_max_detections() -> usize {
    300
}

impl DetectorConfig {
    pub fn with_names(names: &[&str]) -> Self {
        Self {
            input_size: default_input_size(),
            names: names.iter().map(|n| n.to_string()).collect(),
            conf_threshold: default_conf_threshold(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
        }
    }

    /// Reads the config from `dir`, or falls back to `default_names` when the
    /// file is absent. An empty `names` list in the file also takes the default.
    pub fn load_or(dir: &Path, default_names: &[&str]) -> Result<Self, ModelError> {
        let path = dir.join("detector_config.json");
        if !path.exists() {
            return Ok(Self::with_names(default_names));
        }
        let file = std::fs::File::open(path)?;
        let mut config: DetectorConfig = serde_json::from_reader(file)?;
        if config.names.is_empty() {
            config.names = default_names.iter().map(|n| n.to_string()).collect();
        }
        Ok(config)
    }

    pub fn class_name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

/// The subset of a HuggingFace `config.json` the text classifier needs.
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub id2label: HashMap<String, String>,
    #[serde(default = "default_max_position")]
    pub max_position_embeddings: usize,
}

fn default_max_position() -> usize {
    512
}

impl ClassifierConfig {
    pub fn label(&self, class_id: usize) -> String {
        self.id2label
            .get(&class_id.to_string())
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{class_id}"))
    }
}

pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Body-part classes of the nudity detector, in model output order.
pub const NUDITY_NAMES: [&str; 16] = [
    "EXPOSED_ANUS",
    "EXPOSED_ARMPITS",
    "COVERED_BELLY",
    "EXPOSED_BELLY",
    "COVERED_BUTTOCKS",
    "EXPOSED_BUTTOCKS",
    "FACE_F",
    "FACE_M",
    "COVERED_FEET",
    "EXPOSED_FEET",
    "COVERED_BREAST_F",
    "EXPOSED_BREAST_F",
    "COVERED_GENITALIA_F",
    "EXPOSED_GENITALIA_F",
    "EXPOSED_BREAST_M",
    "EXPOSED_GENITALIA_M",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_config_fills_defaults() {
        let config: DetectorConfig = serde_json::from_str(r#"{"names": ["gun", "knife"]}"#).unwrap();
        assert_eq!(config.input_size, 640);
        assert_eq!(config.class_name(1), "knife");
        assert_eq!(config.class_name(7), "class_7");
        assert!((config.iou_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_detector_config_uses_default_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectorConfig::load_or(dir.path(), &COCO_NAMES).unwrap();
        assert_eq!(config.names.len(), 80);
        assert_eq!(config.class_name(0), "person");
    }

    #[test]
    fn classifier_labels_fall_back_to_generic() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"id2label": {"0": "LABEL_0", "1": "LABEL_1"}}"#).unwrap();
        assert_eq!(config.label(1), "LABEL_1");
        assert_eq!(config.label(3), "LABEL_3");
        assert_eq!(config.max_position_embeddings, 512);
    }
}
