use super::{
    Category, DetectError, DetectOptions, Detected, DetectionReport, Detector, Finding, Findings,
    Rejection, Upload,
};
use crate::annotate;
use crate::models::ModelStore;
use crate::yolo::Detection;
use std::sync::Arc;
use tracing::warn;

pub const WEAPON_CONFIDENCE: f32 = 0.5;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "gif"];

/// Runs the custom weapons model and always returns an annotated preview.
pub struct WeaponsDetector {
    models: Arc<ModelStore>,
}

impl WeaponsDetector {
    pub fn new(models: Arc<ModelStore>) -> Self {
        Self { models }
    }
}

/// Lower-cases labels the way reports expose them.
pub fn normalize_labels(detections: Vec<Detection>) -> Vec<Detection> {
    detections
        .into_iter()
        .map(|d| Detection {
            label: d.label.to_lowercase(),
            ..d
        })
        .collect()
}

pub fn is_weapon(label: &str) -> bool {
    label.contains("gun") || label.contains("knife")
}

impl Detector for WeaponsDetector {
    fn category(&self) -> Category {
        Category::Weapons
    }

    fn detect(&self, upload: &Upload, _options: &DetectOptions) -> Result<Detected, DetectError> {
        let ext = upload.extension();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(Detected::new(Findings::Rejected(Rejection {
                category: Category::Weapons,
                error: format!("Unsupported file type: {ext}"),
            })));
        }

        let image = match image::load_from_memory(&upload.bytes) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                warn!(filename = %upload.filename, error = %err, "weapons upload failed to decode");
                return Ok(Detected::new(Findings::Rejected(Rejection {
                    category: Category::Weapons,
                    error: err.to_string(),
                })));
            }
        };

        let model = self.models.weapons()?;
        let detections = normalize_labels(model.predict(&image, WEAPON_CONFIDENCE)?);
        let report = DetectionReport {
            weapon_detected: Some(detections.iter().any(|d| is_weapon(&d.label))),
            ..DetectionReport::new(
                Category::Weapons,
                detections.iter().map(Finding::from_detection).collect(),
            )
        };

        let preview = annotate::preview(&image, &detections)?;
        Ok(Detected::new(Findings::Detections(report)).with_preview(Some(preview)))
    }
}
