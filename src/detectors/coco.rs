use super::{
    Category, DetectError, DetectOptions, Detected, DetectionReport, Detector, Finding, Findings,
    Upload, image_not_found,
};
use crate::annotate;
use crate::models::ModelStore;
use crate::yolo::Detection;
use image::RgbImage;
use image::imageops;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const PEOPLE_CLASSES: &[&str] = &["person"];
const VEHICLE_CLASSES: &[&str] = &["bicycle", "car", "motorcycle", "bus", "train", "truck", "boat"];
const TECHNOLOGY_CLASSES: &[&str] = &["tv", "laptop", "mouse", "remote", "keyboard", "cell phone"];
const ASSET_CLASSES: &[&str] = &["handbag", "wallet", "watch", "laptop", "suitcase", "umbrella"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub class: String,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetReport {
    pub assets: Vec<Asset>,
}

/// Filters the general-purpose COCO detector down to one category's classes.
pub struct CocoDetector {
    category: Category,
    models: Arc<ModelStore>,
}

impl CocoDetector {
    pub fn new(category: Category, models: Arc<ModelStore>) -> Self {
        Self { category, models }
    }

    fn classes(&self) -> &'static [&'static str] {
        match self.category {
            Category::People => PEOPLE_CLASSES,
            Category::Vehicles => VEHICLE_CLASSES,
            Category::Objects => ASSET_CLASSES,
            _ => TECHNOLOGY_CLASSES,
        }
    }

    fn with_plates(
        &self,
        image: &RgbImage,
        detections: &[Detection],
    ) -> Result<Vec<Finding>, DetectError> {
        let ocr = self.models.ocr()?;
        let mut findings = Vec::with_capacity(detections.len());
        for detection in detections {
            let Some((x, y, width, height)) =
                plate_crop(image.width(), image.height(), detection.int_box())
            else {
                continue;
            };
            let crop = imageops::crop_imm(image, x, y, width, height).to_image();
            let plates = ocr
                .read_lines(&crop)?
                .into_iter()
                .map(|line| line.text)
                .collect();
            findings.push(Finding {
                plates: Some(plates),
                ..Finding::from_detection(detection)
            });
        }
        Ok(findings)
    }
}

impl Detector for CocoDetector {
    fn category(&self) -> Category {
        self.category
    }

    fn detect(&self, upload: &Upload, options: &DetectOptions) -> Result<Detected, DetectError> {
        let Some(image) = upload.decode_rgb() else {
            let findings = match self.category {
                Category::Objects => Findings::Failure {
                    error: image_not_found(upload),
                },
                category => Findings::Detections(DetectionReport::failed(
                    category,
                    image_not_found(upload),
                )),
            };
            return Ok(Detected::new(findings));
        };

        let model = self.models.coco()?;
        let detections = select_classes(
            model.predict(&image, model.config().conf_threshold)?,
            self.classes(),
        );
        debug!(category = %self.category, kept = detections.len(), "COCO detections filtered");

        let findings = match self.category {
            Category::Objects => Findings::Assets(AssetReport {
                assets: detections
                    .iter()
                    .map(|d| Asset {
                        class: d.label.clone(),
                        bbox: d.int_box(),
                    })
                    .collect(),
            }),
            Category::Vehicles => Findings::Detections(DetectionReport::new(
                self.category,
                self.with_plates(&image, &detections)?,
            )),
            category => Findings::Detections(DetectionReport::new(
                category,
                detections.iter().map(Finding::from_detection).collect(),
            )),
        };

        let preview = if options.preview {
            Some(annotate::preview(&image, &detections)?)
        } else {
            None
        };
        Ok(Detected::new(findings).with_preview(preview))
    }
}

/// Clamps a plate box to the image, returning `(x, y, width, height)` or
/// `None` when nothing of it is left to read.
fn plate_crop(image_width: u32, image_height: u32, bbox: [i32; 4]) -> Option<(u32, u32, u32, u32)> {
    let clamp_x = |v: i32| v.clamp(0, image_width as i32) as u32;
    let clamp_y = |v: i32| v.clamp(0, image_height as i32) as u32;
    let [x1, y1, x2, y2] = bbox;
    let (x1, x2) = (clamp_x(x1), clamp_x(x2));
    let (y1, y2) = (clamp_y(y1), clamp_y(y2));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

fn select_classes(detections: Vec<Detection>, classes: &[&str]) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| classes.contains(&d.label.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            score: 0.5,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }
    }

    #[test]
    fn only_category_classes_survive() {
        let kept = select_classes(
            vec![det("person"), det("car"), det("cell phone"), det("dog")],
            TECHNOLOGY_CLASSES,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "cell phone");
    }

    #[test]
    fn plate_crops_are_clamped_to_the_image() {
        assert_eq!(plate_crop(100, 50, [10, 5, 40, 25]), Some((10, 5, 30, 20)));
        assert_eq!(plate_crop(100, 50, [-8, -3, 120, 70]), Some((0, 0, 100, 50)));
    }

    #[test]
    fn degenerate_plate_boxes_are_skipped() {
        assert_eq!(plate_crop(100, 50, [40, 5, 40, 25]), None);
        assert_eq!(plate_crop(100, 50, [30, 20, 10, 40]), None);
        assert_eq!(plate_crop(100, 50, [110, 5, 130, 25]), None);
        assert_eq!(plate_crop(100, 50, [10, -20, 40, -1]), None);
    }

    #[test]
    fn undecodable_upload_is_a_soft_error() {
        let dir = tempfile::tempdir().unwrap();
        let models = Arc::new(ModelStore::new(dir.path(), 1));
        let upload = Upload::new("scan.png", b"not an image".to_vec());

        let people = CocoDetector::new(Category::People, models.clone());
        let detected = people.detect(&upload, &DetectOptions::default()).unwrap();
        assert_eq!(
            detected.findings,
            Findings::Detections(DetectionReport::failed(
                Category::People,
                "Image scan.png not found."
            ))
        );

        let objects = CocoDetector::new(Category::Objects, models);
        let detected = objects.detect(&upload, &DetectOptions::default()).unwrap();
        assert_eq!(
            serde_json::to_value(&detected.findings).unwrap(),
            serde_json::json!({"error": "Image scan.png not found."})
        );
    }

    #[test]
    fn decodable_upload_without_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let models = Arc::new(ModelStore::new(dir.path(), 1));
        let mut png = std::io::Cursor::new(Vec::new());
        RgbImage::new(4, 4)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let upload = Upload::new("frame.png", png.into_inner());

        let err = CocoDetector::new(Category::Vehicles, models)
            .detect(&upload, &DetectOptions::default())
            .unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable { model: "coco", .. }));
    }

    #[test]
    fn assets_serialize_with_box_key() {
        let report = AssetReport {
            assets: vec![Asset {
                class: "handbag".into(),
                bbox: [1, 2, 3, 4],
            }],
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"assets": [{"class": "handbag", "box": [1, 2, 3, 4]}]})
        );
    }
}
