//! Category detectors and the registry that routes uploads to them.

mod coco;
mod content;
mod nudity;
mod weapons;

pub use coco::{AssetReport, CocoDetector};
pub use content::{ContentDetector, ContentReport};
pub use nudity::{NudityDetector, NudityMode, NudityReport, NuditySettings};
pub use weapons::{WEAPON_CONFIDENCE, WeaponsDetector, normalize_labels};

use crate::documents::ExtractError;
use crate::fetch::FetchError;
use crate::models::ModelStore;
use crate::onnx::ModelError;
use crate::yolo::Detection;
use image::RgbImage;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("Category not supported")]
    UnsupportedCategory(String),
    #[error("{model} model unavailable: {source}")]
    ModelUnavailable {
        model: &'static str,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    Inference(#[from] ModelError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to encode preview: {0}")]
    Preview(#[from] image::ImageError),
    #[error("Detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How a surface should report a `DetectError` to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unavailable,
    Internal,
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::UnsupportedCategory(_)
            | DetectError::Extract(ExtractError::Unsupported(_))
            | DetectError::Fetch(FetchError::InvalidUrl(_))
            | DetectError::Fetch(FetchError::TooLarge(_)) => ErrorKind::InvalidInput,
            DetectError::ModelUnavailable { .. } | DetectError::Fetch(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    People,
    Vehicles,
    Technology,
    Objects,
    Weapons,
    Appearance,
    Content,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::People,
        Category::Vehicles,
        Category::Technology,
        Category::Objects,
        Category::Weapons,
        Category::Appearance,
        Category::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::People => "people",
            Category::Vehicles => "vehicles",
            Category::Technology => "technology",
            Category::Objects => "objects",
            Category::Weapons => "weapons",
            Category::Appearance => "appearance",
            Category::Content => "content",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DetectError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_lowercase().as_str() {
            "people" => Ok(Category::People),
            "vehicles" => Ok(Category::Vehicles),
            "technology" => Ok(Category::Technology),
            "objects" | "object" | "assets" => Ok(Category::Objects),
            "weapons" => Ok(Category::Weapons),
            "appearance" | "nudity" | "obscenity" => Ok(Category::Appearance),
            "content" => Ok(Category::Content),
            _ => Err(DetectError::UnsupportedCategory(label.to_string())),
        }
    }
}

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn extension(&self) -> String {
        crate::documents::extension(&self.filename)
    }

    /// Decoded RGB pixels, or `None` when the bytes are not an image.
    pub fn decode_rgb(&self) -> Option<RgbImage> {
        match image::load_from_memory(&self.bytes) {
            Ok(image) => Some(image.to_rgb8()),
            Err(err) => {
                warn!(filename = %self.filename, error = %err, "upload is not a decodable image");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectOptions {
    /// Attach an annotated base64 JPEG where the detector draws boxes.
    pub preview: bool,
}

/// One labelled box as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub label: String,
    pub confidence: f64,
    pub bbox: [i32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plates: Option<Vec<String>>,
}

impl Finding {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            label: detection.label.clone(),
            confidence: round_to(detection.score as f64, 2),
            bbox: detection.int_box(),
            plates: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon_detected: Option<bool>,
    pub detections: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionReport {
    pub fn new(category: Category, detections: Vec<Finding>) -> Self {
        Self {
            category,
            weapon_detected: None,
            detections,
            error: None,
        }
    }

    pub fn failed(category: Category, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(category, Vec::new())
        }
    }
}

/// A category-scoped refusal that carries no detections at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub category: Category,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Findings {
    Detections(DetectionReport),
    Rejected(Rejection),
    Assets(AssetReport),
    Nudity(NudityReport),
    Content(ContentReport),
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detected {
    pub findings: Findings,
    pub preview: Option<String>,
}

impl Detected {
    pub fn new(findings: Findings) -> Self {
        Self {
            findings,
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Option<String>) -> Self {
        self.preview = preview;
        self
    }
}

pub trait Detector: Send + Sync {
    fn category(&self) -> Category;

    fn detect(&self, upload: &Upload, options: &DetectOptions) -> Result<Detected, DetectError>;
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn image_not_found(upload: &Upload) -> String {
    format!("Image {} not found.", upload.filename)
}

/// String-keyed lookup from category labels to detectors.
#[derive(Clone)]
pub struct Registry {
    detectors: HashMap<Category, Arc<dyn Detector>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Every built-in detector, sharing lazily loaded models from `models`.
    pub fn with_builtin(models: Arc<ModelStore>, nudity: NuditySettings) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CocoDetector::new(Category::People, models.clone())));
        registry.register(Arc::new(CocoDetector::new(Category::Vehicles, models.clone())));
        registry.register(Arc::new(CocoDetector::new(Category::Technology, models.clone())));
        registry.register(Arc::new(CocoDetector::new(Category::Objects, models.clone())));
        registry.register(Arc::new(WeaponsDetector::new(models.clone())));
        registry.register(Arc::new(NudityDetector::new(models.clone(), nudity)));
        registry.register(Arc::new(ContentDetector::new(models)));
        registry
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.category(), detector);
    }

    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.detectors.contains_key(c))
            .collect()
    }

    pub fn resolve(&self, label: &str) -> Result<Arc<dyn Detector>, DetectError> {
        let category: Category = label.parse()?;
        self.detectors
            .get(&category)
            .cloned()
            .ok_or_else(|| DetectError::UnsupportedCategory(label.to_string()))
    }

    /// Resolves `label` and runs its detector on the blocking pool.
    pub async fn detect(
        &self,
        label: &str,
        upload: Upload,
        options: DetectOptions,
    ) -> Result<Detected, DetectError> {
        let detector = self.resolve(label)?;
        info!(
            category = %detector.category(),
            filename = %upload.filename,
            bytes = upload.bytes.len(),
            "dispatching upload"
        );
        tokio::task::spawn_blocking(move || detector.detect(&upload, &options)).await?
    }
}
