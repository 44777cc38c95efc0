use crate::annotate;
use crate::detectors::{DetectError, WEAPON_CONFIDENCE, normalize_labels};
use crate::documents::extension;
use crate::models::ModelStore;
use crate::yolo::Detection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];
const OUTPUT_DIR: &str = "suspicious_images";

#[derive(thiserror::Error, Debug)]
pub enum FolderError {
    #[error("Invalid or missing input_dir")]
    InvalidInputDir,
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write annotated image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FolderReport {
    /// Annotated copies written under `suspicious_images/`.
    pub images: Vec<String>,
    pub skipped_videos: Vec<String>,
}

/// Batch weapons scan over a local evidence folder.
pub struct FolderScanner {
    models: Arc<ModelStore>,
    allowed_root: Option<PathBuf>,
}

impl FolderScanner {
    pub fn new(models: Arc<ModelStore>, allowed_root: Option<PathBuf>) -> Self {
        Self {
            models,
            allowed_root,
        }
    }

    pub fn validate_dir(&self, input_dir: &str) -> Result<PathBuf, FolderError> {
        if input_dir.trim().is_empty() {
            return Err(FolderError::InvalidInputDir);
        }
        let dir = Path::new(input_dir)
            .canonicalize()
            .map_err(|_| FolderError::InvalidInputDir)?;
        if !dir.is_dir() {
            return Err(FolderError::InvalidInputDir);
        }
        if let Some(root) = &self.allowed_root {
            let root = root.canonicalize().map_err(|_| FolderError::InvalidInputDir)?;
            if !dir.starts_with(&root) {
                warn!(dir = ?dir, root = ?root, "input_dir outside the allowed root");
                return Err(FolderError::InvalidInputDir);
            }
        }
        Ok(dir)
    }

    /// Annotates every image with at least one weapon detection. When
    /// `categories` is non-empty only those labels count.
    pub fn scan(&self, input_dir: &str, categories: &[String]) -> Result<FolderReport, FolderError> {
        let dir = self.validate_dir(input_dir)?;
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut report = FolderReport::default();
        let mut images = Vec::new();
        for path in files {
            let ext = extension(&path.to_string_lossy());
            if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                images.push(path);
            } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                report.skipped_videos.push(path.display().to_string());
            }
        }
        if images.is_empty() {
            return Ok(report);
        }

        let model = self.models.weapons()?;
        let output_dir = dir.join(OUTPUT_DIR);
        std::fs::create_dir_all(&output_dir)?;
        let wanted: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();

        for path in images {
            let mut image = match image::open(&path) {
                Ok(image) => image.to_rgb8(),
                Err(err) => {
                    warn!(path = ?path, error = %err, "skipping unreadable image");
                    continue;
                }
            };
            let detections = select_labels(
                normalize_labels(model.predict(&image, WEAPON_CONFIDENCE).map_err(DetectError::from)?),
                &wanted,
            );
            let Some(first) = detections.first() else {
                continue;
            };

            annotate::annotate(&mut image, &detections);
            let out_path = output_dir.join(suspicious_name(&path, first));
            image.save(&out_path)?;
            info!(path = ?out_path, detections = detections.len(), "saved suspicious image");
            report.images.push(out_path.display().to_string());
        }
        Ok(report)
    }
}

fn select_labels(detections: Vec<Detection>, wanted: &[String]) -> Vec<Detection> {
    if wanted.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| wanted.iter().any(|w| w == &d.label))
        .collect()
}

/// `<stem>_<label>_<percent><.ext>` for the first detection in an image.
pub fn suspicious_name(path: &Path, first: &Detection) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let percent = (first.score * 100.0) as u32;
    format!("{stem}_{}_{percent}{ext}", first.label)
}
