use crate::detectors::DetectError;
use crate::model_config::{COCO_NAMES, NUDITY_NAMES};
use crate::ocr::OcrEngine;
use crate::onnx::{ModelError, require_files};
use crate::text_classifier::TextClassifier;
use crate::yolo::YoloModel;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Pretrained models under one root directory, each loaded on first use and
/// shared afterwards. A failed load is not cached, so a model dropped into
/// place later is picked up by the next request.
pub struct ModelStore {
    root: PathBuf,
    intra_threads: usize,
    coco: OnceCell<Arc<YoloModel>>,
    weapons: OnceCell<Arc<YoloModel>>,
    nudity: OnceCell<Arc<YoloModel>>,
    ocr: OnceCell<Arc<OcrEngine>>,
    classifier: OnceCell<Arc<TextClassifier>>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, intra_threads: usize) -> Self {
        Self {
            root: root.into(),
            intra_threads,
            coco: OnceCell::new(),
            weapons: OnceCell::new(),
            nudity: OnceCell::new(),
            ocr: OnceCell::new(),
            classifier: OnceCell::new(),
        }
    }

    pub fn coco(&self) -> Result<Arc<YoloModel>, DetectError> {
        self.load(&self.coco, "coco", |dir, threads| {
            YoloModel::new(dir, &COCO_NAMES, threads)
        })
    }

    pub fn weapons(&self) -> Result<Arc<YoloModel>, DetectError> {
        // custom-trained, so class names must come from detector_config.json
        self.load(&self.weapons, "weapons", |dir, threads| {
            require_files(&[&dir.join("detector_config.json")])?;
            YoloModel::new(dir, &[], threads)
        })
    }

    pub fn nudity(&self) -> Result<Arc<YoloModel>, DetectError> {
        self.load(&self.nudity, "nudity", |dir, threads| {
            YoloModel::new(dir, &NUDITY_NAMES, threads)
        })
    }

    pub fn ocr(&self) -> Result<Arc<OcrEngine>, DetectError> {
        self.load(&self.ocr, "ocr", OcrEngine::new)
    }

    pub fn classifier(&self) -> Result<Arc<TextClassifier>, DetectError> {
        self.load(&self.classifier, "suicidality", TextClassifier::new)
    }

    fn load<T>(
        &self,
        slot: &OnceCell<Arc<T>>,
        name: &'static str,
        init: impl FnOnce(&Path, usize) -> Result<T, ModelError>,
    ) -> Result<Arc<T>, DetectError> {
        slot.get_or_try_init(|| {
            let dir = self.root.join(name);
            info!(model = name, dir = ?dir, "loading model");
            init(&dir, self.intra_threads).map(Arc::new)
        })
        .cloned()
        .map_err(|source| {
            warn!(model = name, error = %source, "model failed to load");
            DetectError::ModelUnavailable {
                model: name,
                source,
            }
        })
    }
}
