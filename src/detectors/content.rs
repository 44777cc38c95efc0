use super::{Category, DetectError, DetectOptions, Detected, Detector, Findings, Upload, round_to};
use crate::documents::{self, DocumentKind, ExtractError};
use crate::models::ModelStore;
use crate::text_classifier::Classification;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub const DANGER_WORDS: [&str; 8] = [
    "kill", "death", "murder", "suicide", "die", "dead", "hurt", "pain",
];
pub const SUICIDAL_THRESHOLD: f32 = 0.65;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentReport {
    pub filename: String,
    pub detected_text: String,
    pub suicidal_label: String,
    pub suicidal_score: f64,
    pub flag: bool,
    pub danger_words: Vec<String>,
    pub highlighted_text: String,
}

/// Rejects OCR noise and fragments too short to classify.
pub fn is_meaningful_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 5 {
        return false;
    }
    let words = trimmed.split_whitespace().count();
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    words >= 2 && letters >= 3
}

pub fn find_danger_words(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    DANGER_WORDS
        .iter()
        .filter(|word| lowered.contains(*word))
        .map(|word| word.to_string())
        .collect()
}

/// Upper-cases each exact occurrence of `words`.
pub fn highlight(text: &str, words: &[String]) -> String {
    words
        .iter()
        .fold(text.to_string(), |acc, word| acc.replace(word.as_str(), &word.to_uppercase()))
}

pub fn human_label(raw: &str) -> String {
    match raw {
        "LABEL_0" => "non-suicidal".to_string(),
        "LABEL_1" => "suicidal".to_string(),
        other => other.to_string(),
    }
}

pub fn build_report(
    filename: &str,
    text: String,
    classification: Option<Classification>,
) -> ContentReport {
    let Some(classification) = classification else {
        return ContentReport {
            filename: filename.to_string(),
            highlighted_text: text.clone(),
            detected_text: text,
            suicidal_label: "non-suicidal".to_string(),
            suicidal_score: 0.0,
            flag: false,
            danger_words: Vec::new(),
        };
    };

    let label = human_label(&classification.label);
    let suicidal = label == "suicidal";
    let danger_words = find_danger_words(&text);
    let highlighted_text = if suicidal && !danger_words.is_empty() {
        highlight(&text, &danger_words)
    } else {
        text.clone()
    };
    ContentReport {
        filename: filename.to_string(),
        detected_text: text,
        flag: suicidal && classification.score > SUICIDAL_THRESHOLD,
        suicidal_label: label,
        suicidal_score: round_to(classification.score as f64, 4),
        danger_words,
        highlighted_text,
    }
}

/// Extracts text from documents or images and screens it for suicidality.
pub struct ContentDetector {
    models: Arc<ModelStore>,
}

impl ContentDetector {
    pub fn new(models: Arc<ModelStore>) -> Self {
        Self { models }
    }

    fn extract_text(&self, upload: &Upload) -> Result<String, DetectError> {
        let text = match DocumentKind::from_extension(&upload.extension())? {
            DocumentKind::PlainText => documents::plain_text(&upload.bytes)?,
            DocumentKind::Docx => documents::docx_text(&upload.bytes)?,
            DocumentKind::Pdf => documents::pdf_text(&upload.bytes)?,
            DocumentKind::Image => {
                let image = image::load_from_memory(&upload.bytes)
                    .map_err(ExtractError::Image)?
                    .to_rgb8();
                self.models.ocr()?.read_text(&image)?
            }
        };
        Ok(text)
    }
}

impl Detector for ContentDetector {
    fn category(&self) -> Category {
        Category::Content
    }

    fn detect(&self, upload: &Upload, _options: &DetectOptions) -> Result<Detected, DetectError> {
        let text = self.extract_text(upload)?;
        let preview: String = text.chars().take(100).collect();
        debug!(filename = %upload.filename, text = %preview, "extracted text");

        let classification = if is_meaningful_text(&text) {
            Some(self.models.classifier()?.classify(&text)?)
        } else {
            debug!("text too short or gibberish, treating as non-suicidal");
            None
        };
        Ok(Detected::new(Findings::Content(build_report(
            &upload.filename,
            text,
            classification,
        ))))
    }
}
