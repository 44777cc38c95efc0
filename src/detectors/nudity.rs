use super::{
    Category, DetectError, DetectOptions, Detected, Detector, Findings, Upload, round_to,
};
use crate::annotate;
use crate::models::ModelStore;
use crate::yolo::{Detection, YoloModel};
use image::RgbImage;
use image::imageops::{self, FilterType};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudityMode {
    Default,
    Fast,
    HighSensitivity,
}

impl NudityMode {
    fn max_side(&self) -> u32 {
        match self {
            NudityMode::Fast => 800,
            _ => 1333,
        }
    }
}

impl fmt::Display for NudityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NudityMode::Default => "default",
            NudityMode::Fast => "fast",
            NudityMode::HighSensitivity => "high_sensitivity",
        })
    }
}

impl FromStr for NudityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(NudityMode::Default),
            "fast" => Ok(NudityMode::Fast),
            "high_sensitivity" | "high" => Ok(NudityMode::HighSensitivity),
            other => Err(format!("unknown nudity mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NuditySettings {
    pub mode: NudityMode,
    pub min_confidence: f32,
    pub include_belly: bool,
}

impl Default for NuditySettings {
    /// Tuned for evidence review: a lower threshold and no belly regions.
    fn default() -> Self {
        Self {
            mode: NudityMode::Default,
            min_confidence: 0.4,
            include_belly: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub label: String,
    pub confidence: f64,
    pub confidence_level: &'static str,
    pub risk_level: &'static str,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NudityReport {
    pub nudity_detected: bool,
    pub regions: Vec<Region>,
    pub total_regions: usize,
    pub message: String,
}

/// `(confidence_level, risk_level)` for a raw score.
pub fn grade(score: f32) -> (&'static str, &'static str) {
    if score > 0.7 {
        ("HIGH", "CRITICAL")
    } else if score > 0.5 {
        ("MEDIUM", "HIGH")
    } else {
        ("LOW", "MEDIUM")
    }
}

pub fn describe(label: &str) -> String {
    let description = match label {
        "EXPOSED_ANUS" => "Exposed anal region",
        "EXPOSED_ARMPITS" => "Exposed armpits",
        "EXPOSED_BELLY" => "Exposed belly/stomach region",
        "EXPOSED_BREAST_F" => "Exposed female breast",
        "EXPOSED_BREAST_M" => "Exposed male breast",
        "EXPOSED_BUTTOCKS" => "Exposed buttocks",
        "EXPOSED_FEET" => "Exposed feet",
        "EXPOSED_GENITALIA_F" => "Exposed female genitalia",
        "EXPOSED_GENITALIA_M" => "Exposed male genitalia",
        "EXPOSED_GLUTEAL_CLEFT" => "Exposed gluteal cleft",
        "EXPOSED_THIGHS" => "Exposed thighs",
        other => other,
    };
    description.to_string()
}

pub fn build_report(raw: &[Detection], include_belly: bool) -> NudityReport {
    if raw.is_empty() {
        return NudityReport {
            nudity_detected: false,
            regions: Vec::new(),
            total_regions: 0,
            message: "No nudity detected in the image".to_string(),
        };
    }

    let regions: Vec<Region> = raw
        .iter()
        .filter(|d| include_belly || !d.label.contains("BELLY"))
        .map(|d| {
            let (confidence_level, risk_level) = grade(d.score);
            Region {
                label: d.label.clone(),
                confidence: round_to(d.score as f64 * 100.0, 1),
                confidence_level,
                risk_level,
                bbox: d.int_box(),
                description: describe(&d.label),
            }
        })
        .collect();

    let message = if regions.is_empty() {
        "No nudity detected".to_string()
    } else {
        format!("Detected {} potential nudity regions", regions.len())
    };
    NudityReport {
        nudity_detected: !regions.is_empty(),
        total_regions: regions.len(),
        regions,
        message,
    }
}

/// Runs the passes `settings` call for. High sensitivity adds a lower-threshold
/// default pass when the first finds fewer than two regions.
pub fn run_passes<F>(settings: &NuditySettings, mut run: F) -> Result<Vec<Detection>, DetectError>
where
    F: FnMut(NudityMode, f32) -> Result<Vec<Detection>, DetectError>,
{
    let threshold = match settings.mode {
        NudityMode::HighSensitivity => settings.min_confidence.min(0.3),
        _ => settings.min_confidence,
    };
    let first_mode = match settings.mode {
        NudityMode::Fast => NudityMode::Fast,
        _ => NudityMode::Default,
    };
    let mut results = run(first_mode, threshold)?;

    if settings.mode == NudityMode::HighSensitivity && results.len() < 2 {
        for extra in run(NudityMode::Default, threshold * 0.6)? {
            if !results.contains(&extra) {
                results.push(extra);
            }
        }
    }
    Ok(results)
}

/// Downscales so the longest side fits `max_side`; returns the scale applied.
fn limit_side(image: &RgbImage, max_side: u32) -> (Cow<'_, RgbImage>, f32) {
    let longest = image.width().max(image.height());
    if longest <= max_side {
        return (Cow::Borrowed(image), 1.0);
    }
    let scale = max_side as f32 / longest as f32;
    let resized = imageops::resize(
        image,
        ((image.width() as f32 * scale).round() as u32).max(1),
        ((image.height() as f32 * scale).round() as u32).max(1),
        FilterType::Triangle,
    );
    (Cow::Owned(resized), scale)
}

pub struct NudityDetector {
    models: Arc<ModelStore>,
    settings: NuditySettings,
}

impl NudityDetector {
    pub fn new(models: Arc<ModelStore>, settings: NuditySettings) -> Self {
        Self { models, settings }
    }

    fn exposed_regions(
        model: &YoloModel,
        image: &RgbImage,
        mode: NudityMode,
        min_prob: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        let (input, scale) = limit_side(image, mode.max_side());
        let detections = model
            .predict(&input, min_prob)?
            .into_iter()
            .filter(|d| d.label.starts_with("EXPOSED_"))
            .map(|d| Detection {
                bbox: d.bbox.map(|v| v / scale),
                ..d
            })
            .collect();
        Ok(detections)
    }
}

impl Detector for NudityDetector {
    fn category(&self) -> Category {
        Category::Appearance
    }

    fn detect(&self, upload: &Upload, options: &DetectOptions) -> Result<Detected, DetectError> {
        let image = match image::load_from_memory(&upload.bytes) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                return Ok(Detected::new(Findings::Failure {
                    error: format!("Nudity detection failed: {err}"),
                }));
            }
        };

        let model = self.models.nudity()?;
        let raw = run_passes(&self.settings, |mode, min_prob| {
            Self::exposed_regions(&model, &image, mode, min_prob)
        })?;
        let report = build_report(&raw, self.settings.include_belly);

        let preview = if options.preview {
            let shown: Vec<Detection> = raw
                .into_iter()
                .filter(|d| self.settings.include_belly || !d.label.contains("BELLY"))
                .collect();
            Some(annotate::preview(&image, &shown)?)
        } else {
            None
        };
        Ok(Detected::new(Findings::Nudity(report)).with_preview(preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(label: &str, score: f32) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            score,
            bbox: [10.7, 20.2, 30.9, 40.0],
        }
    }

    #[test]
    fn grades_follow_score_bands() {
        assert_eq!(grade(0.71), ("HIGH", "CRITICAL"));
        assert_eq!(grade(0.7), ("MEDIUM", "HIGH"));
        assert_eq!(grade(0.5), ("LOW", "MEDIUM"));
    }

    #[test]
    fn unknown_labels_describe_themselves() {
        assert_eq!(describe("EXPOSED_FEET"), "Exposed feet");
        assert_eq!(describe("EXPOSED_KNEES"), "EXPOSED_KNEES");
    }

    #[test]
    fn empty_results_report_no_nudity() {
        let report = build_report(&[], false);
        assert!(!report.nudity_detected);
        assert_eq!(report.message, "No nudity detected in the image");
    }

    #[test]
    fn belly_is_filtered_unless_requested() {
        let raw = vec![region("EXPOSED_BELLY", 0.9)];
        let report = build_report(&raw, false);
        assert!(!report.nudity_detected);
        assert_eq!(report.total_regions, 0);
        assert_eq!(report.message, "No nudity detected");

        let report = build_report(&raw, true);
        assert_eq!(report.total_regions, 1);
    }

    #[test]
    fn regions_carry_percent_confidence_and_integer_boxes() {
        let report = build_report(&[region("EXPOSED_BREAST_F", 0.8765)], false);
        assert_eq!(report.message, "Detected 1 potential nudity regions");
        let json = serde_json::to_value(&report.regions[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "label": "EXPOSED_BREAST_F",
                "confidence": 87.7,
                "confidence_level": "HIGH",
                "risk_level": "CRITICAL",
                "box": [10, 20, 30, 40],
                "description": "Exposed female breast"
            })
        );
    }

    #[test]
    fn high_sensitivity_adds_a_lower_threshold_pass() {
        let settings = NuditySettings {
            mode: NudityMode::HighSensitivity,
            min_confidence: 0.5,
            include_belly: false,
        };
        let mut calls = Vec::new();
        let results = run_passes(&settings, |mode, threshold| {
            calls.push((mode, threshold));
            Ok(if calls.len() == 1 {
                vec![region("EXPOSED_FEET", 0.35)]
            } else {
                vec![region("EXPOSED_FEET", 0.35), region("EXPOSED_ARMPITS", 0.2)]
            })
        })
        .unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (NudityMode::Default, 0.3));
        assert_eq!(calls[1].0, NudityMode::Default);
        assert!((calls[1].1 - 0.18).abs() < 1e-6);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn default_and_fast_modes_run_once() {
        for mode in [NudityMode::Default, NudityMode::Fast] {
            let settings = NuditySettings {
                mode,
                ..NuditySettings::default()
            };
            let mut calls = 0;
            run_passes(&settings, |used, threshold| {
                calls += 1;
                assert_eq!(used, mode);
                assert_eq!(threshold, 0.4);
                Ok(Vec::new())
            })
            .unwrap();
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn modes_parse_from_config_strings() {
        assert_eq!("FAST".parse::<NudityMode>().unwrap(), NudityMode::Fast);
        assert_eq!(
            "high_sensitivity".parse::<NudityMode>().unwrap(),
            NudityMode::HighSensitivity
        );
        assert!("turbo".parse::<NudityMode>().is_err());
        assert_eq!(NudityMode::HighSensitivity.to_string(), "high_sensitivity");
    }

    #[test]
    fn large_images_are_downscaled() {
        let image = RgbImage::new(2666, 1000);
        let (resized, scale) = limit_side(&image, 1333);
        assert_eq!(resized.width(), 1333);
        assert!((scale - 0.5).abs() < 1e-6);

        let small = RgbImage::new(100, 50);
        let (same, scale) = limit_side(&small, 800);
        assert!(matches!(same, Cow::Borrowed(_)));
        assert_eq!(scale, 1.0);
    }
}
