use ort::error::Error as OrtError;
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use std::path::Path;
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] OrtError),
    #[error("Image processing error: {0}")]
    ImageProcessing(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Input tensor shape mismatch")]
    InputShapeMismatch,
    #[error("Model output format unexpected")]
    OutputFormatUnexpected,
    #[error("Invalid path for model files: {0}")]
    InvalidPath(String),
}

/// Fails with `InvalidPath` when any of `files` is missing.
pub fn require_files<P: AsRef<Path>>(files: &[P]) -> Result<(), ModelError> {
    for path in files {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::InvalidPath(format!(
                "Model file not found: {:?}",
                path
            )));
        }
    }
    Ok(())
}

pub fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session, ModelError> {
    require_files(&[model_path])?;
    info!(path = ?model_path, intra_threads, "loading ONNX model");
    let session = SessionBuilder::new()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_file(model_path)?;
    Ok(session)
}

pub fn softmax(data: &[f32]) -> Vec<f32> {
    let max_val = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = data.iter().map(|&x| (x - max_val).exp()).collect();
    let sum_exps: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum_exps).collect()
}
