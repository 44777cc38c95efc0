use crate::model_config::ClassifierConfig;
use crate::onnx::{ModelError, build_session, require_files, softmax};
use ndarray::Array2;
use ort::inputs;
use ort::session::Session;
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

const MAX_TOKENS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Raw model label, e.g. `LABEL_1`.
    pub label: String,
    pub score: f32,
}

/// Sequence classifier over a HuggingFace tokenizer and an ONNX export.
pub struct TextClassifier {
    session: Session,
    tokenizer: Tokenizer,
    config: ClassifierConfig,
    uses_token_type_ids: bool,
}

impl TextClassifier {
    pub fn new(model_dir: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let config_path = model_dir.join("config.json");
        require_files(&[&tokenizer_path, &config_path])?;

        let config: ClassifierConfig = serde_json::from_reader(std::fs::File::open(config_path)?)?;
        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS.min(config.max_position_embeddings),
                ..Default::default()
            }))
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(None);

        let session = build_session(&model_dir.join("model.onnx"), intra_threads)?;
        let uses_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");
        debug!(labels = config.id2label.len(), uses_token_type_ids, "text classifier ready");

        Ok(Self {
            session,
            tokenizer,
            config,
            uses_token_type_ids,
        })
    }

    /// Top class of the softmaxed logits.
    pub fn classify(&self, text: &str) -> Result<Classification, ModelError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        let len = encoding.get_ids().len();
        let to_row = |values: &[u32]| {
            Array2::from_shape_vec((1, len), values.iter().map(|&v| v as i64).collect())
                .map_err(|_| ModelError::InputShapeMismatch)
        };
        let ids = to_row(encoding.get_ids())?;
        let mask = to_row(encoding.get_attention_mask())?;
        let type_ids = to_row(encoding.get_type_ids())?;

        let outputs = if self.uses_token_type_ids {
            self.session.run(inputs![
                "input_ids" => ids.view(),
                "attention_mask" => mask.view(),
                "token_type_ids" => type_ids.view()
            ]?)?
        } else {
            self.session.run(inputs![
                "input_ids" => ids.view(),
                "attention_mask" => mask.view()
            ]?)?
        };

        let output_name = self.session.outputs[0].name.clone();
        let logits = outputs
            .get(&output_name)
            .ok_or(ModelError::OutputFormatUnexpected)?
            .try_extract_tensor::<f32>()?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        if logits.is_empty() {
            return Err(ModelError::OutputFormatUnexpected);
        }

        let (class_id, score) = top_class(&softmax(&logits));
        Ok(Classification {
            label: self.config.label(class_id),
            score,
        })
    }
}

fn top_class(probabilities: &[f32]) -> (usize, f32) {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
}
