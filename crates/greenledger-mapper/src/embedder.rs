//! Embedding-based similarity via ONNX Runtime.
//!
//! Uses a sentence-transformers model (all-MiniLM-L6-v2 by default). The
//! model directory must contain `model.onnx` and `tokenizer.json`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use greenledger_core::{ExtractedDataPoint, RequirementId, RequirementNode};
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::{info, warn};

use crate::scorer::{SimilarityScorer, cosine_sim};

const MAX_TOKENS: usize = 256;

/// Mean-pooled, L2-normalized sentence embeddings.
pub struct Embedder {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

impl Embedder {
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            session,
            tokenizer,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("model returned no embedding"))
    }

    pub fn embed_batch(&mut self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let batch = texts.len();
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut ids = vec![0i64; batch * seq_len];
        let mut mask = vec![0i64; batch * seq_len];
        let mut types = vec![0i64; batch * seq_len];
        for (row, encoding) in encodings.iter().enumerate() {
            let base = row * seq_len;
            for (col, &v) in encoding.get_ids().iter().enumerate() {
                ids[base + col] = i64::from(v);
            }
            for (col, &v) in encoding.get_attention_mask().iter().enumerate() {
                mask[base + col] = i64::from(v);
            }
            for (col, &v) in encoding.get_type_ids().iter().enumerate() {
                types[base + col] = i64::from(v);
            }
        }

        let shape = [batch as i64, seq_len as i64];
        let outputs = self.session.run(ort::inputs![
            "input_ids" => Tensor::from_array((shape, ids.into_boxed_slice()))?,
            "attention_mask" => Tensor::from_array((shape, mask.clone().into_boxed_slice()))?,
            "token_type_ids" => Tensor::from_array((shape, types.into_boxed_slice()))?,
        ])?;

        // [batch, tokens, dim]
        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        anyhow::ensure!(
            out_shape.len() == 3
                && out_shape[0] as usize == batch
                && out_shape[2] as usize == self.dim,
            "unexpected output shape {out_shape:?}"
        );
        let tokens = out_shape[1] as usize;

        Ok((0..batch)
            .map(|row| mean_pool(data, &mask[row * seq_len..], row, tokens, self.dim))
            .collect())
    }
}

fn mean_pool(data: &[f32], mask: &[i64], row: usize, tokens: usize, dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (token, &m) in mask.iter().take(tokens).enumerate() {
        if m == 0 {
            continue;
        }
        let offset = (row * tokens + token) * dim;
        for (d, p) in pooled.iter_mut().enumerate() {
            *p += data[offset + d];
        }
        count += 1.0;
    }
    if count > 0.0 {
        pooled.iter_mut().for_each(|p| *p /= count);
    }
    let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        pooled.iter_mut().for_each(|p| *p /= norm);
    }
    pooled
}

/// Cosine of two unit vectors, with anti-correlated text scored as
/// unrelated rather than half similar.
fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    cosine_sim(a, b).clamp(0.0, 1.0)
}

fn output_dim(output: &ValueType) -> Option<usize> {
    match output {
        ValueType::Tensor { shape, .. } => shape.last().and_then(|&d| (d > 0).then_some(d as usize)),
        _ => None,
    }
}

/// Cosine similarity between embedded data-point text and requirement text,
/// mapped from `[-1, 1]` onto `[0, 1]`.
///
/// Requirement embeddings are cached per `(id, taxonomy version)`.
pub struct EmbeddingScorer {
    embedder: Mutex<Embedder>,
    cache: Mutex<HashMap<(RequirementId, u32), Vec<f32>>>,
}

impl EmbeddingScorer {
    pub const VERSION: &'static str = "minilm-cosine-v2";

    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder: Mutex::new(embedder),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Embedder::load(model_dir)?))
    }

    fn requirement_vector(&self, requirement: &RequirementNode) -> anyhow::Result<Vec<f32>> {
        let key = (requirement.id.clone(), requirement.version);
        if let Some(v) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(v.clone());
        }
        let mut text = requirement.label.clone();
        if let Some(description) = &requirement.description {
            text.push_str(". ");
            text.push_str(description);
        }
        for keyword in &requirement.keywords {
            text.push_str(". ");
            text.push_str(keyword);
        }
        let vector = self
            .embedder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .embed(&text)?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, vector.clone());
        Ok(vector)
    }

    fn try_similarity(
        &self,
        point: &ExtractedDataPoint,
        requirement: &RequirementNode,
    ) -> anyhow::Result<f32> {
        let req = self.requirement_vector(requirement)?;
        let text = format!("{}. {}", point.label, point.raw_snippet);
        let dp = self
            .embedder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .embed(&text)?;
        Ok(similarity_score(&dp, &req))
    }
}

impl SimilarityScorer for EmbeddingScorer {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn similarity(&self, point: &ExtractedDataPoint, requirement: &RequirementNode) -> f32 {
        match self.try_similarity(point, requirement) {
            Ok(sim) => sim,
            Err(e) => {
                warn!(
                    data_point = %point.id,
                    requirement = %requirement.id,
                    error = %e,
                    "embedding failed, scoring as dissimilar"
                );
                0.0
            }
        }
    }
}
