//! Fingerprint generation: text in, fixed-length vector out
//!
//! Two generators are provided:
//! - [`FastEmbedder`] runs a local sentence-embedding model through fastembed
//!   (no API keys). The model needs `&mut` access for inference, so calls are
//!   serialized behind a mutex and executed on the blocking thread pool.
//! - [`HashEmbedder`] uses signed feature hashing over words and character
//!   trigrams. It is stateless, fully parallel and needs no model download.
//!
//! Both are deterministic: the same text always yields a bit-identical vector.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};

/// A generator of fixed-length text fingerprints
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Blank text is rejected with `InvalidInput`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, `batch_size` at a time, preserving input order.
    ///
    /// Results are identical to calling [`Embedder::embed`] on each text.
    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of every vector this generator produces
    fn dimensions(&self) -> usize;

    /// Model identifier, for logs and stats
    fn model_name(&self) -> &str;
}

/// Reject empty or whitespace-only text
pub fn ensure_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::invalid_input("Text must not be empty"));
    }
    Ok(())
}

/// Check that a fingerprint is non-empty, finite and (optionally) of the expected size
pub fn validate_fingerprint(fingerprint: &[f32], expected_dim: Option<usize>) -> bool {
    if fingerprint.is_empty() {
        return false;
    }
    if expected_dim.is_some_and(|dim| fingerprint.len() != dim) {
        return false;
    }
    fingerprint.iter().all(|v| v.is_finite())
}

/// Scale a fingerprint to unit length. A zero vector is returned unchanged.
pub fn normalize(fingerprint: &[f32]) -> Vec<f32> {
    let norm = fingerprint
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return fingerprint.to_vec();
    }
    fingerprint
        .iter()
        .map(|v| (f64::from(*v) / norm) as f32)
        .collect()
}

/// Turn a raw model output into a usable fingerprint or an `Embedding` error
fn check_output(fingerprint: Vec<f32>, dimensions: usize) -> Result<Vec<f32>> {
    if !validate_fingerprint(&fingerprint, None) {
        return Err(Error::embedding("Model returned an empty or non-finite vector"));
    }
    if fingerprint.len() != dimensions {
        return Err(Error::embedding(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimensions,
            fingerprint.len()
        )));
    }
    if fingerprint.iter().all(|v| *v == 0.0) {
        return Err(Error::embedding("Model returned a zero vector"));
    }
    Ok(fingerprint)
}

/// Map a configured model name to a fastembed model and its output size
fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name {
        "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        _ => Err(Error::config(format!("Unsupported embedding model: {}", name))),
    }
}

/// Output size of a supported model, `None` for unknown names
pub fn model_dimensions(name: &str) -> Option<usize> {
    resolve_model(name).ok().map(|(_, dimensions)| dimensions)
}

/// Embedding service backed by a local fastembed model
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedder {
    /// Load the configured model. Downloads to ~/.cache/fastembed on first use.
    pub fn new(config: &Config) -> Result<Self> {
        let (kind, dimensions) = resolve_model(&config.embedding_model)?;
        if dimensions != config.embedding_dimensions {
            return Err(Error::config(format!(
                "{} produces {}-dimensional vectors but embedding_dimensions is {}",
                config.embedding_model, dimensions, config.embedding_dimensions
            )));
        }

        let model = TextEmbedding::try_new(
            InitOptions::new(kind).with_show_download_progress(true),
        )
        .map_err(|e| Error::embedding(format!("Failed to load embedding model: {}", e)))?;

        tracing::info!(
            model = %config.embedding_model,
            dimensions = config.embedding_dimensions,
            "Loaded embedding model"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        })
    }

    /// Embed a chunk under one lock acquisition. Texts go through the model
    /// one at a time, so output is bit-identical to single calls.
    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let expected = texts.len();

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut guard = model.blocking_lock();
            let mut embeddings = Vec::with_capacity(texts.len());
            for text in texts {
                embeddings.extend(guard.embed(vec![text], Some(1))?);
            }
            Ok::<_, anyhow::Error>(embeddings)
        })
        .await
        .map_err(|e| Error::embedding(format!("Embedding task failed: {}", e)))?
        .map_err(|e| Error::embedding(format!("Embedding failed: {}", e)))?;

        if embeddings.len() != expected {
            return Err(Error::embedding(format!(
                "Model returned {} embeddings for {} texts",
                embeddings.len(),
                expected
            )));
        }

        embeddings
            .into_iter()
            .map(|e| check_output(e, self.dimensions))
            .collect()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_text(text)?;

        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            ensure_text(text)?;
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            embeddings.extend(self.run(chunk.to_vec()).await?);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    /// Synchronous core shared by `embed` and `embed_batch`
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        ensure_text(text)?;

        let lowered = text.trim().to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut vector = vec![0.0f32; self.dimensions];
        if tokens.is_empty() {
            self.accumulate(&mut vector, &lowered, 1.0);
        }
        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);

            let padded: Vec<char> = format!("#{}#", token).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut vector, &gram, 0.5);
            }
        }

        let normalized = normalize(&vector);
        if normalized.iter().all(|v| *v == 0.0) {
            // Features cancelled out exactly; fall back to the whole text.
            let mut vector = vec![0.0f32; self.dimensions];
            self.accumulate(&mut vector, &lowered, 1.0);
            return Ok(normalize(&vector));
        }
        Ok(normalized)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }

    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            for text in chunk {
                embeddings.push(self.embed_text(text)?);
            }
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn hash_embedding_is_deterministic() {
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed("Machine learning is a branch of AI").await.unwrap();
        let b = embedder.embed("Machine learning is a branch of AI").await.unwrap();

        assert_eq!(a.len(), 384);
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn batch_matches_individual_calls() {
        let embedder = HashEmbedder::new(64);
        let inputs = texts(&["alpha", "beta gamma", "delta", "alpha", "epsilon zeta eta"]);

        for batch_size in [1, 2, 3, 32] {
            let batch = embedder.embed_batch(&inputs, batch_size).await.unwrap();
            assert_eq!(batch.len(), inputs.len());
            for (text, vector) in inputs.iter().zip(&batch) {
                assert_eq!(&embedder.embed(text).await.unwrap(), vector);
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let embedder = HashEmbedder::new(16);
        assert!(embedder.embed_batch(&[], 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_invalid_input() {
        let embedder = HashEmbedder::new(16);
        for blank in ["", "   ", "\n\t"] {
            let err = assert_err!(embedder.embed(blank).await);
            assert!(err.is_invalid_input());
        }

        let err = assert_err!(embedder.embed_batch(&texts(&["ok", " "]), 4).await);
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn punctuation_only_text_is_not_a_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let vector = embedder.embed("?!").await.unwrap();
        assert!(vector.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn validate_rejects_bad_vectors() {
        assert!(validate_fingerprint(&[0.1, 0.2], Some(2)));
        assert!(!validate_fingerprint(&[], None));
        assert!(!validate_fingerprint(&[0.1, 0.2], Some(3)));
        assert!(!validate_fingerprint(&[f32::NAN, 0.2], None));
    }

    #[test]
    fn check_output_rejects_zero_and_wrong_size() {
        assert!(check_output(vec![0.0; 4], 4).unwrap_err().is_embedding());
        assert!(check_output(vec![1.0; 3], 4).unwrap_err().is_embedding());
        assert!(check_output(vec![1.0; 4], 4).is_ok());
    }

    #[test]
    fn unknown_model_is_config_error() {
        assert!(matches!(resolve_model("word2vec"), Err(Error::Config(_))));
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(model_dimensions("bge-base-en-v1.5"), Some(768));
        assert_eq!(model_dimensions("word2vec"), None);
    }

    #[test]
    fn dimension_mismatch_fails_before_loading_the_model() {
        let config = Config {
            embedding_model: "bge-base-en-v1.5".to_string(),
            ..Config::default()
        };
        assert!(matches!(FastEmbedder::new(&config), Err(Error::Config(_))));
    }
}
