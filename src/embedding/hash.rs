use super::{EmbeddingClient, EmbeddingError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic feature-hashing embedder.
///
/// Each lowercase word is hashed into a signed bucket and the bag of buckets is L2-normalized.
/// Texts sharing vocabulary land close together, which is enough for offline use and tests.
/// Text without alphanumeric words falls back to hashing its non-whitespace characters.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a hashing embedder producing vectors of `dimension` entries.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            tokens = text
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(String::from)
                .collect();
        }

        let mut embedding = vec![0.0_f32; self.dimension];
        for token in &tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm == 0.0 {
            return Err(EmbeddingError::InvalidResponse(
                "hashed features cancelled to a zero vector".into(),
            ));
        }
        for value in &mut embedding {
            *value /= norm;
        }

        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::Configuration(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        tracing::debug!(count = texts.len(), dimension = self.dimension, "Hashing embeddings");
        texts.iter().map(|text| self.encode(text)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "hash-v1"
    }
}
