//! A deterministic, non-semantic embedder (§9): projects a content hash
//! onto a fixed-width unit vector. Exists so the rest of the crate can
//! run, and its tests can assert exact behavior, without a real model
//! in the loop. Never mistake its output for a semantic representation.

use async_trait::async_trait;
use blake3::Hasher;

use super::Embedder;
use crate::error::Result;

pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut bytes = vec![0u8; self.dim * 4];
        reader.fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes(chunk.try_into().unwrap());
                (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
