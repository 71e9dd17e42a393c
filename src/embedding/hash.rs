//! 로컬 해시 임베딩 (feature hashing)
//!
//! 토큰과 인접 토큰 쌍을 SHA-256으로 차원에 사상하고 L2 정규화합니다.
//! 실행 환경과 무관하게 같은 텍스트는 같은 벡터가 됩니다.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let bigrams = tokens.windows(2).map(|w| format!("{} {}", w[0], w[1]));
        let features = tokens.iter().map(|t| t.to_string()).chain(bigrams);

        for feature in features {
            let digest = Sha256::digest(feature.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
