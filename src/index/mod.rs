//! Vector Index - 컬렉션 단위 벡터 저장/검색
//!
//! - VectorIndex: 백엔드 트레이트 (코사인 거리, 거리 오름차순 결과)
//! - MemoryIndex: 메모리 brute-force 구현
//! - LanceVectorIndex: LanceDB 구현 (컬렉션 = 테이블)
//! - DocumentIndex: 임베딩 + 인덱스를 묶은 문서 추가 어댑터

mod documents;
mod lance;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use documents::{stable_document_id, DocumentIndex};
pub use lance::LanceVectorIndex;
pub use memory::MemoryIndex;

/// 문서 메타데이터 (최소한 `dataset` 키를 포함)
pub type Metadata = BTreeMap<String, String>;

/// 메타데이터 동등 조건 (모두 만족해야 통과)
pub type MetadataFilter = BTreeMap<String, String>;

// ============================================================================
// Types
// ============================================================================

/// 컬렉션에 저장되는 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    /// 출처 데이터셋 이름
    pub fn dataset(&self) -> Option<&str> {
        self.metadata.get("dataset").map(String::as_str)
    }
}

/// 저장용 엔트리 (문서 + 임베딩)
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// 검색 결과 (코사인 거리)
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document: Document,
    pub distance: f32,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 백엔드
///
/// 모든 컬렉션은 코사인 거리를 사용합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 컬렉션 생성 (이미 있으면 그대로 사용)
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// 컬렉션 삭제 (없으면 무시)
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// 엔트리 추가 (이미 있는 id는 건너뜀)
    ///
    /// 실제로 추가된 id 목록을 반환합니다. 컬렉션이 없으면 생성합니다.
    async fn add(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<Vec<String>>;

    /// 주어진 id 중 컬렉션에 이미 있는 것 (컬렉션이 없으면 빈 목록)
    async fn existing_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<String>>;

    /// top-K 검색 (거리 오름차순)
    ///
    /// 컬렉션이 없으면 빈 결과입니다.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>>;

    /// 문서 개수 (컬렉션이 없으면 0)
    async fn count(&self, collection: &str) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0)
///
/// 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 메타데이터가 필터 조건을 모두 만족하는지
pub fn matches_filter(metadata: &Metadata, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter().all(|(k, v)| metadata.get(k) == Some(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_matches_filter() {
        let metadata: Metadata = [("dataset".to_string(), "rainfall".to_string())].into();
        let filter: MetadataFilter = [("dataset".to_string(), "rainfall".to_string())].into();
        let other: MetadataFilter = [("dataset".to_string(), "crops".to_string())].into();

        assert!(matches_filter(&metadata, None));
        assert!(matches_filter(&metadata, Some(&filter)));
        assert!(!matches_filter(&metadata, Some(&other)));
    }
}
