//! Retrieval - 임베딩 → top-K 검색 → 유사도 임계값 필터
//!
//! 유사도는 `1 - 코사인 거리`이며, 인덱스가 돌려준 순서를 그대로 유지합니다.

use serde::Serialize;

use crate::error::Result;
use crate::index::{Document, DocumentIndex, MetadataFilter};

/// 기본 top-K
pub const DEFAULT_TOP_K: usize = 5;

/// 기본 유사도 임계값
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// 임계값을 통과한 검색 결과 하나
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub document: Document,
    pub distance: f32,
    pub similarity: f32,
}

/// 검색 결과 (거리 오름차순)
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedDocument>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.hits.iter().map(|h| &h.document)
    }

    pub fn distances(&self) -> Vec<f32> {
        self.hits.iter().map(|h| h.distance).collect()
    }
}

/// 유사도 필터 검색기
#[derive(Clone)]
pub struct Retriever {
    documents: DocumentIndex,
    threshold: f32,
}

impl Retriever {
    pub fn new(documents: DocumentIndex, threshold: f32) -> Self {
        Self {
            documents,
            threshold,
        }
    }

    pub fn documents(&self) -> &DocumentIndex {
        &self.documents
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 질의 텍스트로 검색
    ///
    /// 컬렉션이 없으면 빈 컬렉션을 만들고 빈 결과를 반환합니다.
    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        let index = self.documents.index();
        if !index.has_collection(collection).await? {
            self.documents.create_collection(collection, false).await?;
            return Ok(RetrievalResult::default());
        }

        let raw = self.documents.query(collection, query, top_k, filter).await?;
        let fetched = raw.len();

        let hits: Vec<RetrievedDocument> = raw
            .into_iter()
            .filter_map(|hit| {
                let similarity = 1.0 - hit.distance;
                (similarity >= self.threshold).then_some(RetrievedDocument {
                    document: hit.document,
                    distance: hit.distance,
                    similarity,
                })
            })
            .collect();

        tracing::info!(
            "Retrieved {} documents for query (filtered from {})",
            hits.len(),
            fetched
        );
        Ok(RetrievalResult { hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::index::{Metadata, MemoryIndex};
    use std::sync::Arc;

    async fn documents() -> DocumentIndex {
        let documents =
            DocumentIndex::new(Arc::new(HashEmbedding::new(64)), Arc::new(MemoryIndex::new()));
        let meta = |d: &str| -> Metadata { [("dataset".to_string(), d.to_string())].into() };
        documents
            .add_documents(
                "gov",
                vec![
                    "state: Kerala | rainfall: 3000".to_string(),
                    "state: Kerala | rainfall: 2800 | year: 2020".to_string(),
                    "crop: wheat | price: 2015".to_string(),
                ],
                Some(vec![meta("rainfall"), meta("rainfall"), meta("prices")]),
                None,
            )
            .await
            .unwrap();
        documents
    }

    async fn retriever(threshold: f32) -> Retriever {
        Retriever::new(documents().await, threshold)
    }

    fn ids(result: &RetrievalResult) -> Vec<String> {
        result.hits.iter().map(|h| h.document.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_missing_collection_is_created_empty() {
        let r = retriever(0.0).await;
        let result = r.retrieve("anything", "never_created", 5, None).await.unwrap();
        assert!(result.is_empty());
        assert!(r.documents().index().has_collection("never_created").await.unwrap());
    }

    #[tokio::test]
    async fn test_results_keep_distance_order() {
        let r = retriever(-1.0).await;
        let result = r.retrieve("state: Kerala | rainfall: 3000", "gov", 3, None).await.unwrap();

        assert_eq!(result.len(), 3);
        let distances = result.distances();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert!((result.hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_threshold_is_monotonic() {
        let docs = documents().await;
        let query = "state: Kerala | rainfall: 3000";

        let mut previous: Option<Vec<String>> = None;
        for threshold in [-1.0, 0.0, 0.3, 0.6, 0.9, 0.999] {
            let result = Retriever::new(docs.clone(), threshold)
                .retrieve(query, "gov", 3, None)
                .await
                .unwrap();
            assert!(result.hits.iter().all(|h| h.similarity >= threshold));

            // 임계값이 높을수록 이전 결과의 순서 보존 부분열
            let current = ids(&result);
            if let Some(previous) = &previous {
                let mut rest = previous.iter();
                assert!(current.iter().all(|id| rest.any(|p| p == id)));
            }
            previous = Some(current);
        }

        // 동일 문장은 가장 높은 임계값에서도 남음
        assert_eq!(previous.unwrap(), vec!["doc_0".to_string()]);
    }

    #[tokio::test]
    async fn test_metadata_filter_applies() {
        let r = retriever(-1.0).await;
        let filter: MetadataFilter = [("dataset".to_string(), "prices".to_string())].into();
        let result = r.retrieve("wheat", "gov", 5, Some(&filter)).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].document.dataset(), Some("prices"));
    }
}
