//! 문서 인덱스 어댑터 - 임베딩 후 컬렉션에 추가
//!
//! 같은 컬렉션에 대한 id 생성과 삽입은 컬렉션별 async mutex로 직렬화됩니다.
//! 임베딩 호출은 잠금 밖에서 수행합니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{FusionError, Result};

use super::{Document, IndexEntry, IndexHit, Metadata, MetadataFilter, VectorIndex};

/// 데이터셋 행 문서의 내용 기반 id (`row_<16 hex>`)
///
/// 같은 데이터셋을 다시 색인해도 같은 id가 만들어집니다.
pub fn stable_document_id(dataset: &str, row_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dataset.as_bytes());
    hasher.update([0u8]);
    hasher.update(row_index.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("row_{}", hex)
}

/// 임베딩 프로바이더 + 벡터 인덱스
#[derive(Clone)]
pub struct DocumentIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DocumentIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            locks: Arc::default(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    fn collection_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// 컬렉션 생성
    ///
    /// `recreate`면 먼저 삭제합니다 (없어도 에러 아님).
    pub async fn create_collection(&self, name: &str, recreate: bool) -> Result<()> {
        let lock = self.collection_lock(name);
        let _guard = lock.lock().await;

        if recreate {
            if let Err(e) = self.index.delete_collection(name).await {
                tracing::warn!("Failed to delete collection '{}' before recreate: {}", name, e);
            }
        }

        self.index.create_collection(name).await?;
        tracing::info!("Collection '{}' ready (recreate: {})", name, recreate);
        Ok(())
    }

    /// 문서 추가
    ///
    /// 배치 임베딩 1회 후 삽입합니다. id가 없으면 현재 개수 n부터
    /// `doc_{n}, doc_{n+1}, ...`를 부여합니다. 실제로 추가된 id를 반환합니다.
    pub async fn add_documents(
        &self,
        collection: &str,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        if let Some(m) = &metadatas {
            if m.len() != texts.len() {
                return Err(FusionError::InvalidInput(format!(
                    "{} metadatas for {} documents",
                    m.len(),
                    texts.len()
                )));
            }
        }
        if let Some(ids) = &ids {
            if ids.len() != texts.len() {
                return Err(FusionError::InvalidInput(format!(
                    "{} ids for {} documents",
                    ids.len(),
                    texts.len()
                )));
            }
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(FusionError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        let ids = match ids {
            Some(ids) => ids,
            None => self.synthesize_ids(collection, texts.len()).await?,
        };
        let metadatas = metadatas.unwrap_or_else(|| vec![Metadata::new(); texts.len()]);

        let entries: Vec<IndexEntry> = texts
            .into_iter()
            .zip(metadatas)
            .zip(ids)
            .zip(embeddings)
            .map(|(((text, metadata), id), embedding)| IndexEntry {
                document: Document { id, text, metadata },
                embedding,
            })
            .collect();

        let total = entries.len();
        let inserted = self.index.add(collection, entries).await?;
        tracing::info!(
            "Added {} documents to '{}' ({} already present)",
            inserted.len(),
            collection,
            total - inserted.len()
        );
        Ok(inserted)
    }

    /// `doc_{n}` id 생성
    ///
    /// n은 현재 문서 개수부터 시작하며, 이미 쓰인 id는 건너뜁니다.
    /// 컬렉션 잠금을 잡은 상태에서 호출해야 합니다.
    async fn synthesize_ids(&self, collection: &str, count: usize) -> Result<Vec<String>> {
        let mut next = self.index.count(collection).await?;
        let mut ids = Vec::with_capacity(count);

        while ids.len() < count {
            let candidates: Vec<String> = (next..next + (count - ids.len()))
                .map(|n| format!("doc_{}", n))
                .collect();
            next += candidates.len();

            let taken = self.index.existing_ids(collection, &candidates).await?;
            if !taken.is_empty() {
                tracing::warn!(
                    "Skipping ids already present in '{}': {:?}",
                    collection,
                    taken
                );
            }
            ids.extend(candidates.into_iter().filter(|id| !taken.contains(id)));
        }

        Ok(ids)
    }

    /// 텍스트 질의 (임베딩 1회 후 top-K)
    pub async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>> {
        let embedding = self.embedder.embed(text).await?;
        self.index.query(collection, &embedding, top_k, filter).await
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        self.index.count(collection).await
    }
}
