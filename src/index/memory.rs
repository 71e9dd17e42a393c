//! 메모리 벡터 인덱스 (brute-force 코사인)

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

use super::{cosine_similarity, matches_filter, IndexEntry, IndexHit, MetadataFilter, VectorIndex};

/// 프로세스 메모리에만 존재하는 인덱스
#[derive(Debug, Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Vec<IndexEntry>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn add(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<Vec<String>> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        let mut existing: HashSet<String> =
            stored.iter().map(|e| e.document.id.clone()).collect();

        let mut inserted = Vec::new();
        for entry in entries {
            if existing.insert(entry.document.id.clone()) {
                inserted.push(entry.document.id.clone());
                stored.push(entry);
            }
        }

        Ok(inserted)
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let present: HashSet<&str> = stored.iter().map(|e| e.document.id.as_str()).collect();
        Ok(ids
            .iter()
            .filter(|id| present.contains(id.as_str()))
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>> {
        let collections = self.collections.read().await;
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<IndexHit> = stored
            .iter()
            .filter(|e| matches_filter(&e.document.metadata, filter))
            .map(|e| IndexHit {
                document: e.document.clone(),
                distance: 1.0 - cosine_similarity(embedding, &e.embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len))
    }
}
