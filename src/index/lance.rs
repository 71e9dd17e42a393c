//! LanceDB Vector Index - 컬렉션당 테이블 하나
//!
//! 메타데이터는 JSON 문자열 컬럼으로 저장합니다. 메타데이터 필터는
//! 벡터 검색 전에 `LIKE` 조건으로 후보를 좁히고(prefilter), 결과에서 다시
//! 정확히 비교합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use crate::error::{FusionError, Result};

use super::{matches_filter, Document, IndexEntry, IndexHit, Metadata, MetadataFilter, VectorIndex};

/// 메타데이터 필터 사용 시 추가로 가져올 배수 (LIKE 후보 중 정확 비교 탈락분)
const FILTER_OVERFETCH: usize = 4;

/// 기존 id 조회 시 IN 절 최대 크기
const ID_LOOKUP_CHUNK: usize = 256;

fn backend_err<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> FusionError + '_ {
    move |e| FusionError::IndexBackend(format!("{}: {}", context, e))
}

/// LanceDB 벡터 인덱스
pub struct LanceVectorIndex {
    db: Connection,
    dimension: usize,
}

impl LanceVectorIndex {
    /// LanceDB 디렉토리 열기
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| FusionError::InvalidInput("Invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(backend_err("Failed to connect to LanceDB"))?;

        Ok(Self { db, dimension })
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            return Err(FusionError::IndexBackend(format!(
                "Embedding for '{}' has dimension {}, expected {}",
                bad.document.id,
                bad.embedding.len(),
                self.dimension
            )));
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.document.id.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.document.text.as_str()).collect();
        let metadata = entries
            .iter()
            .map(|e| serde_json::to_string(&e.document.metadata))
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| FusionError::IndexBackend(format!("Failed to create vector array: {}", e)))?;

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| FusionError::IndexBackend(format!("Failed to create RecordBatch: {}", e)))
    }

    async fn open_table(&self, name: &str) -> Result<Option<lancedb::table::Table>> {
        if !self.has_collection(name).await? {
            return Ok(None);
        }
        self.db
            .open_table(name)
            .execute()
            .await
            .map(Some)
            .map_err(backend_err("Failed to open table"))
    }

    /// 테이블에 이미 저장된 id 목록
    async fn lookup_ids(
        &self,
        table: &lancedb::table::Table,
        ids: &[&str],
    ) -> Result<Vec<String>> {
        let mut found = Vec::new();

        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let list = chunk
                .iter()
                .map(|id| format!("'{}'", id.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");

            let batches: Vec<RecordBatch> = table
                .query()
                .only_if(format!("id IN ({})", list))
                .execute()
                .await
                .map_err(backend_err("Failed to look up ids"))?
                .try_collect()
                .await
                .map_err(backend_err("Failed to read id lookup"))?;

            for batch in batches {
                let column = string_column(&batch, "id")?;
                found.extend((0..batch.num_rows()).map(|i| column.value(i).to_string()));
            }
        }

        Ok(found)
    }
}

/// 메타데이터 필터 → `metadata` 컬럼 LIKE 조건
///
/// 각 `key=value`를 JSON 조각 `"key":"value"`로 만들고, LIKE 특수문자와
/// 따옴표, 백슬래시는 한 글자 와일드카드 `_`로 바꿉니다. 조건은 항상 정확한
/// 일치의 상위 집합이므로 결과에는 `matches_filter`를 다시 적용해야 합니다.
fn filter_predicate(filter: &MetadataFilter) -> Result<Option<String>> {
    let mut clauses = Vec::with_capacity(filter.len());

    for (key, value) in filter {
        let fragment = format!(
            "{}:{}",
            serde_json::to_string(key)?,
            serde_json::to_string(value)?
        );
        let pattern: String = fragment
            .chars()
            .map(|c| match c {
                '%' | '_' | '\\' | '\'' => '_',
                c => c,
            })
            .collect();
        clauses.push(format!("metadata LIKE '%{}%'", pattern));
    }

    Ok((!clauses.is_empty()).then(|| clauses.join(" AND ")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| FusionError::IndexBackend(format!("Missing {} column", name)))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn create_collection(&self, name: &str) -> Result<()> {
        if self.has_collection(name).await? {
            return Ok(());
        }

        self.db
            .create_empty_table(name, self.schema())
            .execute()
            .await
            .map_err(backend_err("Failed to create table"))?;

        tracing::info!("Created collection '{}'", name);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.has_collection(name).await? {
            return Ok(());
        }

        self.db
            .drop_table(name)
            .await
            .map_err(backend_err("Failed to drop table"))?;

        tracing::info!("Deleted collection '{}'", name);
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.list_collections().await?.iter().any(|n| n == name))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.db
            .table_names()
            .execute()
            .await
            .map_err(backend_err("Failed to list tables"))
    }

    async fn add(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<Vec<String>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        self.create_collection(collection).await?;
        let table = self.open_table(collection).await?.ok_or_else(|| {
            FusionError::IndexBackend(format!("Collection '{}' disappeared", collection))
        })?;

        let ids: Vec<&str> = entries.iter().map(|e| e.document.id.as_str()).collect();
        let mut seen: std::collections::HashSet<String> =
            self.lookup_ids(&table, &ids).await?.into_iter().collect();

        let fresh: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|e| seen.insert(e.document.id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.entries_to_batch(&fresh)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(batches)
            .execute()
            .await
            .map_err(backend_err("Failed to add vectors to table"))?;

        Ok(fresh.into_iter().map(|e| e.document.id).collect())
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<String>> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.lookup_ids(&table, &ids).await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let predicate = match filter {
            Some(f) => filter_predicate(f)?,
            None => None,
        };
        let fetch = match predicate {
            Some(_) => top_k.saturating_mul(FILTER_OVERFETCH),
            None => top_k,
        };

        let mut search = table
            .vector_search(embedding.to_vec())
            .map_err(backend_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(fetch);
        if let Some(predicate) = predicate {
            search = search.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .map_err(backend_err("Failed to execute vector search"))?
            .try_collect()
            .await
            .map_err(backend_err("Failed to read search results"))?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let texts = string_column(&batch, "text")?;
            let metadata_json = string_column(&batch, "metadata")?;
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| FusionError::IndexBackend("Missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata = serde_json::from_str(metadata_json.value(i))?;
                if !matches_filter(&metadata, filter) {
                    continue;
                }
                hits.push(IndexHit {
                    document: Document {
                        id: ids.value(i).to_string(),
                        text: texts.value(i).to_string(),
                        metadata,
                    },
                    distance: distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(backend_err("Failed to count rows"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn entry(id: &str, dataset: &str, embedding: [f32; DIM]) -> IndexEntry {
        IndexEntry {
            document: Document {
                id: id.to_string(),
                text: format!("row {}", id),
                metadata: [("dataset".to_string(), dataset.to_string())].into(),
            },
            embedding: embedding.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_lance_collection_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("vectors.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(index.count("docs").await.unwrap(), 0);
        index.create_collection("docs").await.unwrap();
        assert!(index.has_collection("docs").await.unwrap());

        let inserted = index
            .add(
                "docs",
                vec![entry("a", "x", [1.0, 0.0, 0.0, 0.0]), entry("b", "y", [0.0, 1.0, 0.0, 0.0])],
            )
            .await
            .unwrap();
        assert_eq!(inserted.len(), 2);

        // 같은 id는 다시 추가되지 않음
        let again = index
            .add("docs", vec![entry("a", "x", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(index.count("docs").await.unwrap(), 2);

        index.delete_collection("docs").await.unwrap();
        assert!(!index.has_collection("docs").await.unwrap());
        index.delete_collection("docs").await.unwrap();
    }

    #[tokio::test]
    async fn test_lance_search_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("search.lance"), DIM)
            .await
            .unwrap();

        index
            .add(
                "docs",
                vec![
                    entry("a", "x", [1.0, 0.0, 0.0, 0.0]),
                    entry("b", "y", [0.9, 0.1, 0.0, 0.0]),
                    entry("c", "y", [0.0, 0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query("docs", &[1.0, 0.0, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "a");
        assert!(hits[0].distance <= hits[1].distance);

        let filter: MetadataFilter = [("dataset".to_string(), "y".to_string())].into();
        let hits = index
            .query("docs", &[1.0, 0.0, 0.0, 0.0], 1, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "b");
    }

    #[test]
    fn test_filter_predicate_escapes() {
        let filter: MetadataFilter = [
            ("dataset".to_string(), "it's 50%_off".to_string()),
            ("state".to_string(), "A".to_string()),
        ]
        .into();

        assert_eq!(
            filter_predicate(&filter).unwrap().unwrap(),
            r#"metadata LIKE '%"dataset":"it_s 50__off"%' AND metadata LIKE '%"state":"A"%'"#
        );
        assert!(filter_predicate(&MetadataFilter::new()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lance_filter_applies_before_ranking() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("prefilter.lance"), DIM)
            .await
            .unwrap();

        // 질의 벡터 근처는 모두 dataset=a, 일치하는 b 문서는 멀리 있음
        let mut entries: Vec<IndexEntry> = (0..30)
            .map(|i| entry(&format!("a{}", i), "a", [1.0, 0.001 * i as f32, 0.0, 0.0]))
            .collect();
        entries.push(entry("b0", "b", [0.0, 1.0, 0.0, 0.0]));
        entries.push(entry("b1", "b", [0.1, 0.9, 0.0, 0.0]));
        entries.push(entry("bx", "bx", [0.0, 1.0, 0.0, 0.0]));
        entries.push(entry("q", "it's 50%", [0.0, 0.0, 1.0, 0.0]));
        index.add("docs", entries).await.unwrap();

        let filter: MetadataFilter = [("dataset".to_string(), "b".to_string())].into();
        let hits = index
            .query("docs", &[1.0, 0.0, 0.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b0"]);

        let filter: MetadataFilter = [("dataset".to_string(), "it's 50%".to_string())].into();
        let hits = index
            .query("docs", &[1.0, 0.0, 0.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "q");
    }

    #[tokio::test]
    async fn test_lance_existing_ids() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("ids.lance"), DIM)
            .await
            .unwrap();

        let ids = vec!["a".to_string(), "z".to_string()];
        assert!(index.existing_ids("docs", &ids).await.unwrap().is_empty());

        index
            .add("docs", vec![entry("a", "x", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.existing_ids("docs", &ids).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_lance_rejects_wrong_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("dim.lance"), DIM)
            .await
            .unwrap();

        let mut bad = entry("a", "x", [1.0, 0.0, 0.0, 0.0]);
        bad.embedding.push(0.5);
        assert!(matches!(
            index.add("docs", vec![bad]).await,
            Err(FusionError::IndexBackend(_))
        ));
    }
}
