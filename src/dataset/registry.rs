//! Dataset Registry - 이름으로 데이터셋을 관리하는 공유 핸들
//!
//! 전역 상태가 아니라 명시적으로 소유/주입되는 객체입니다.
//! 동시 등록 중인 이름을 읽으면 이전 버전 또는 새 버전 중 하나를 보게 되며,
//! 여러 호출에 걸친 원자적 스냅샷은 보장하지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{FusionError, Result};
use crate::store::DatasetStore;

use super::{Dataset, DatasetMetadata};

/// 등록 시 함께 전달하는 정보
#[derive(Debug, Clone, Default)]
pub struct DatasetInfo {
    pub description: String,
    pub key_columns: Vec<String>,
    pub time_column: Option<String>,
}

impl DatasetInfo {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_key_columns(mut self, columns: &[&str]) -> Self {
        self.key_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }
}

#[derive(Debug)]
struct Entry {
    data: Arc<Dataset>,
    metadata: DatasetMetadata,
}

/// 데이터셋 레지스트리
///
/// 복제 비용이 낮은 핸들입니다 (내부는 `Arc<RwLock<..>>`).
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    store: Option<Arc<DatasetStore>>,
}

impl DatasetRegistry {
    /// 메모리 전용 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// SQLite 저장소에 best-effort로 기록하는 레지스트리
    pub fn with_store(store: Arc<DatasetStore>) -> Self {
        Self {
            entries: Arc::default(),
            store: Some(store),
        }
    }

    pub fn store(&self) -> Option<&Arc<DatasetStore>> {
        self.store.as_ref()
    }

    /// 데이터셋 등록 (같은 이름은 전체 교체)
    ///
    /// 메타데이터는 이 시점에 동기적으로 계산됩니다.
    /// 저장소 기록 실패는 경고만 남기고 등록은 성공합니다.
    pub fn register(&self, name: &str, data: Dataset, info: DatasetInfo) -> DatasetMetadata {
        let metadata = DatasetMetadata::snapshot(name, &data, &info);

        if let Some(store) = &self.store {
            if let Err(e) = store.save_dataset(&metadata, &data) {
                tracing::warn!("Failed to persist dataset '{}': {}", name, e);
            }
        }

        self.insert(Arc::new(data), metadata.clone());

        tracing::info!(
            "Registered dataset '{}' with {} rows",
            name,
            metadata.row_count
        );
        metadata
    }

    fn insert(&self, data: Arc<Dataset>, metadata: DatasetMetadata) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(metadata.name.clone(), Entry { data, metadata });
    }

    /// 이름으로 조회 (없으면 None)
    pub fn get(&self, name: &str) -> Option<Arc<Dataset>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).map(|e| Arc::clone(&e.data))
    }

    /// 없으면 `UnknownDataset` 에러
    pub fn require(&self, name: &str) -> Result<Arc<Dataset>> {
        self.get(name)
            .ok_or_else(|| FusionError::UnknownDataset(name.to_string()))
    }

    pub fn metadata(&self, name: &str) -> Option<DatasetMetadata> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).map(|e| e.metadata.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(name)
    }

    /// 등록된 데이터셋 메타데이터 목록 (이름순)
    pub fn list(&self) -> Vec<DatasetMetadata> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<DatasetMetadata> = entries.values().map(|e| e.metadata.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 저장소에 남아있는 데이터셋을 메모리로 복원
    pub fn load_from_store(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let loaded = store.load_datasets()?;
        let count = loaded.len();

        for (metadata, data) in loaded {
            self.insert(Arc::new(data), metadata);
        }

        tracing::info!("Restored {} datasets from {:?}", count, store.db_path());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::{dataset, rainfall};
    use crate::dataset::ColumnType;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_get() {
        let registry = DatasetRegistry::new();
        let meta = registry.register(
            "rainfall",
            rainfall(),
            DatasetInfo::new("IMD rainfall")
                .with_key_columns(&["state", "year"])
                .with_time_column("year"),
        );

        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.column_count, 3);
        assert_eq!(meta.dtypes["mm"], ColumnType::Integer);
        assert_eq!(meta.time_column.as_deref(), Some("year"));

        let ds = registry.get("rainfall").unwrap();
        assert_eq!(ds.num_rows(), 2);
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let registry = DatasetRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.require("missing"),
            Err(FusionError::UnknownDataset(_))
        ));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = DatasetRegistry::new();
        registry.register("x", rainfall(), DatasetInfo::new("first"));
        registry.register(
            "x",
            dataset(&["k"], vec![vec![1.into()]]),
            DatasetInfo::new("second"),
        );

        assert_eq!(registry.len(), 1);
        let ds = registry.get("x").unwrap();
        assert_eq!(ds.columns(), &["k"]);
        assert_eq!(registry.metadata("x").unwrap().description, "second");
    }

    #[test]
    fn test_list_sorted_by_name() {
        let registry = DatasetRegistry::new();
        registry.register("b", rainfall(), DatasetInfo::default());
        registry.register("a", rainfall(), DatasetInfo::default());

        let names: Vec<String> = registry.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = DatasetRegistry::new();
        let other = registry.clone();
        registry.register("shared", rainfall(), DatasetInfo::default());
        assert!(other.contains("shared"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DatasetStore::open(&dir.path().join("fusion.db")).unwrap());

        let registry = DatasetRegistry::with_store(Arc::clone(&store));
        registry.register("rainfall", rainfall(), DatasetInfo::new("IMD"));

        let restored = DatasetRegistry::with_store(store);
        assert_eq!(restored.load_from_store().unwrap(), 1);
        assert_eq!(*restored.get("rainfall").unwrap(), rainfall());
        assert_eq!(restored.metadata("rainfall").unwrap().description, "IMD");
    }
}
