//! Structured Query Engine - 등록된 데이터셋에 대한 정형 질의
//!
//! - query: 필터 → 컬럼 선택 → 행 제한
//! - merge: 두 데이터셋 조인 (키 자동 감지)
//! - aggregate: 필터 후 group-by 집계
//!
//! "없음"은 빈 결과로, 의미상 불가능한 요청은 에러로 반환합니다.

mod aggregate;
mod filter;
mod join;

use std::sync::Arc;

use crate::dataset::{Dataset, DatasetRegistry};

pub use aggregate::{AggFunc, Aggregation};
pub use filter::{Filters, Predicate};
pub use join::{JoinType, LEFT_SUFFIX, RIGHT_SUFFIX};

/// 필터 + 컬럼 선택 + 행 제한 옵션
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Filters,
    /// 반환할 컬럼 (None이면 전체)
    pub columns: Option<Vec<String>>,
    /// 최대 행 수
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 정형 질의 엔진
///
/// 레지스트리 핸들을 주입받아 동작하며, 결과는 항상 새 데이터셋입니다.
#[derive(Clone)]
pub struct QueryEngine {
    registry: DatasetRegistry,
}

impl QueryEngine {
    pub fn new(registry: DatasetRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    /// 이름으로 데이터셋 조회 (없으면 경고 로그)
    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Dataset>> {
        let found = self.registry.get(name);
        if found.is_none() {
            tracing::warn!("Dataset not found: {}", name);
        }
        found
    }

    /// 필터 + 컬럼 선택 + 행 제한
    ///
    /// 등록되지 않은 데이터셋은 에러 대신 빈 결과를 반환합니다.
    pub fn query(&self, name: &str, options: &QueryOptions) -> Dataset {
        let Some(dataset) = self.lookup(name) else {
            return Dataset::empty();
        };

        let matching = options.filters.matching_rows(&dataset);
        let mut result = dataset.select_rows(matching);

        if let Some(columns) = &options.columns {
            // 모두 없는 컬럼이면 전체 컬럼 유지
            if columns.iter().any(|c| result.has_column(c)) {
                result = result.project(columns);
            }
        }

        if let Some(limit) = options.limit {
            result.truncate(limit);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::dataset;
    use crate::dataset::{DatasetInfo, Value};

    fn engine() -> QueryEngine {
        let registry = DatasetRegistry::new();
        registry.register(
            "crops",
            dataset(
                &["state", "year", "crop", "tonnes"],
                vec![
                    vec!["TN".into(), 2020.into(), "Rice".into(), 7200.into()],
                    vec!["TN".into(), 2021.into(), "Rice".into(), 7500.into()],
                    vec!["KA".into(), 2020.into(), "Rice".into(), 9100.into()],
                    vec!["KA".into(), 2021.into(), "Maize".into(), Value::Null],
                ],
            ),
            DatasetInfo::new("crop production"),
        );
        QueryEngine::new(registry)
    }

    #[test]
    fn test_query_unknown_dataset_is_empty() {
        let result = engine().query("missing", &QueryOptions::new());
        assert!(result.is_empty());
        assert_eq!(result.num_columns(), 0);
    }

    #[test]
    fn test_query_equality_and_membership() {
        let filters = Filters::new()
            .eq("crop", "Rice")
            .one_of("state", vec!["TN".into(), "KA".into()]);
        let result = engine().query("crops", &QueryOptions::new().filters(filters));
        assert_eq!(result.num_rows(), 3);

        let filters = Filters::new().eq("year", 2021);
        let result = engine().query("crops", &QueryOptions::new().filters(filters));
        assert_eq!(result.num_rows(), 2);
    }

    #[test]
    fn test_query_projection_drops_unknown_columns() {
        let options = QueryOptions::new().columns(&["state", "nope", "tonnes"]);
        let result = engine().query("crops", &options);
        assert_eq!(result.columns(), &["state", "tonnes"]);
        assert_eq!(result.num_rows(), 4);
    }

    #[test]
    fn test_query_projection_all_unknown_keeps_everything() {
        let options = QueryOptions::new().columns(&["nope"]);
        let result = engine().query("crops", &options);
        assert_eq!(result.num_columns(), 4);
    }

    #[test]
    fn test_query_limit() {
        let result = engine().query("crops", &QueryOptions::new().limit(2));
        assert_eq!(result.num_rows(), 2);
        assert_eq!(result.value(1, "year"), Some(&Value::Int(2021)));
    }

    #[test]
    fn test_query_does_not_mutate_registered_dataset() {
        let engine = engine();
        let _ = engine.query("crops", &QueryOptions::new().columns(&["state"]).limit(1));
        assert_eq!(engine.registry().get("crops").unwrap().num_rows(), 4);
    }
}
