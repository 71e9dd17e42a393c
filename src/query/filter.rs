//! 필터 조건 (동등/포함 조건의 논리곱)

use crate::dataset::{Dataset, Value};

/// 컬럼 조건
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// 값과 정확히 같음
    Eq(Value),
    /// 목록 중 하나와 같음
    In(Vec<Value>),
}

impl Predicate {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(expected) => value == expected,
            Predicate::In(options) => options.iter().any(|o| o == value),
        }
    }
}

/// 컬럼 조건 목록 (모두 만족해야 통과)
#[derive(Debug, Clone, Default)]
pub struct Filters {
    predicates: Vec<(String, Predicate)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicates
            .push((column.to_string(), Predicate::Eq(value.into())));
        self
    }

    pub fn one_of(mut self, column: &str, values: Vec<Value>) -> Self {
        self.predicates.push((column.to_string(), Predicate::In(values)));
        self
    }

    pub fn push(&mut self, column: impl Into<String>, predicate: Predicate) {
        self.predicates.push((column.into(), predicate));
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// JSON 객체에서 생성 (배열 값은 포함 조건)
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut filters = Self::new();
        for (column, value) in map {
            let predicate = match value {
                serde_json::Value::Array(items) => {
                    Predicate::In(items.iter().cloned().map(Value::from).collect())
                }
                other => Predicate::Eq(Value::from(other.clone())),
            };
            filters.push(column.clone(), predicate);
        }
        filters
    }

    /// 조건을 만족하는 행 인덱스
    ///
    /// 데이터셋에 없는 컬럼의 조건은 무시합니다.
    pub fn matching_rows(&self, dataset: &Dataset) -> Vec<usize> {
        let active: Vec<(usize, &Predicate)> = self
            .predicates
            .iter()
            .filter_map(|(col, pred)| {
                let idx = dataset.column_index(col);
                if idx.is_none() {
                    tracing::debug!("Ignoring filter on unknown column: {}", col);
                }
                idx.map(|i| (i, pred))
            })
            .collect();

        dataset
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| active.iter().all(|(i, pred)| pred.matches(&row[*i])))
            .map(|(i, _)| i)
            .collect()
    }
}
