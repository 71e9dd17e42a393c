//! Dataset 모듈 - 표 형식 데이터와 레지스트리
//!
//! - Value: 셀 값 (숫자/문자열/null)
//! - Dataset: 컬럼 목록 + 행 목록 (행은 컬럼 순서에 맞춰 정렬)
//! - DatasetRegistry: 이름 → 데이터셋 매핑 (등록 시 전체 교체)

mod registry;
mod value;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};

pub use registry::{DatasetInfo, DatasetRegistry};
pub use value::{ColumnType, Value};

/// JSON 레코드 (컬럼명 → 값)
pub type Record = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Dataset
// ============================================================================

/// 표 형식 데이터셋
///
/// 질의 연산은 항상 새 Dataset을 만들어 반환하며 원본은 변경하지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// 빈 데이터셋
    pub fn empty() -> Self {
        Self::default()
    }

    /// 컬럼과 행으로 생성 (행 길이 검증)
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(FusionError::InvalidInput(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    /// JSON 레코드 목록으로 생성
    ///
    /// 컬럼 순서는 처음 등장한 순서를 따르고, 빠진 값은 null로 채웁니다.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|col| record.remove(col).map(Value::from).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 컬럼 값 순회
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// 컬럼별 추론 타입
    pub fn dtypes(&self) -> BTreeMap<String, ColumnType> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let ty = ColumnType::infer(self.rows.iter().map(|row| &row[idx]));
                (col.clone(), ty)
            })
            .collect()
    }

    /// JSON 레코드 목록으로 변환
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, value)| (col.clone(), serde_json::Value::from(value)))
                    .collect()
            })
            .collect()
    }

    /// 행 인덱스 부분집합으로 새 데이터셋 생성
    pub(crate) fn select_rows(&self, indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.into_iter().map(|i| self.rows[i].clone()).collect(),
        }
    }

    /// 컬럼 부분집합으로 새 데이터셋 생성 (없는 컬럼은 무시)
    pub(crate) fn project(&self, columns: &[String]) -> Self {
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();

        Self {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }

    pub(crate) fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    /// 다른 데이터셋의 행을 뒤에 붙임 (컬럼 합집합, 빠진 값은 null)
    pub fn append(&mut self, other: Dataset) {
        for col in &other.columns {
            if !self.has_column(col) {
                self.columns.push(col.clone());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
            }
        }

        let mapping: Vec<usize> = other
            .columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();

        for row in other.rows {
            let mut new_row = vec![Value::Null; self.columns.len()];
            for (value, &target) in row.into_iter().zip(&mapping) {
                new_row[target] = value;
            }
            self.rows.push(new_row);
        }
    }

    /// 컬럼 이름 변경
    pub fn rename_columns(&mut self, f: impl Fn(&str) -> String) {
        for col in &mut self.columns {
            *col = f(col);
        }
    }

    /// 컬럼 값을 숫자로 변환 (변환 불가는 null)
    pub fn coerce_numeric(&mut self, column: &str) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };

        for row in &mut self.rows {
            row[idx] = row[idx].coerce_numeric();
        }
        true
    }

    /// 모든 값이 null인 행 제거
    pub fn drop_all_null_rows(&mut self) {
        self.rows.retain(|row| row.iter().any(|v| !v.is_null()));
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// 등록 시점에 계산되는 데이터셋 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub name: String,
    pub description: String,
    pub columns: Vec<String>,
    /// 조인에 사용할 수 있는 컬럼
    pub key_columns: Vec<String>,
    pub time_column: Option<String>,
    pub row_count: usize,
    pub column_count: usize,
    pub dtypes: BTreeMap<String, ColumnType>,
    pub registered_at: DateTime<Utc>,
}

impl DatasetMetadata {
    /// 데이터셋과 등록 정보로 메타데이터 스냅샷 생성
    pub fn snapshot(name: &str, data: &Dataset, info: &DatasetInfo) -> Self {
        Self {
            name: name.to_string(),
            description: info.description.clone(),
            columns: data.columns().to_vec(),
            key_columns: info.key_columns.clone(),
            time_column: info.time_column.clone(),
            row_count: data.num_rows(),
            column_count: data.num_columns(),
            dtypes: data.dtypes(),
            registered_at: Utc::now(),
        }
    }
}
