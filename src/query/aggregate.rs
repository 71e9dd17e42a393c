//! Group-by 집계

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::dataset::{Dataset, Value};
use crate::error::{FusionError, Result};

use super::{Filters, QueryEngine};

/// 집계 함수
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    /// null이 아닌 값의 개수
    Count,
    /// 표본 표준편차 (n-1)
    Std,
    First,
    Last,
    /// 고유값 개수
    NUnique,
}

impl FromStr for AggFunc {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggFunc::Sum),
            "mean" | "avg" | "average" => Ok(AggFunc::Mean),
            "median" => Ok(AggFunc::Median),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "count" => Ok(AggFunc::Count),
            "std" => Ok(AggFunc::Std),
            "first" => Ok(AggFunc::First),
            "last" => Ok(AggFunc::Last),
            "nunique" => Ok(AggFunc::NUnique),
            other => Err(FusionError::UnsupportedAggregation(other.to_string())),
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
            AggFunc::Std => "std",
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::NUnique => "nunique",
        };
        write!(f, "{}", name)
    }
}

impl AggFunc {
    /// 그룹 값들에 함수 적용
    fn apply(self, values: &[&Value]) -> Value {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();

        match self {
            AggFunc::Sum => {
                if present.iter().all(|v| matches!(v, Value::Int(_))) {
                    let total = present
                        .iter()
                        .filter_map(|v| match v {
                            Value::Int(i) => Some(*i),
                            _ => None,
                        })
                        .fold(0i64, |acc, i| acc.saturating_add(i));
                    Value::Int(total)
                } else {
                    Value::Float(numbers.iter().sum())
                }
            }
            AggFunc::Mean => crate::analysis::mean(&numbers)
                .map(Value::Float)
                .unwrap_or(Value::Null),
            AggFunc::Median => median(numbers).map(Value::Float).unwrap_or(Value::Null),
            AggFunc::Std => crate::analysis::sample_std(&numbers)
                .map(Value::Float)
                .unwrap_or(Value::Null),
            AggFunc::Min => present
                .iter()
                .copied()
                .min_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            AggFunc::Max => present
                .iter()
                .copied()
                .max_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            AggFunc::Count => Value::Int(present.len() as i64),
            AggFunc::First => present.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
            AggFunc::Last => present.last().map(|v| (*v).clone()).unwrap_or(Value::Null),
            AggFunc::NUnique => {
                let unique: HashSet<String> = present.iter().filter_map(|v| v.key()).collect();
                Value::Int(unique.len() as i64)
            }
        }
    }
}

fn median(mut numbers: Vec<f64>) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    numbers.sort_by(|a, b| a.total_cmp(b));
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        Some((numbers[mid - 1] + numbers[mid]) / 2.0)
    } else {
        Some(numbers[mid])
    }
}

/// 컬럼 → 집계 함수 매핑 (입력 순서 유지)
///
/// 같은 컬럼을 다시 지정하면 함수가 교체됩니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    specs: Vec<(String, AggFunc)>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, column: &str, func: AggFunc) -> Self {
        match self.specs.iter_mut().find(|(c, _)| c == column) {
            Some(existing) => existing.1 = func,
            None => self.specs.push((column.to_string(), func)),
        }
        self
    }

    /// `"column=func"` 형식 목록에서 생성
    pub fn parse(items: &[String]) -> Result<Self> {
        let mut agg = Self::new();
        for item in items {
            let (column, func) = item.split_once('=').ok_or_else(|| {
                FusionError::InvalidInput(format!("expected column=func, got '{}'", item))
            })?;
            agg = agg.add(column.trim(), func.parse()?);
        }
        Ok(agg)
    }

    /// JSON 객체 `{column: "func"}`에서 생성
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut agg = Self::new();
        for (column, func) in map {
            let name = func.as_str().ok_or_else(|| {
                FusionError::UnsupportedAggregation(func.to_string())
            })?;
            agg = agg.add(column, name.parse()?);
        }
        Ok(agg)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AggFunc)> {
        self.specs.iter().map(|(c, f)| (c.as_str(), *f))
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// BTreeMap 키로 쓰기 위한 그룹 키 (Value 전순서)
#[derive(Debug, Clone)]
struct GroupKey(Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| self.0.len().cmp(&other.0.len()))
    }
}

impl QueryEngine {
    /// 필터 후 group-by 집계
    ///
    /// 결과 컬럼은 그룹 컬럼 다음 집계 컬럼 순서이며 그룹은 키 오름차순입니다.
    pub fn aggregate(
        &self,
        name: &str,
        group_by: &[String],
        aggregations: &Aggregation,
        filters: &Filters,
    ) -> Result<Dataset> {
        let Some(dataset) = self.lookup(name) else {
            return Ok(Dataset::empty());
        };

        let filtered = dataset.select_rows(filters.matching_rows(&dataset));
        if filtered.is_empty() {
            return Ok(Dataset::empty());
        }

        let mut valid_groups: Vec<&String> = Vec::new();
        for column in group_by.iter().filter(|c| filtered.has_column(c)) {
            if !valid_groups.contains(&column) {
                valid_groups.push(column);
            }
        }
        if valid_groups.is_empty() {
            return Err(FusionError::InvalidGroupColumns {
                dataset: name.to_string(),
                requested: group_by.to_vec(),
            });
        }
        if group_by.iter().any(|c| !filtered.has_column(c)) {
            tracing::warn!(
                "Ignoring unknown group columns in '{}': {:?}",
                name,
                group_by
                    .iter()
                    .filter(|c| !filtered.has_column(c))
                    .collect::<Vec<_>>()
            );
        }

        let group_idx: Vec<usize> = valid_groups
            .iter()
            .filter_map(|c| filtered.column_index(c))
            .collect();

        let mut agg_idx = Vec::new();
        for (column, func) in aggregations.iter() {
            let idx = filtered
                .column_index(column)
                .ok_or_else(|| FusionError::UnknownColumn {
                    dataset: name.to_string(),
                    column: column.to_string(),
                })?;
            agg_idx.push((idx, func));
        }

        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for (i, row) in filtered.rows().iter().enumerate() {
            let key: Vec<Value> = group_idx.iter().map(|&g| row[g].clone()).collect();
            if key.iter().any(Value::is_null) {
                continue;
            }
            groups.entry(GroupKey(key)).or_default().push(i);
        }

        let mut columns: Vec<String> = valid_groups.iter().map(|c| c.to_string()).collect();
        // 그룹 컬럼을 집계하면 `{column}_{func}` 이름을 사용
        columns.extend(aggregations.iter().map(|(c, func)| {
            if valid_groups.iter().any(|g| g.as_str() == c) {
                format!("{}_{}", c, func)
            } else {
                c.to_string()
            }
        }));

        let rows: Vec<Vec<Value>> = groups
            .into_iter()
            .map(|(GroupKey(mut key), members)| {
                for &(idx, func) in &agg_idx {
                    let values: Vec<&Value> =
                        members.iter().map(|&r| &filtered.rows()[r][idx]).collect();
                    key.push(func.apply(&values));
                }
                key
            })
            .collect();

        tracing::debug!("Aggregated '{}' into {} groups", name, rows.len());
        Dataset::from_rows(columns, rows)
    }
}
