//! 데이터셋 조인 (merge)
//!
//! 키를 주지 않으면 두 데이터셋의 공통 컬럼을 사전순으로 정렬해 키로 사용합니다.
//! 키가 아닌 같은 이름의 컬럼은 `_left` / `_right` 접미사로 구분합니다.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::dataset::{Dataset, Value};
use crate::error::{FusionError, Result};

use super::QueryEngine;

pub const LEFT_SUFFIX: &str = "_left";
pub const RIGHT_SUFFIX: &str = "_right";

/// 조인 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl FromStr for JoinType {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            "outer" | "full" => Ok(JoinType::Outer),
            other => Err(FusionError::InvalidInput(format!("unknown join type: {}", other))),
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
        };
        write!(f, "{}", name)
    }
}

impl QueryEngine {
    /// 두 데이터셋의 공통 컬럼 (사전순)
    pub fn common_columns(&self, left: &str, right: &str) -> Vec<String> {
        match (self.registry().get(left), self.registry().get(right)) {
            (Some(l), Some(r)) => shared_columns(&l, &r),
            _ => Vec::new(),
        }
    }

    /// 두 데이터셋 조인
    ///
    /// 등록되지 않은 데이터셋이면 빈 결과를 반환합니다.
    /// 키를 정할 수 없거나 명시한 키가 없으면 에러입니다.
    pub fn merge(
        &self,
        left_name: &str,
        right_name: &str,
        on: Option<&[String]>,
        how: JoinType,
    ) -> Result<Dataset> {
        let (Some(left), Some(right)) = (self.lookup(left_name), self.lookup(right_name)) else {
            return Ok(Dataset::empty());
        };

        let keys: Vec<String> = match on {
            Some(keys) if !keys.is_empty() => {
                for key in keys {
                    for (name, ds) in [(left_name, &left), (right_name, &right)] {
                        if !ds.has_column(key) {
                            return Err(FusionError::MissingJoinColumn {
                                dataset: name.to_string(),
                                column: key.clone(),
                            });
                        }
                    }
                }
                keys.to_vec()
            }
            _ => {
                let common = shared_columns(&left, &right);
                if common.is_empty() {
                    return Err(FusionError::NoJoinKey {
                        left: left_name.to_string(),
                        right: right_name.to_string(),
                    });
                }
                common
            }
        };

        let merged = join_datasets(&left, &right, &keys, how);
        tracing::info!(
            "Merged {} and {} on {:?} ({}), resulting in {} rows",
            left_name,
            right_name,
            keys,
            how,
            merged.num_rows()
        );
        Ok(merged)
    }
}

fn shared_columns(left: &Dataset, right: &Dataset) -> Vec<String> {
    let mut common: Vec<String> = left
        .columns()
        .iter()
        .filter(|c| right.has_column(c))
        .cloned()
        .collect();
    common.sort();
    common
}

/// 행의 키 튜플 (null이 섞이면 매칭되지 않음)
fn row_key(row: &[Value], indices: &[usize]) -> Option<Vec<String>> {
    indices.iter().map(|&i| row[i].key()).collect()
}

fn join_datasets(left: &Dataset, right: &Dataset, keys: &[String], how: JoinType) -> Dataset {
    let left_keys: Vec<usize> = keys.iter().filter_map(|k| left.column_index(k)).collect();
    let right_keys: Vec<usize> = keys.iter().filter_map(|k| right.column_index(k)).collect();

    // 출력 컬럼: 왼쪽 컬럼 전체 + 오른쪽의 키가 아닌 컬럼
    let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
    for col in left.columns() {
        if !keys.contains(col) && right.has_column(col) {
            columns.push(format!("{}{}", col, LEFT_SUFFIX));
        } else {
            columns.push(col.clone());
        }
    }

    let right_extra: Vec<usize> = right
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !keys.contains(*c))
        .map(|(i, _)| i)
        .collect();
    for &i in &right_extra {
        let col = &right.columns()[i];
        if left.has_column(col) {
            columns.push(format!("{}{}", col, RIGHT_SUFFIX));
        } else {
            columns.push(col.clone());
        }
    }

    // 왼쪽 키 컬럼 위치 → 오른쪽 키 컬럼 위치
    let key_pairs: Vec<(usize, usize)> = left_keys
        .iter()
        .copied()
        .zip(right_keys.iter().copied())
        .collect();

    let combine = |l: Option<&Vec<Value>>, r: Option<&Vec<Value>>| -> Vec<Value> {
        let mut row = Vec::with_capacity(columns.len());

        match l {
            Some(l) => row.extend(l.iter().cloned()),
            None => {
                row.extend(std::iter::repeat(Value::Null).take(left.num_columns()));
                if let Some(r) = r {
                    for &(li, ri) in &key_pairs {
                        row[li] = r[ri].clone();
                    }
                }
            }
        }

        match r {
            Some(r) => row.extend(right_extra.iter().map(|&i| r[i].clone())),
            None => row.extend(std::iter::repeat(Value::Null).take(right_extra.len())),
        }

        row
    };

    let mut rows = Vec::new();

    match how {
        JoinType::Right => {
            let index = build_index(left, &left_keys);
            for r in right.rows() {
                let matches = row_key(r, &right_keys).and_then(|k| index.get(&k));
                match matches {
                    Some(ls) => {
                        for &li in ls {
                            rows.push(combine(Some(&left.rows()[li]), Some(r)));
                        }
                    }
                    None => rows.push(combine(None, Some(r))),
                }
            }
        }
        JoinType::Inner | JoinType::Left | JoinType::Outer => {
            let index = build_index(right, &right_keys);
            let mut right_matched = vec![false; right.num_rows()];

            for l in left.rows() {
                let matches = row_key(l, &left_keys).and_then(|k| index.get(&k));
                match matches {
                    Some(rs) => {
                        for &ri in rs {
                            right_matched[ri] = true;
                            rows.push(combine(Some(l), Some(&right.rows()[ri])));
                        }
                    }
                    None if how != JoinType::Inner => rows.push(combine(Some(l), None)),
                    None => {}
                }
            }

            if how == JoinType::Outer {
                for (ri, r) in right.rows().iter().enumerate() {
                    if !right_matched[ri] {
                        rows.push(combine(None, Some(r)));
                    }
                }
            }
        }
    }

    // 열 수는 항상 columns와 일치
    Dataset::from_rows(columns, rows).unwrap_or_default()
}

fn build_index(dataset: &Dataset, key_indices: &[usize]) -> HashMap<Vec<String>, Vec<usize>> {
    let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (i, row) in dataset.rows().iter().enumerate() {
        if let Some(key) = row_key(row, key_indices) {
            index.entry(key).or_default().push(i);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::dataset;
    use crate::dataset::{DatasetInfo, DatasetRegistry};

    fn engine() -> QueryEngine {
        let registry = DatasetRegistry::new();
        registry.register(
            "rain",
            dataset(
                &["state", "year", "value"],
                vec![
                    vec!["A".into(), 2020.into(), 800.into()],
                    vec!["A".into(), 2021.into(), 850.into()],
                    vec!["B".into(), 2020.into(), 1000.into()],
                ],
            ),
            DatasetInfo::default(),
        );
        registry.register(
            "crop",
            dataset(
                &["state", "year", "value"],
                vec![
                    vec!["A".into(), 2020.into(), 70.into()],
                    vec!["A".into(), 2021.into(), 75.into()],
                    vec!["C".into(), 2020.into(), 10.into()],
                ],
            ),
            DatasetInfo::default(),
        );
        registry.register(
            "gdp",
            dataset(&["region", "gdp"], vec![vec!["X".into(), 1.into()]]),
            DatasetInfo::default(),
        );
        QueryEngine::new(registry)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_common_columns_sorted() {
        assert_eq!(engine().common_columns("rain", "crop"), vec!["state", "value", "year"]);
        assert!(engine().common_columns("rain", "missing").is_empty());
    }

    #[test]
    fn test_inner_join_with_suffixes() {
        let on = keys(&["state", "year"]);
        let merged = engine().merge("rain", "crop", Some(&on), JoinType::Inner).unwrap();

        assert_eq!(merged.columns(), &["state", "year", "value_left", "value_right"]);
        assert_eq!(merged.num_rows(), 2);
        assert_eq!(merged.value(1, "value_left"), Some(&Value::Int(850)));
        assert_eq!(merged.value(1, "value_right"), Some(&Value::Int(75)));
    }

    #[test]
    fn test_left_right_outer_joins() {
        let on = keys(&["state", "year"]);
        let e = engine();

        let left = e.merge("rain", "crop", Some(&on), JoinType::Left).unwrap();
        assert_eq!(left.num_rows(), 3);
        assert!(left.value(2, "value_right").unwrap().is_null());

        let right = e.merge("rain", "crop", Some(&on), JoinType::Right).unwrap();
        assert_eq!(right.num_rows(), 3);
        assert_eq!(right.value(2, "state"), Some(&Value::from("C")));
        assert!(right.value(2, "value_left").unwrap().is_null());

        let outer = e.merge("rain", "crop", Some(&on), JoinType::Outer).unwrap();
        assert_eq!(outer.num_rows(), 4);
        assert_eq!(outer.value(3, "state"), Some(&Value::from("C")));
        assert_eq!(outer.value(3, "year"), Some(&Value::Int(2020)));
    }

    #[test]
    fn test_auto_detected_keys() {
        // 공통 컬럼 전체(state, value, year)로 조인하므로 일치하는 행이 없음
        let merged = engine().merge("rain", "crop", None, JoinType::Inner).unwrap();
        assert_eq!(merged.columns(), &["state", "year", "value"]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_no_join_key_error() {
        let result = engine().merge("rain", "gdp", None, JoinType::Inner);
        assert!(matches!(result, Err(FusionError::NoJoinKey { .. })));
    }

    #[test]
    fn test_missing_explicit_key_fails() {
        let on = keys(&["state", "district"]);
        let result = engine().merge("rain", "crop", Some(&on), JoinType::Inner);
        assert!(matches!(
            result,
            Err(FusionError::MissingJoinColumn { ref column, .. }) if column == "district"
        ));
    }

    #[test]
    fn test_unknown_dataset_is_empty() {
        let merged = engine().merge("rain", "missing", None, JoinType::Inner).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_null_keys_never_match() {
        let registry = DatasetRegistry::new();
        registry.register(
            "l",
            dataset(&["k", "a"], vec![vec![Value::Null, 1.into()]]),
            DatasetInfo::default(),
        );
        registry.register(
            "r",
            dataset(&["k", "b"], vec![vec![Value::Null, 2.into()]]),
            DatasetInfo::default(),
        );
        let merged = QueryEngine::new(registry)
            .merge("l", "r", None, JoinType::Inner)
            .unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_join_type_from_str() {
        assert_eq!("LEFT".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!("full".parse::<JoinType>().unwrap(), JoinType::Outer);
        assert!("cross".parse::<JoinType>().is_err());
    }
}
