//! 두 데이터셋 컬럼 간 상관분석

use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::{FusionError, Result};
use crate::query::{JoinType, LEFT_SUFFIX, RIGHT_SUFFIX};

use super::{stats, Analyzer};

/// 상관분석 결과
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
    /// 피어슨 r (표본 부족 시 0.0, 분산 0이면 NaN)
    pub coefficient: f64,
    /// 두 값이 모두 숫자인 조인 행
    pub paired: Dataset,
}

impl Correlation {
    fn insufficient() -> Self {
        Self {
            coefficient: 0.0,
            paired: Dataset::empty(),
        }
    }

    pub fn is_defined(&self) -> bool {
        !self.paired.is_empty() && !self.coefficient.is_nan()
    }
}

impl Analyzer {
    /// 조인 키로 두 데이터셋을 결합한 뒤 컬럼 간 피어슨 상관계수 계산
    ///
    /// 짝지어진 관측치가 2개 미만이면 `{0.0, 빈 데이터셋}`을 반환합니다.
    pub fn correlate(
        &self,
        left: &str,
        right: &str,
        left_column: &str,
        right_column: &str,
        on: &[String],
    ) -> Result<Correlation> {
        let merged = self
            .engine()
            .merge(left, right, Some(on), JoinType::Inner)?;

        if merged.is_empty() {
            tracing::warn!("No joined rows for correlation of {} and {}", left, right);
            return Ok(Correlation::insufficient());
        }

        let x_col = resolve_column(&merged, left_column, LEFT_SUFFIX).ok_or_else(|| {
            FusionError::UnknownColumn {
                dataset: left.to_string(),
                column: left_column.to_string(),
            }
        })?;
        let y_col = resolve_column(&merged, right_column, RIGHT_SUFFIX).ok_or_else(|| {
            FusionError::UnknownColumn {
                dataset: right.to_string(),
                column: right_column.to_string(),
            }
        })?;

        let mut keep = Vec::new();
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (i, row) in merged.rows().iter().enumerate() {
            let x = row[x_col].coerce_numeric().as_f64();
            let y = row[y_col].coerce_numeric().as_f64();
            if let (Some(x), Some(y)) = (x, y) {
                keep.push(i);
                xs.push(x);
                ys.push(y);
            }
        }

        let coefficient = match stats::pearson(&xs, &ys) {
            Ok(r) => r,
            Err(e) if e.is_soft() => {
                tracing::warn!("Correlation skipped: {}", e);
                return Ok(Correlation::insufficient());
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Correlation between {}.{} and {}.{}: {:.4} ({} pairs)",
            left,
            left_column,
            right,
            right_column,
            coefficient,
            keep.len()
        );

        Ok(Correlation {
            coefficient,
            paired: merged.select_rows(keep),
        })
    }
}

/// 조인 후 컬럼 위치 (원래 이름, 없으면 접미사 붙은 이름)
fn resolve_column(merged: &Dataset, column: &str, suffix: &str) -> Option<usize> {
    merged
        .column_index(column)
        .or_else(|| merged.column_index(&format!("{}{}", column, suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::dataset;
    use crate::dataset::{DatasetInfo, DatasetRegistry, Value};
    use crate::query::QueryEngine;

    fn analyzer() -> Analyzer {
        let registry = DatasetRegistry::new();
        registry.register(
            "rainfall",
            dataset(
                &["state", "year", "value"],
                vec![
                    vec!["A".into(), 2019.into(), 700.into()],
                    vec!["A".into(), 2020.into(), 800.into()],
                    vec!["A".into(), 2021.into(), 850.into()],
                    vec!["A".into(), 2022.into(), Value::Null],
                ],
            ),
            DatasetInfo::new("rainfall"),
        );
        registry.register(
            "crops",
            dataset(
                &["state", "year", "value"],
                vec![
                    vec!["A".into(), 2019.into(), 60.into()],
                    vec!["A".into(), 2020.into(), 70.into()],
                    vec!["A".into(), 2021.into(), 75.into()],
                    vec!["A".into(), 2022.into(), 90.into()],
                ],
            ),
            DatasetInfo::new("crop yield"),
        );
        Analyzer::new(QueryEngine::new(registry))
    }

    fn keys() -> Vec<String> {
        vec!["state".to_string(), "year".to_string()]
    }

    #[test]
    fn test_correlation_resolves_suffixed_columns() {
        let result = analyzer()
            .correlate("rainfall", "crops", "value", "value", &keys())
            .unwrap();

        // null 행은 제외
        assert_eq!(result.paired.num_rows(), 3);
        assert!(result.paired.has_column("value_left"));
        assert!(result.coefficient > 0.99);
        assert!(result.is_defined());
    }

    #[test]
    fn test_correlation_is_symmetric() {
        let a = analyzer()
            .correlate("rainfall", "crops", "value", "value", &keys())
            .unwrap();
        let b = analyzer()
            .correlate("crops", "rainfall", "value", "value", &keys())
            .unwrap();
        assert!((a.coefficient - b.coefficient).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_insufficient_pairs_returns_sentinel() {
        let analyzer = analyzer();
        analyzer.engine().registry().register(
            "tiny",
            dataset(
                &["state", "year", "value"],
                vec![vec!["A".into(), 2020.into(), 1.into()]],
            ),
            DatasetInfo::default(),
        );

        let result = analyzer
            .correlate("rainfall", "tiny", "value", "value", &keys())
            .unwrap();
        assert_eq!(result.coefficient, 0.0);
        assert!(result.paired.is_empty());
    }

    #[test]
    fn test_correlation_unknown_dataset_is_sentinel() {
        let result = analyzer()
            .correlate("rainfall", "missing", "value", "value", &keys())
            .unwrap();
        assert_eq!(result.coefficient, 0.0);
    }

    #[test]
    fn test_correlation_missing_key_fails() {
        let result = analyzer().correlate(
            "rainfall",
            "crops",
            "value",
            "value",
            &["district".to_string()],
        );
        assert!(matches!(result, Err(FusionError::MissingJoinColumn { .. })));
    }
}
