//! 시계열 분석 - 시간순 정렬 후 통계와 추세 계산

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::dataset::Value;
use crate::error::{FusionError, Result};

use super::{stats, Analyzer};

/// 추세 (마지막 값 > 첫 값이면 증가, 같거나 작으면 감소)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
}

impl Trend {
    /// 시간순 값 목록의 첫 값과 마지막 값 비교
    pub fn of(values: &[f64]) -> Option<Self> {
        let (first, last) = (values.first()?, values.last()?);
        if last > first {
            Some(Trend::Increasing)
        } else {
            Some(Trend::Decreasing)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub mean: f64,
    /// 값이 2개 미만이면 None
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub trend: Trend,
}

impl SeriesStats {
    /// 시간순으로 정렬된 값에서 계산 (값이 없으면 None)
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            mean: stats::mean(values)?,
            std: stats::sample_std(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            trend: Trend::of(values)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesReport {
    pub dataset: String,
    /// 유효한 시간 값이 없으면 None
    pub time_range: Option<TimeRange>,
    /// 데이터셋 전체 행 수
    pub data_points: usize,
    /// 그룹 없이 분석한 경우의 통계
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SeriesStats>,
    /// 그룹별 통계 (그룹 값 문자열 → 통계)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, SeriesStats>>,
}

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];

/// 셀 값을 시각으로 변환 (실패 시 None)
///
/// 1000..=9999 범위의 숫자는 연도, 그 외 숫자는 Unix 초로 해석합니다.
pub fn coerce_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Null => None,
        Value::Int(_) | Value::Float(_) => {
            let n = value.as_f64()?;
            if (1000.0..=9999.0).contains(&n) && n.fract() == 0.0 {
                year_start(n as i32)
            } else {
                DateTime::from_timestamp(n as i64, 0).map(|dt| dt.naive_utc())
            }
        }
        Value::Text(s) => parse_text_timestamp(s.trim()),
    }
}

fn year_start(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_text_timestamp(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    // "2021-06" 또는 "2021"
    if let Some((y, m)) = s.split_once('-') {
        if let (Ok(y), Ok(m)) = (y.parse::<i32>(), m.parse::<u32>()) {
            return NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0);
        }
    }
    match s.parse::<i32>() {
        Ok(year) if (1000..=9999).contains(&year) => year_start(year),
        _ => None,
    }
}

impl Analyzer {
    /// 시계열 통계
    ///
    /// 데이터셋이 없거나 비어 있으면 `Ok(None)`입니다. 그룹 컬럼이 데이터셋에
    /// 없으면 전체 통계로 대체합니다.
    pub fn time_series(
        &self,
        name: &str,
        time_column: &str,
        value_column: &str,
        group_by: Option<&str>,
    ) -> Result<Option<TimeSeriesReport>> {
        let Some(dataset) = self.engine().lookup(name) else {
            return Ok(None);
        };
        if dataset.is_empty() {
            return Ok(None);
        }

        let column = |col: &str| {
            dataset
                .column_index(col)
                .ok_or_else(|| FusionError::UnknownColumn {
                    dataset: name.to_string(),
                    column: col.to_string(),
                })
        };
        let time_idx = column(time_column)?;
        let value_idx = column(value_column)?;
        let group_idx = group_by.and_then(|g| dataset.column_index(g));

        // (시각, 행) 목록을 시간순으로 안정 정렬
        let mut timed: Vec<(NaiveDateTime, &Vec<Value>)> = dataset
            .rows()
            .iter()
            .filter_map(|row| coerce_timestamp(&row[time_idx]).map(|t| (t, row)))
            .collect();
        timed.sort_by_key(|(t, _)| *t);

        let time_range = match (timed.first(), timed.last()) {
            (Some((start, _)), Some((end, _))) => Some(TimeRange {
                start: *start,
                end: *end,
            }),
            _ => None,
        };

        let numeric = |row: &Vec<Value>| row[value_idx].coerce_numeric().as_f64();

        let mut report = TimeSeriesReport {
            dataset: name.to_string(),
            time_range,
            data_points: dataset.num_rows(),
            statistics: None,
            groups: None,
        };

        match group_idx {
            Some(g) => {
                let mut series: BTreeMap<String, Vec<f64>> = BTreeMap::new();
                for (_, row) in &timed {
                    if row[g].is_null() {
                        continue;
                    }
                    let entry = series.entry(row[g].to_string()).or_default();
                    if let Some(v) = numeric(*row) {
                        entry.push(v);
                    }
                }
                report.groups = Some(
                    series
                        .into_iter()
                        .filter_map(|(k, values)| SeriesStats::from_values(&values).map(|s| (k, s)))
                        .collect(),
                );
            }
            None => {
                if let Some(g) = group_by {
                    tracing::warn!("Group column '{}' not in '{}', using overall statistics", g, name);
                }
                let values: Vec<f64> = timed.iter().filter_map(|(_, row)| numeric(*row)).collect();
                report.statistics = SeriesStats::from_values(&values);
            }
        }

        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::{dataset, rainfall};
    use crate::dataset::{DatasetInfo, DatasetRegistry};
    use crate::query::QueryEngine;

    fn analyzer_with(name: &str, data: crate::dataset::Dataset) -> Analyzer {
        let registry = DatasetRegistry::new();
        registry.register(name, data, DatasetInfo::default());
        Analyzer::new(QueryEngine::new(registry))
    }

    fn series(values: &[i64]) -> crate::dataset::Dataset {
        dataset(
            &["year", "v"],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| vec![Value::Int(2000 + i as i64), Value::Int(*v)])
                .collect(),
        )
    }

    #[test]
    fn test_rainfall_statistics() {
        let report = analyzer_with("rainfall", rainfall())
            .time_series("rainfall", "year", "mm", None)
            .unwrap()
            .unwrap();

        let stats = report.statistics.unwrap();
        assert_eq!(stats.mean, 825.0);
        assert_eq!(stats.min, 800.0);
        assert_eq!(stats.max, 850.0);
        assert_eq!(stats.trend, Trend::Increasing);
        assert_eq!(report.data_points, 2);

        let range = report.time_range.unwrap();
        assert_eq!(range.start, year_start(2020).unwrap());
        assert_eq!(range.end, year_start(2021).unwrap());
    }

    #[test]
    fn test_trend_compares_endpoints_only() {
        let report = analyzer_with("s", series(&[100, 90, 80, 110]))
            .time_series("s", "year", "v", None)
            .unwrap()
            .unwrap();
        assert_eq!(report.statistics.unwrap().trend, Trend::Increasing);

        let report = analyzer_with("s", series(&[100, 90]))
            .time_series("s", "year", "v", None)
            .unwrap()
            .unwrap();
        assert_eq!(report.statistics.unwrap().trend, Trend::Decreasing);

        assert_eq!(Trend::of(&[5.0, 5.0]), Some(Trend::Decreasing));
    }

    #[test]
    fn test_sorts_by_time_before_trend() {
        let data = dataset(
            &["date", "v"],
            vec![
                vec!["2021-03-01".into(), 10.into()],
                vec!["2021-01-01".into(), 30.into()],
                vec!["not a date".into(), 999.into()],
            ],
        );
        let report = analyzer_with("d", data)
            .time_series("d", "date", "v", None)
            .unwrap()
            .unwrap();

        let stats = report.statistics.unwrap();
        assert_eq!(stats.trend, Trend::Decreasing);
        assert_eq!(stats.max, 30.0);
        assert_eq!(report.data_points, 3);
    }

    #[test]
    fn test_grouped_statistics() {
        let data = dataset(
            &["state", "year", "mm"],
            vec![
                vec!["A".into(), 2021.into(), 850.into()],
                vec!["B".into(), 2020.into(), 500.into()],
                vec!["A".into(), 2020.into(), 800.into()],
                vec!["B".into(), 2021.into(), 400.into()],
            ],
        );
        let report = analyzer_with("r", data)
            .time_series("r", "year", "mm", Some("state"))
            .unwrap()
            .unwrap();

        assert!(report.statistics.is_none());
        let groups = report.groups.unwrap();
        assert_eq!(groups["A"].trend, Trend::Increasing);
        assert_eq!(groups["B"].trend, Trend::Decreasing);
        assert_eq!(groups["B"].mean, 450.0);
    }

    #[test]
    fn test_unknown_group_column_falls_back_to_overall() {
        let report = analyzer_with("rainfall", rainfall())
            .time_series("rainfall", "year", "mm", Some("district"))
            .unwrap()
            .unwrap();
        assert!(report.groups.is_none());
        assert!(report.statistics.is_some());
    }

    #[test]
    fn test_missing_dataset_and_columns() {
        let analyzer = analyzer_with("rainfall", rainfall());
        assert!(analyzer.time_series("nope", "year", "mm", None).unwrap().is_none());
        assert!(matches!(
            analyzer.time_series("rainfall", "month", "mm", None),
            Err(FusionError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_coerce_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(coerce_timestamp(&"2021-06-01".into()), Some(expected));
        assert_eq!(coerce_timestamp(&"2021-06".into()), Some(expected));
        assert_eq!(coerce_timestamp(&"01-06-2021".into()), Some(expected));
        assert_eq!(coerce_timestamp(&"2021".into()), year_start(2021));
        assert!(coerce_timestamp(&Value::Null).is_none());
        assert!(coerce_timestamp(&"soon".into()).is_none());
    }
}
