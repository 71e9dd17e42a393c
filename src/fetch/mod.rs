//! data.gov.in 수집기
//!
//! `https://api.data.gov.in/resource/{id}`를 limit/offset으로 페이지 단위로 가져와
//! Dataset으로 합칩니다. CSV 파일 URL도 직접 읽을 수 있습니다.

use std::future::Future;
use std::io::Read;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::dataset::{Dataset, Record, Value};
use crate::error::{FusionError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.data.gov.in/resource";

/// 페이지 크기
pub const PAGE_SIZE: usize = 1000;

/// 기본 최대 레코드 수
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// 페이지 사이 대기 시간
const PAGE_DELAY: Duration = Duration::from_millis(500);

/// CSV에서 null로 읽는 값
const CSV_NULL_MARKERS: &[&str] = &["NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "-"];

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    records: Option<Vec<Record>>,
}

/// data.gov.in API 클라이언트
#[derive(Debug, Clone)]
pub struct DataGovFetcher {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    page_delay: Duration,
}

impl DataGovFetcher {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FusionError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.into(),
            client,
            page_delay: PAGE_DELAY,
        })
    }

    /// 리소스 URL 생성 (쿼리 파라미터 포함)
    fn resource_url(
        &self,
        resource_id: &str,
        filters: Option<&Record>,
        limit: usize,
        offset: usize,
    ) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            resource_id
        ))
        .map_err(|e| FusionError::Fetch(format!("Invalid resource URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("api-key", &self.api_key)
                .append_pair("format", "json")
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(filters) = filters {
                query.append_pair("filters", &serde_json::to_string(filters)?);
            }
        }

        Ok(url)
    }

    /// 한 페이지 가져오기
    pub async fn fetch_page(
        &self,
        resource_id: &str,
        filters: Option<&Record>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        let url = self.resource_url(resource_id, filters, limit, offset)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FusionError::Fetch(format!("Error fetching {}: {}", resource_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FusionError::Fetch(format!(
                "{} returned {}",
                resource_id, status
            )));
        }

        let body: ResourceResponse = response
            .json()
            .await
            .map_err(|e| FusionError::Fetch(format!("Invalid response from {}: {}", resource_id, e)))?;

        match body.records {
            Some(records) => {
                tracing::info!("Fetched {} records from {}", records.len(), resource_id);
                Ok(records)
            }
            None => {
                tracing::warn!("No records found in response from {}", resource_id);
                Ok(Vec::new())
            }
        }
    }

    /// 전체 페이지 수집 (최대 `max_records`)
    pub async fn fetch_paginated(
        &self,
        resource_id: &str,
        filters: Option<&Record>,
        max_records: usize,
    ) -> Result<Dataset> {
        let records = collect_pages(PAGE_SIZE, max_records, self.page_delay, move |offset, limit| {
            self.fetch_page(resource_id, filters, limit, offset)
        })
        .await?;

        tracing::info!(
            "Fetched total of {} records from {}",
            records.len(),
            resource_id
        );
        Ok(Dataset::from_records(records))
    }
}

impl DataGovFetcher {
    /// CSV 파일 URL에서 데이터셋 읽기
    pub async fn fetch_csv(&self, url: &str) -> Result<Dataset> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FusionError::Fetch(format!("Error loading CSV from {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FusionError::Fetch(format!("{} returned {}", url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FusionError::Fetch(format!("Error reading CSV from {}: {}", url, e)))?;

        let data = parse_csv(body.as_ref())?;
        tracing::info!("Loaded {} rows of CSV from {}", data.num_rows(), url);
        Ok(data)
    }
}

/// CSV → Dataset
///
/// 첫 줄은 헤더입니다. 빈 칸과 `NA` 류 값은 null, 정수/실수로 읽히면 숫자,
/// 나머지는 문자열입니다. 길이가 다른 행은 헤더 길이에 맞춰 채우거나 자릅니다.
pub fn parse_csv<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let row: Vec<Value> = (0..columns.len())
            .map(|i| csv_cell(record.get(i).unwrap_or("")))
            .collect();
        rows.push(row);
    }

    Dataset::from_rows(columns, rows)
}

fn csv_err(e: csv::Error) -> FusionError {
    FusionError::InvalidInput(format!("Invalid CSV: {}", e))
}

fn csv_cell(raw: &str) -> Value {
    if raw.is_empty() || CSV_NULL_MARKERS.contains(&raw) {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Value::Float(v),
        _ => Value::from(raw),
    }
}

/// 페이지 루프
///
/// 빈 페이지나 짧은 페이지에서 멈추고, 결과는 `max_records`로 자릅니다.
/// 첫 페이지 실패는 에러이며 이후 실패는 그때까지의 결과를 반환합니다.
pub(crate) async fn collect_pages<F, Fut>(
    page_size: usize,
    max_records: usize,
    delay: Duration,
    mut fetch: F,
) -> Result<Vec<Record>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<Record>>>,
{
    let mut all = Vec::new();
    let mut offset = 0;

    while offset < max_records {
        let page = match fetch(offset, page_size).await {
            Ok(page) => page,
            Err(e) if offset == 0 => return Err(e),
            Err(e) => {
                tracing::warn!("Stopping pagination at offset {}: {}", offset, e);
                break;
            }
        };

        if page.is_empty() {
            break;
        }

        let fetched = page.len();
        all.extend(page);
        tracing::debug!("Fetched page at offset {} ({} records)", offset, fetched);

        if fetched < page_size {
            break;
        }

        offset += page_size;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    all.truncate(max_records);
    Ok(all)
}

/// 컬럼명 정규화 (소문자, 공백/하이픈 → `_`)
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    match Regex::new(r"[ \-]") {
        Ok(re) => re.replace_all(&lowered, "_").into_owned(),
        Err(_) => lowered.replace([' ', '-'], "_"),
    }
}

/// 데이터셋 정규화
///
/// 컬럼명을 정규화하고, 지정한 컬럼을 숫자로 변환(실패 시 null)한 뒤
/// 모든 값이 null인 행을 제거합니다.
pub fn normalize_dataset(mut data: Dataset, numeric_columns: &[&str]) -> Dataset {
    data.rename_columns(normalize_column_name);

    for column in numeric_columns {
        if !data.coerce_numeric(column) {
            tracing::debug!("Numeric column '{}' not present, skipping", column);
        }
    }

    data.drop_all_null_rows();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(start: usize, n: usize) -> Vec<Record> {
        (start..start + n)
            .map(|i| json!({ "id": i }).as_object().cloned().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_short_page() {
        let calls = AtomicUsize::new(0);
        let records = collect_pages(10, 100, Duration::ZERO, |offset, limit| {
            calls.fetch_add(1, Ordering::SeqCst);
            let n = if offset < 20 { limit } else { 3 };
            async move { Ok(page(offset, n)) }
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 23);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collect_pages_respects_max_records() {
        let records = collect_pages(10, 25, Duration::ZERO, |offset, limit| async move {
            Ok(page(offset, limit))
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 25);
        assert_eq!(records[24]["id"], json!(24));
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_empty_page() {
        let records = collect_pages(10, 100, Duration::ZERO, |offset, limit| async move {
            Ok(if offset == 0 { page(0, limit) } else { Vec::new() })
        })
        .await
        .unwrap();
        assert_eq!(records.len(), 10);
    }

    #[tokio::test]
    async fn test_collect_pages_errors() {
        let result = collect_pages(10, 100, Duration::ZERO, |_, _| async {
            Err(FusionError::Fetch("down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(FusionError::Fetch(_))));

        // 이후 페이지 실패는 부분 결과
        let records = collect_pages(10, 100, Duration::ZERO, |offset, limit| async move {
            if offset == 0 {
                Ok(page(0, limit))
            } else {
                Err(FusionError::Fetch("down".to_string()))
            }
        })
        .await
        .unwrap();
        assert_eq!(records.len(), 10);
    }

    #[test]
    fn test_resource_url() {
        let fetcher = DataGovFetcher::new("KEY".to_string(), DEFAULT_BASE_URL).unwrap();
        let filters = json!({"state": "Kerala"}).as_object().cloned().unwrap();
        let url = fetcher
            .resource_url("abc-123", Some(&filters), 1000, 2000)
            .unwrap();

        assert_eq!(url.path(), "/resource/abc-123");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("api-key".to_string(), "KEY".to_string())));
        assert!(pairs.contains(&("offset".to_string(), "2000".to_string())));
        assert!(pairs.contains(&("filters".to_string(), r#"{"state":"Kerala"}"#.to_string())));
    }

    #[test]
    fn test_parse_csv() {
        let text = "State Name,Year,Rainfall\n\
                   Kerala,2020,3000.5\n\
                   \"Tamil Nadu, South\",2021,NA\n\
                   Punjab,,600\n\
                   Goa\n";
        let data = parse_csv(text.as_bytes()).unwrap();

        assert_eq!(data.columns(), &["State Name", "Year", "Rainfall"]);
        assert_eq!(data.num_rows(), 4);
        assert_eq!(data.value(0, "Rainfall"), Some(&Value::Float(3000.5)));
        assert_eq!(data.value(1, "State Name"), Some(&Value::from("Tamil Nadu, South")));
        assert_eq!(data.value(1, "Year"), Some(&Value::Int(2021)));
        assert!(data.value(1, "Rainfall").unwrap().is_null());
        assert!(data.value(2, "Year").unwrap().is_null());
        assert!(data.value(3, "Rainfall").unwrap().is_null());

        let data = normalize_dataset(data, &[]);
        assert_eq!(data.columns(), &["state_name", "year", "rainfall"]);
    }

    #[test]
    fn test_parse_csv_headers_only() {
        let data = parse_csv("a,b\n".as_bytes()).unwrap();
        assert_eq!(data.columns(), &["a", "b"]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_normalize_dataset() {
        let records = vec![
            json!({"State Name": "Kerala", "Rainfall-MM": "1,200", "Year": "2020"}),
            json!({"State Name": null, "Rainfall-MM": "NA", "Year": null}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let data = normalize_dataset(Dataset::from_records(records), &["rainfall_mm", "year"]);

        assert_eq!(data.columns(), &["state_name", "rainfall_mm", "year"]);
        assert_eq!(data.num_rows(), 1);
        assert_eq!(data.value(0, "rainfall_mm"), Some(&Value::Int(1200)));
        assert_eq!(data.value(0, "year"), Some(&Value::Int(2020)));
    }
}
