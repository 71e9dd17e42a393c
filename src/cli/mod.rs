//! CLI 모듈
//!
//! govdata-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::dataset::{Dataset, DatasetInfo, Record};
use crate::engine::FusionEngine;
use crate::fetch::{normalize_dataset, parse_csv, DataGovFetcher, DEFAULT_MAX_RECORDS};
use crate::index::MetadataFilter;
use crate::query::{Aggregation, Filters, JoinType, QueryOptions};
use crate::rag::{IndexOptions, PromptStyle};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "govdata-rag")]
#[command(version, about = "공공 데이터셋 하이브리드 질의 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// data.gov.in 리소스, JSON 또는 CSV를 데이터셋으로 등록하고 색인
    Ingest {
        /// data.gov.in 리소스 ID
        #[arg(short, long)]
        resource: Option<String>,

        /// JSON 레코드 파일 (배열 또는 {"records": [...]})
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// CSV 파일 경로 또는 URL
        #[arg(long)]
        csv: Option<String>,

        /// 데이터셋 이름 (기본: 리소스 ID 또는 파일 이름)
        #[arg(short, long)]
        name: Option<String>,

        /// 데이터셋 설명
        #[arg(short, long, default_value = "")]
        description: String,

        /// 숫자로 변환할 컬럼 (정규화 후 이름)
        #[arg(long, value_delimiter = ',')]
        numeric: Vec<String>,

        /// 조인 키 컬럼
        #[arg(long, value_delimiter = ',')]
        key_columns: Vec<String>,

        /// 시간 컬럼
        #[arg(long)]
        time_column: Option<String>,

        /// 문서 메타데이터로 복사할 컬럼, 정규화 후 이름 (기본: 키 컬럼 + 시간 컬럼)
        #[arg(long, value_delimiter = ',')]
        metadata_columns: Vec<String>,

        /// 문서 텍스트 템플릿 (예: "{state}의 {year}년 강수량은 {rainfall}mm")
        #[arg(long)]
        template: Option<String>,

        /// API 필터 (col=value, 반복 가능)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// 최대 레코드 수
        #[arg(long, default_value_t = DEFAULT_MAX_RECORDS)]
        max_records: usize,
    },

    /// 자연어 질문
    Ask {
        /// 질문
        question: String,

        /// 정책 제언 추가 생성
        #[arg(short, long)]
        policy: bool,

        /// 간결한 프롬프트 사용
        #[arg(long)]
        concise: bool,

        /// JSON 출력
        #[arg(long)]
        json: bool,

        /// 문서 메타데이터 조건 (col=value, 반복 가능)
        #[arg(long = "where")]
        conditions: Vec<String>,
    },

    /// 등록된 데이터셋 목록
    Datasets,

    /// 데이터셋 조회
    Query {
        /// 데이터셋 이름
        dataset: String,

        /// 필터 (col=value, 반복 가능)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// 출력 컬럼
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// 결과 행 수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 그룹 집계
    Aggregate {
        /// 데이터셋 이름
        dataset: String,

        /// 그룹 컬럼
        #[arg(short, long, value_delimiter = ',', required = true)]
        group_by: Vec<String>,

        /// 집계 (column=func, 반복 가능)
        #[arg(short, long = "agg", required = true)]
        aggregations: Vec<String>,

        /// 필터 (col=value, 반복 가능)
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// 두 데이터셋 조인
    Merge {
        left: String,
        right: String,

        /// 조인 키 (생략 시 공통 컬럼)
        #[arg(long, value_delimiter = ',')]
        on: Vec<String>,

        /// inner | left | right | outer
        #[arg(long, default_value = "inner")]
        how: String,

        /// 결과 행 수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 두 데이터셋 컬럼 간 상관계수
    Correlate {
        left: String,
        right: String,
        left_column: String,
        right_column: String,

        /// 조인 키
        #[arg(long, value_delimiter = ',', required = true)]
        on: Vec<String>,
    },

    /// 시계열 추세 분석
    Trend {
        dataset: String,
        time_column: String,
        value_column: String,

        /// 그룹 컬럼
        #[arg(short, long)]
        group_by: Option<String>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();

    if let Commands::Status = cli.command {
        return cmd_status(&settings).await;
    }

    let engine = FusionEngine::from_settings(&settings)
        .await
        .context("엔진 초기화 실패")?;

    match cli.command {
        Commands::Ingest {
            resource,
            file,
            csv,
            name,
            description,
            numeric,
            key_columns,
            time_column,
            metadata_columns,
            template,
            filters,
            max_records,
        } => {
            let source = Source::select(resource, file, csv)?;
            let mut info = DatasetInfo::new(description);
            info.key_columns = key_columns;
            info.time_column = time_column;

            let mut options = IndexOptions::from_info(&info);
            if !metadata_columns.is_empty() {
                options.metadata_columns = metadata_columns;
            }
            options.text_template = template;

            let request = IngestRequest {
                source,
                name,
                info,
                options,
                numeric,
                filters,
                max_records,
            };
            cmd_ingest(&engine, &settings, request).await
        }
        Commands::Ask {
            question,
            policy,
            concise,
            json,
            conditions,
        } => {
            let style = if concise {
                PromptStyle::Concise
            } else {
                PromptStyle::Reasoning
            };
            cmd_ask(&engine, &question, policy, style, json, &conditions).await
        }
        Commands::Datasets => cmd_datasets(&engine),
        Commands::Query {
            dataset,
            filters,
            columns,
            limit,
        } => cmd_query(&engine, &dataset, &filters, &columns, limit),
        Commands::Aggregate {
            dataset,
            group_by,
            aggregations,
            filters,
        } => cmd_aggregate(&engine, &dataset, &group_by, &aggregations, &filters),
        Commands::Merge {
            left,
            right,
            on,
            how,
            limit,
        } => cmd_merge(&engine, &left, &right, &on, &how, limit),
        Commands::Correlate {
            left,
            right,
            left_column,
            right_column,
            on,
        } => cmd_correlate(&engine, &left, &right, &left_column, &right_column, &on),
        Commands::Trend {
            dataset,
            time_column,
            value_column,
            group_by,
        } => cmd_trend(
            &engine,
            &dataset,
            &time_column,
            &value_column,
            group_by.as_deref(),
        ),
        Commands::Status => Ok(()),
    }
}

#[derive(Debug, PartialEq)]
enum Source {
    Resource(String),
    File(PathBuf),
    CsvFile(PathBuf),
    CsvUrl(String),
}

impl Source {
    /// 입력 옵션 중 정확히 하나만 허용
    fn select(resource: Option<String>, file: Option<PathBuf>, csv: Option<String>) -> Result<Self> {
        match (resource, file, csv) {
            (Some(resource), None, None) => Ok(Source::Resource(resource)),
            (None, Some(file), None) => Ok(Source::File(file)),
            (None, None, Some(csv)) if is_url(&csv) => Ok(Source::CsvUrl(csv)),
            (None, None, Some(csv)) => Ok(Source::CsvFile(PathBuf::from(csv))),
            _ => bail!("--resource, --file, --csv 중 하나를 지정하세요."),
        }
    }
}

struct IngestRequest {
    source: Source,
    name: Option<String>,
    info: DatasetInfo,
    options: IndexOptions,
    numeric: Vec<String>,
    filters: Vec<String>,
    max_records: usize,
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 데이터셋 수집 명령어 (ingest)
///
/// 가져온 레코드를 정규화해 등록한 뒤 색인이 끝날 때까지 기다립니다.
async fn cmd_ingest(
    engine: &FusionEngine,
    settings: &Settings,
    request: IngestRequest,
) -> Result<()> {
    let IngestRequest {
        source,
        name,
        info,
        options,
        numeric,
        filters,
        max_records,
    } = request;

    let (default_name, data) = match source {
        Source::Resource(resource) => {
            let Some(api_key) = settings.data_gov_api_key.clone() else {
                bail!(
                    "data.gov.in API 키가 설정되지 않았습니다.\n\n\
                     설정 방법:\n  \
                     export DATA_GOV_API_KEY=your-api-key\n\n\
                     API 키 발급: https://data.gov.in"
                );
            };

            println!("[*] data.gov.in 리소스 수집 중: {}", resource);
            let fetcher = DataGovFetcher::new(api_key, settings.data_gov_base_url.as_str())
                .context("DataGovFetcher 생성 실패")?;
            let filters = (!filters.is_empty())
                .then(|| parse_pairs(&filters))
                .transpose()?;
            let data = fetcher
                .fetch_paginated(&resource, filters.as_ref(), max_records)
                .await
                .context("리소스 수집 실패")?;
            (resource, data)
        }
        Source::File(path) => {
            println!("[*] 파일 읽는 중: {}", path.display());
            let records = read_records(&path)?;
            (file_stem(&path), Dataset::from_records(records))
        }
        Source::CsvFile(path) => {
            println!("[*] CSV 파일 읽는 중: {}", path.display());
            (file_stem(&path), read_csv(&path)?)
        }
        Source::CsvUrl(url) => {
            println!("[*] CSV 다운로드 중: {}", url);
            let fetcher = DataGovFetcher::new(
                settings.data_gov_api_key.clone().unwrap_or_default(),
                settings.data_gov_base_url.as_str(),
            )
            .context("DataGovFetcher 생성 실패")?;
            let data = fetcher.fetch_csv(&url).await.context("CSV 수집 실패")?;
            (url_stem(&url), data)
        }
    };

    if data.is_empty() {
        println!("[!] 수집된 레코드가 없습니다.");
        return Ok(());
    }

    let numeric: Vec<&str> = numeric.iter().map(String::as_str).collect();
    let data = normalize_dataset(data, &numeric);
    let name = name.unwrap_or(default_name);

    let (metadata, handle) = engine.ingest_with(&name, data, info, options);
    println!(
        "[OK] 데이터셋 '{}' 등록됨 ({} 행, {} 컬럼)",
        metadata.name, metadata.row_count, metadata.column_count
    );

    println!("[*] 벡터 색인 중...");
    let indexed = handle.await.context("색인 태스크 실패")??;
    println!("[OK] {} 개 문서 색인됨", indexed);

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    engine: &FusionEngine,
    question: &str,
    policy: bool,
    style: PromptStyle,
    json: bool,
    conditions: &[String],
) -> Result<()> {
    if !json {
        println!("[*] 질문: \"{}\"", question);
    }

    let filter = parse_conditions(conditions)?;
    let rag = engine
        .ask(question, policy, style, filter.as_ref())
        .await
        .context("답변 생성 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rag)?);
        return Ok(());
    }

    let marker = if rag.answer.is_grounded() { "[OK]" } else { "[!]" };
    println!("\n{} 답변:\n", marker);
    println!("{}", rag.answer);
    println!();
    println!("     신뢰도: {:.2}", rag.confidence);

    if !rag.sources.is_empty() {
        println!("     출처 ({} 건):", rag.source_count);
        for (i, source) in rag.sources.iter().enumerate() {
            let dataset = source.get("dataset").map(String::as_str).unwrap_or("Unknown");
            let row = source.get("row_id").map(String::as_str).unwrap_or("-");
            println!("       {}. {} (row {})", i + 1, dataset, row);
        }
    }

    if let Some(insights) = &rag.policy_insights {
        println!("\n[OK] 정책 제언:\n");
        println!("{}", insights);
    }

    Ok(())
}

/// 데이터셋 목록 명령어 (datasets)
fn cmd_datasets(engine: &FusionEngine) -> Result<()> {
    let datasets = engine.registry().list();

    if datasets.is_empty() {
        println!("[!] 등록된 데이터셋이 없습니다.");
        return Ok(());
    }

    println!("[OK] 등록된 데이터셋 ({} 건):\n", datasets.len());
    for meta in &datasets {
        println!("  {} ({} 행, {} 컬럼)", meta.name, meta.row_count, meta.column_count);
        if !meta.description.is_empty() {
            println!("        설명: {}", truncate_text(&meta.description, 80));
        }
        let numeric: Vec<&str> = meta
            .dtypes
            .iter()
            .filter(|(_, t)| t.is_numeric())
            .map(|(c, _)| c.as_str())
            .collect();
        println!("        컬럼: {}", meta.columns.join(", "));
        if !numeric.is_empty() {
            println!("        숫자 컬럼: {}", numeric.join(", "));
        }
        if !meta.key_columns.is_empty() {
            println!("        조인 키: {}", meta.key_columns.join(", "));
        }
        if let Some(time) = &meta.time_column {
            println!("        시간 컬럼: {}", time);
        }
        println!(
            "        등록: {}",
            meta.registered_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// 조회 명령어 (query)
fn cmd_query(
    engine: &FusionEngine,
    dataset: &str,
    filters: &[String],
    columns: &[String],
    limit: usize,
) -> Result<()> {
    let mut options = QueryOptions::new()
        .filters(Filters::from_json(&parse_pairs(filters)?))
        .limit(limit);
    if !columns.is_empty() {
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        options = options.columns(&columns);
    }

    let result = engine.query_engine().query(dataset, &options);
    print_dataset(&result)
}

/// 집계 명령어 (aggregate)
fn cmd_aggregate(
    engine: &FusionEngine,
    dataset: &str,
    group_by: &[String],
    aggregations: &[String],
    filters: &[String],
) -> Result<()> {
    let aggregation = Aggregation::parse(aggregations).context("집계 형식 오류")?;
    let filters = Filters::from_json(&parse_pairs(filters)?);

    let result = engine
        .query_engine()
        .aggregate(dataset, group_by, &aggregation, &filters)
        .context("집계 실패")?;
    print_dataset(&result)
}

/// 조인 명령어 (merge)
fn cmd_merge(
    engine: &FusionEngine,
    left: &str,
    right: &str,
    on: &[String],
    how: &str,
    limit: usize,
) -> Result<()> {
    let how: JoinType = how.parse()?;
    let on = (!on.is_empty()).then_some(on);

    let mut result = engine
        .query_engine()
        .merge(left, right, on, how)
        .context("조인 실패")?;
    let total = result.num_rows();
    result.truncate(limit);

    print_dataset(&result)?;
    if total > limit {
        println!("     (전체 {} 행 중 {} 행 표시)", total, limit);
    }
    Ok(())
}

/// 상관분석 명령어 (correlate)
fn cmd_correlate(
    engine: &FusionEngine,
    left: &str,
    right: &str,
    left_column: &str,
    right_column: &str,
    on: &[String],
) -> Result<()> {
    let correlation = engine
        .analyzer()
        .correlate(left, right, left_column, right_column, on)
        .context("상관분석 실패")?;

    if !correlation.is_defined() {
        println!(
            "[!] 상관계수를 계산할 수 없습니다 (짝지어진 관측치 {} 개)",
            correlation.paired.num_rows()
        );
        return Ok(());
    }

    println!(
        "[OK] {}.{} ~ {}.{}: r = {:.4}",
        left, left_column, right, right_column, correlation.coefficient
    );
    println!("     관측치: {} 개", correlation.paired.num_rows());
    Ok(())
}

/// 추세 명령어 (trend)
fn cmd_trend(
    engine: &FusionEngine,
    dataset: &str,
    time_column: &str,
    value_column: &str,
    group_by: Option<&str>,
) -> Result<()> {
    let report = engine
        .analyzer()
        .time_series(dataset, time_column, value_column, group_by)
        .context("시계열 분석 실패")?;

    match report {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("[!] 데이터셋 '{}'을(를) 찾을 수 없거나 비어 있습니다.", dataset),
    }
    Ok(())
}

/// 상태 명령어 (status)
///
/// 설정과 저장소 상태를 확인합니다.
async fn cmd_status(settings: &Settings) -> Result<()> {
    println!("govdata-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());
    println!(
        "[*] 임베딩: {} (dimension: {})",
        settings.embedding_backend.as_str(),
        settings.embedding_dimension
    );
    println!("[*] 언어 모델: {}", settings.hf_model);

    for (label, present, var) in [
        ("Gemini API 키", settings.gemini_api_key.is_some(), "GEMINI_API_KEY"),
        ("HuggingFace 토큰", settings.hf_api_token.is_some(), "HF_API_TOKEN"),
        ("data.gov.in API 키", settings.data_gov_api_key.is_some(), "DATA_GOV_API_KEY"),
    ] {
        if present {
            println!("[OK] {}: 설정됨", label);
        } else {
            println!("[!] {}: 미설정", label);
            println!("    설정: export {}=your-key", var);
        }
    }

    let engine = match FusionEngine::from_settings(settings).await {
        Ok(engine) => engine,
        Err(e) => {
            println!("[!] 엔진 초기화 실패: {}", e);
            return Ok(());
        }
    };

    if let Some(store) = engine.registry().store() {
        match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 데이터셋: {} 건", stats.dataset_count);
                println!("     총 레코드: {} 건", stats.record_count);
                println!("     질의 로그: {} 건", stats.query_count);
            }
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        }

        if let Ok(recent) = store.recent_queries(3) {
            for entry in recent {
                println!(
                    "       - \"{}\" (신뢰도 {:.2}, {:.1}s)",
                    truncate_text(&entry.query_text, 60),
                    entry.response_confidence,
                    entry.execution_time
                );
            }
        }
    }

    let pipeline = engine.pipeline();
    match pipeline
        .retriever()
        .documents()
        .count(pipeline.collection())
        .await
    {
        Ok(count) => println!("[OK] 벡터 인덱스: {} 문서", count),
        Err(e) => tracing::debug!("Failed to count vector index: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// JSON 레코드 파일 읽기
fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).context("JSON 파싱 실패")?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("records") {
            Some(serde_json::Value::Array(items)) => items,
            _ => bail!("\"records\" 배열이 없습니다."),
        },
        _ => bail!("레코드 배열 또는 {{\"records\": [...]}} 형식이어야 합니다."),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::Object(record) => Some(record),
            other => {
                tracing::warn!("Skipping non-object record: {}", other);
                None
            }
        })
        .collect())
}

/// CSV 파일 읽기
fn read_csv(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
    parse_csv(file).context("CSV 파싱 실패")
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

/// URL 마지막 경로 조각의 파일 이름 (확장자 제외)
fn url_stem(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let path = without_scheme.split_once('/').map_or("", |(_, path)| path);
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");

    match last.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        None if !last.is_empty() => last.to_string(),
        _ => "dataset".to_string(),
    }
}

/// `col=value` 목록을 메타데이터 조건으로 변환 (비어 있으면 None)
fn parse_conditions(conditions: &[String]) -> Result<Option<MetadataFilter>> {
    if conditions.is_empty() {
        return Ok(None);
    }

    let mut filter = MetadataFilter::new();
    for condition in conditions {
        let Some((column, value)) = condition.split_once('=') else {
            bail!("조건 형식 오류: '{}' (col=value)", condition);
        };
        filter.insert(column.trim().to_string(), value.trim().to_string());
    }
    Ok(Some(filter))
}

/// `col=value` 목록을 JSON 객체로 변환
///
/// 값이 JSON으로 해석되면 그대로 쓰고 (숫자, 배열), 아니면 문자열입니다.
fn parse_pairs(pairs: &[String]) -> Result<Record> {
    let mut map = Record::new();
    for pair in pairs {
        let Some((column, raw)) = pair.split_once('=') else {
            bail!("필터 형식 오류: '{}' (col=value)", pair);
        };
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| serde_json::Value::String(raw.trim().to_string()));
        map.insert(column.trim().to_string(), value);
    }
    Ok(map)
}

/// 결과 데이터셋 출력 (한 행에 JSON 한 줄)
fn print_dataset(data: &Dataset) -> Result<()> {
    if data.is_empty() {
        println!("[!] 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] {} 행, {} 컬럼\n", data.num_rows(), data.num_columns());
    for record in data.to_records() {
        println!("  {}", serde_json::to_string(&record)?);
    }
    println!();
    Ok(())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
