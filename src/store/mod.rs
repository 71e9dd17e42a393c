//! Dataset Store - rusqlite 기반 best-effort 영속화
//!
//! 레지스트리에 등록된 데이터셋과 질의 로그를 저장합니다.
//! 트랜잭션 저장 엔진이 아니라 재시작 시 복원을 위한 보조 저장소입니다.
//! 저장 위치: `<data_dir>/govdata.db`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::dataset::{ColumnType, Dataset, DatasetMetadata, Value};
use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// 질의 로그 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub query_text: String,
    pub response_confidence: f32,
    /// 답변에 사용된 출처 데이터셋 이름
    pub sources_used: Vec<String>,
    /// 처리 시간 (초)
    pub execution_time: f64,
    pub policy_mode: bool,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub dataset_count: usize,
    pub record_count: usize,
    pub query_count: usize,
    pub db_path: PathBuf,
}

/// datasets.schema_info 컬럼에 저장되는 스키마
#[derive(Debug, Serialize, Deserialize)]
struct SchemaInfo {
    columns: Vec<String>,
    dtypes: BTreeMap<String, ColumnType>,
}

// ============================================================================
// DatasetStore
// ============================================================================

/// SQLite 데이터셋 저장소
pub struct DatasetStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DatasetStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 연결 잠금 (poison 상태여도 연결을 그대로 사용)
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                key_columns TEXT NOT NULL DEFAULT '[]',
                time_column TEXT,
                row_count INTEGER NOT NULL,
                column_count INTEGER NOT NULL,
                schema_info TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS data_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
                row_index INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_dataset ON data_records(dataset_id, row_index);

            CREATE TABLE IF NOT EXISTS query_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_text TEXT NOT NULL,
                response_confidence REAL NOT NULL,
                sources_used TEXT NOT NULL,
                execution_time REAL NOT NULL,
                policy_mode INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!("Dataset store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 데이터셋 저장 (같은 이름은 교체)
    pub fn save_dataset(&self, metadata: &DatasetMetadata, data: &Dataset) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let created_at: Option<String> = tx
            .query_row(
                "SELECT created_at FROM datasets WHERE name = ?1",
                params![metadata.name],
                |row| row.get(0),
            )
            .ok();

        tx.execute("DELETE FROM datasets WHERE name = ?1", params![metadata.name])?;

        let schema = SchemaInfo {
            columns: metadata.columns.clone(),
            dtypes: metadata.dtypes.clone(),
        };
        let now = metadata.registered_at.to_rfc3339();

        tx.execute(
            "INSERT INTO datasets
                (name, description, key_columns, time_column, row_count, column_count,
                 schema_info, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                metadata.name,
                metadata.description,
                serde_json::to_string(&metadata.key_columns)?,
                metadata.time_column,
                metadata.row_count as i64,
                metadata.column_count as i64,
                serde_json::to_string(&schema)?,
                created_at.unwrap_or_else(|| now.clone()),
                now,
            ],
        )?;
        let dataset_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO data_records (dataset_id, row_index, data) VALUES (?1, ?2, ?3)",
            )?;
            for (i, row) in data.rows().iter().enumerate() {
                stmt.execute(params![dataset_id, i as i64, serde_json::to_string(row)?])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "Persisted dataset '{}' ({} rows)",
            metadata.name,
            data.num_rows()
        );
        Ok(())
    }

    /// 저장된 모든 데이터셋 로드
    pub fn load_datasets(&self) -> Result<Vec<(DatasetMetadata, Dataset)>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT id, name, description, key_columns, time_column, schema_info, updated_at
             FROM datasets ORDER BY name",
        )?;

        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut record_stmt =
            conn.prepare("SELECT data FROM data_records WHERE dataset_id = ?1 ORDER BY row_index")?;

        let mut datasets = Vec::with_capacity(headers.len());

        for (id, name, description, key_columns, time_column, schema_info, updated_at) in headers {
            let schema: SchemaInfo = serde_json::from_str(&schema_info)?;

            let rows = record_stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .map(|raw| -> Result<Vec<Value>> {
                    let raw = raw?;
                    Ok(serde_json::from_str::<Vec<Value>>(&raw)?)
                })
                .collect::<Result<Vec<_>>>()?;

            let data = Dataset::from_rows(schema.columns.clone(), rows)?;

            let metadata = DatasetMetadata {
                name,
                description,
                columns: schema.columns,
                key_columns: serde_json::from_str(&key_columns)?,
                time_column,
                row_count: data.num_rows(),
                column_count: data.num_columns(),
                dtypes: schema.dtypes,
                registered_at: parse_datetime(&updated_at),
            };

            datasets.push((metadata, data));
        }

        Ok(datasets)
    }

    /// 데이터셋 삭제
    pub fn delete_dataset(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM datasets WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    /// 질의 로그 기록
    pub fn log_query(&self, entry: &QueryLogEntry) -> Result<i64> {
        let conn = self.lock();

        conn.execute(
            "INSERT INTO query_logs
                (query_text, response_confidence, sources_used, execution_time, policy_mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.query_text,
                entry.response_confidence as f64,
                serde_json::to_string(&entry.sources_used)?,
                entry.execution_time,
                entry.policy_mode,
                entry.created_at.to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 최근 질의 로그 (최신순)
    pub fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT query_text, response_confidence, sources_used, execution_time, policy_mode, created_at
             FROM query_logs ORDER BY id DESC LIMIT ?1",
        )?;

        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(query_text, confidence, sources, execution_time, policy_mode, created_at)| {
                let sources_used: Vec<String> = serde_json::from_str(&sources)?;
                Ok(QueryLogEntry {
                    query_text,
                    response_confidence: confidence as f32,
                    sources_used,
                    execution_time,
                    policy_mode,
                    created_at: parse_datetime(&created_at),
                })
            })
            .collect()
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();

        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap_or(0) };

        Ok(StoreStats {
            dataset_count: count("SELECT COUNT(*) FROM datasets") as usize,
            record_count: count("SELECT COUNT(*) FROM data_records") as usize,
            query_count: count("SELECT COUNT(*) FROM query_logs") as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
