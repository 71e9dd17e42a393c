//! 설정 - 환경 변수 기반
//!
//! 숫자 값이 잘못되면 경고를 남기고 기본값을 사용합니다.

use std::path::PathBuf;
use std::str::FromStr;

use crate::embedding::DEFAULT_DIMENSION;
use crate::fetch::DEFAULT_BASE_URL;
use crate::rag::DEFAULT_MODEL;
use crate::retrieval::{DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_K};

/// 기본 데이터 디렉토리 (`<data_local_dir>/.govdata-rag`)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".govdata-rag")
}

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Gemini,
    /// 오프라인 해시 임베딩
    Hash,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Gemini => "gemini",
            EmbeddingBackend::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub hf_api_token: Option<String>,
    pub hf_model: String,
    pub gemini_api_key: Option<String>,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_dimension: usize,
    pub data_gov_api_key: Option<String>,
    pub data_gov_base_url: String,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub data_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_AI_API_KEY"));

        let embedding_backend = match get("EMBEDDING_PROVIDER").as_deref().map(str::trim) {
            Some("gemini") => EmbeddingBackend::Gemini,
            Some("hash") => EmbeddingBackend::Hash,
            other => {
                if let Some(value) = other {
                    tracing::warn!("Unknown EMBEDDING_PROVIDER '{}', using default", value);
                }
                if gemini_api_key.is_some() {
                    EmbeddingBackend::Gemini
                } else {
                    EmbeddingBackend::Hash
                }
            }
        };

        Self {
            hf_api_token: get("HF_API_TOKEN"),
            hf_model: get("HF_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_api_key,
            embedding_backend,
            embedding_dimension: parse_or(
                "EMBEDDING_DIMENSION",
                get("EMBEDDING_DIMENSION"),
                DEFAULT_DIMENSION,
            ),
            data_gov_api_key: get("DATA_GOV_API_KEY"),
            data_gov_base_url: get("DATA_GOV_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            top_k: parse_or("TOP_K_RESULTS", get("TOP_K_RESULTS"), DEFAULT_TOP_K),
            similarity_threshold: parse_or(
                "SIMILARITY_THRESHOLD",
                get("SIMILARITY_THRESHOLD"),
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            max_new_tokens: parse_or("MAX_NEW_TOKENS", get("MAX_NEW_TOKENS"), 1024),
            temperature: parse_or("TEMPERATURE", get("TEMPERATURE"), 0.7),
            data_dir: get("GOVDATA_RAG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        }
    }

    /// SQLite 파일 경로
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("govdata.db")
    }

    /// LanceDB 디렉토리
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Invalid value for {}: '{}', using default", key, raw);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert_eq!(s.hf_model, DEFAULT_MODEL);
        assert_eq!(s.embedding_backend, EmbeddingBackend::Hash);
        assert_eq!(s.embedding_dimension, 768);
        assert_eq!(s.top_k, 5);
        assert!((s.similarity_threshold - 0.7).abs() < 1e-6);
        assert_eq!(s.max_new_tokens, 1024);
        assert_eq!(s.data_gov_base_url, DEFAULT_BASE_URL);
        assert!(s.data_dir.ends_with(".govdata-rag"));
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let s = settings(&[
            ("GOOGLE_AI_API_KEY", "g-key"),
            ("TOP_K_RESULTS", "8"),
            ("SIMILARITY_THRESHOLD", "not-a-number"),
            ("TEMPERATURE", " 0.2 "),
            ("GOVDATA_RAG_DIR", "/tmp/govdata"),
        ]);

        assert_eq!(s.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(s.embedding_backend, EmbeddingBackend::Gemini);
        assert_eq!(s.top_k, 8);
        assert!((s.similarity_threshold - 0.7).abs() < 1e-6);
        assert!((s.temperature - 0.2).abs() < 1e-6);
        assert_eq!(s.database_path(), PathBuf::from("/tmp/govdata/govdata.db"));
    }

    #[test]
    fn test_explicit_provider_wins() {
        let s = settings(&[("GEMINI_API_KEY", "k"), ("EMBEDDING_PROVIDER", "hash")]);
        assert_eq!(s.embedding_backend, EmbeddingBackend::Hash);

        let s = settings(&[("EMBEDDING_PROVIDER", "openai")]);
        assert_eq!(s.embedding_backend, EmbeddingBackend::Hash);
    }
}
