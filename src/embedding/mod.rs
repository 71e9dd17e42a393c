//! 임베딩 모듈 - 텍스트 벡터화
//!
//! - GeminiEmbedding: Gemini `batchEmbedContents` API (Rate limit + 429 재시도)
//! - HashEmbedding: 로컬 feature hashing (오프라인/테스트용, 결정적)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env_with_dimension(768)?;
//! let vectors = embedder.embed_batch(&texts).await?;
//! ```

mod hash;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EmbeddingBackend;
use crate::error::{FusionError, Result};

pub use hash::HashEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 같은 세션 안에서 같은 텍스트는 같은 벡터를 반환해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

const GEMINI_MODEL: &str = "models/gemini-embedding-001";

/// 배치 임베딩 엔드포인트
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_BATCH_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:batchEmbedContents";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 요청 1회당 최대 텍스트 수
const MAX_BATCH_SIZE: usize = 100;

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

impl GeminiEmbedding {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성 (768, 1536, 3072)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(FusionError::Embedding(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FusionError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
            ))),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        Self::with_dimension(get_api_key()?, dimension)
    }

    /// 배치 1회 요청 (429 시 지수 백오프 재시도)
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: GEMINI_MODEL.to_string(),
                    content: EmbedContent {
                        parts: vec![EmbedPart { text: text.clone() }],
                    },
                    task_type: "RETRIEVAL_DOCUMENT".to_string(),
                    output_dimensionality: Some(self.dimension),
                })
                .collect(),
        };

        let mut last_error: Option<FusionError> = None;

        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_BATCH_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(FusionError::Embedding(format!(
                        "Failed to send embedding request: {}",
                        e
                    )));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| FusionError::Embedding(format!("Failed to read response body: {}", e)))?;

            if status.is_success() {
                let parsed: BatchEmbedResponse = serde_json::from_str(&body).map_err(|e| {
                    FusionError::Embedding(format!("Failed to parse embedding response: {}", e))
                })?;
                if parsed.embeddings.len() != texts.len() {
                    return Err(FusionError::Embedding(format!(
                        "Expected {} embeddings, got {}",
                        texts.len(),
                        parsed.embeddings.len()
                    )));
                }
                return Ok(parsed.embeddings.into_iter().map(|e| e.values).collect());
            }

            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(FusionError::Embedding("Rate limit exceeded (429)".to_string()));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                let message = match serde_json::from_str::<GeminiError>(&body) {
                    Ok(error) => format!(
                        "Gemini API error ({}): {}",
                        error.error.status, error.error.message
                    ),
                    Err(_) => format!("Gemini API error ({}): {}", status, body),
                };
                return Err(FusionError::Embedding(message));
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FusionError::Embedding(format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
    }
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| FusionError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = vec![Vec::new(); texts.len()];

        // 빈 텍스트는 API에 보내지 않고 0 벡터로 채움
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        for (i, slot) in results.iter_mut().enumerate() {
            if texts[i].trim().is_empty() {
                *slot = vec![0.0; self.dimension];
            }
        }

        let total_chunks = pending.len().div_ceil(MAX_BATCH_SIZE);
        for (n, chunk) in pending.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!("Embedding batch {}/{}", n + 1, total_chunks);
            let batch: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.request_batch(&batch).await?;
            for (&i, vector) in chunk.iter().zip(vectors) {
                results[i] = vector;
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (GEMINI_API_KEY > GOOGLE_AI_API_KEY)
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(FusionError::Embedding(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable."
            .to_string(),
    ))
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성
///
/// Gemini는 전달된 API 키를 사용하고, 없으면 환경 변수에서 찾습니다.
pub fn create_embedder(
    backend: EmbeddingBackend,
    api_key: Option<String>,
    dimension: usize,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::new(dimension)),
        EmbeddingBackend::Gemini => match api_key {
            Some(key) => Arc::new(GeminiEmbedding::with_dimension(key, dimension)?),
            None => Arc::new(GeminiEmbedding::from_env_with_dimension(dimension)?),
        },
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
