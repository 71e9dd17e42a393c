//! 언어 모델 클라이언트
//!
//! HuggingFace Inference API text-generation 엔드포인트를 사용합니다.
//! source: https://huggingface.co/docs/api-inference/tasks/text-generation

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};

/// 생성 파라미터
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub do_sample: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            do_sample: true,
        }
    }
}

/// 언어 모델 트레이트
///
/// 실패는 `FusionError::Generation`으로 구분됩니다.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    fn name(&self) -> &str;
}

pub const DEFAULT_MODEL: &str = "mistralai/Mixtral-8x7B-Instruct-v0.1";
const HF_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// 429/503 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

/// HuggingFace Inference API 클라이언트
#[derive(Debug)]
pub struct HuggingFaceInference {
    token: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct Generated {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Many(Vec<Generated>),
    One(Generated),
    Error { error: String },
}

impl HuggingFaceInference {
    pub fn new(token: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FusionError::Generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            token,
            model: model.into(),
            base_url: HF_INFERENCE_URL.to_string(),
            client,
        })
    }

    /// 엔드포인트 변경 (자체 호스팅 TGI 등)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.model)
    }

    fn parse_response(body: &str) -> Result<String> {
        let parsed: GenerateResponse = serde_json::from_str(body)
            .map_err(|e| FusionError::Generation(format!("Failed to parse response: {}", e)))?;

        match parsed {
            GenerateResponse::Many(mut items) if !items.is_empty() => {
                Ok(items.swap_remove(0).generated_text)
            }
            GenerateResponse::Many(_) => {
                Err(FusionError::Generation("Empty generation response".to_string()))
            }
            GenerateResponse::One(item) => Ok(item.generated_text),
            GenerateResponse::Error { error } => Err(FusionError::Generation(error)),
        }
    }
}

#[async_trait]
impl LanguageModel for HuggingFaceInference {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: params.max_tokens,
                temperature: params.temperature,
                do_sample: params.do_sample,
                return_full_text: false,
            },
        };

        let url = self.endpoint();
        let mut last_error: Option<FusionError> = None;

        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(FusionError::Generation(format!(
                        "Failed to send generation request: {}",
                        e
                    )));
                    if attempt < MAX_RETRIES {
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
                .map_err(|e| FusionError::Generation(format!("Failed to read response: {}", e)))?;

            if status.is_success() {
                return Self::parse_response(&body).map(|text| text.trim().to_string());
            }

            // 429 Rate limit / 503 모델 로딩 중 - 재시도
            if matches!(status.as_u16(), 429 | 503) {
                tracing::warn!(
                    "Generation unavailable ({}), backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(FusionError::Generation(format!("{}: {}", status, body)));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                return Err(FusionError::Generation(format!("{}: {}", status, body)));
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FusionError::Generation(format!("Generation failed after {} retries", MAX_RETRIES))
        }))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
