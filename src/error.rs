//! 에러 타입
//!
//! 정형 질의의 "없음/빈 결과"는 빈 값으로 복구하고,
//! 의미상 불가능한 요청과 외부 서비스 실패만 에러로 올립니다.

use thiserror::Error;

/// 크레이트 공통 Result
pub type Result<T> = std::result::Result<T, FusionError>;

/// 하이브리드 질의 엔진 에러
#[derive(Debug, Error)]
pub enum FusionError {
    /// 등록되지 않은 데이터셋 (대부분의 연산은 빈 결과로 대신함)
    #[error("dataset not found: {0}")]
    UnknownDataset(String),

    /// 조인 키를 정할 수 없음
    #[error("no common columns to join '{left}' and '{right}'")]
    NoJoinKey { left: String, right: String },

    /// 명시한 조인 키가 한쪽 데이터셋에 없음
    #[error("join column '{column}' not found in dataset '{dataset}'")]
    MissingJoinColumn { dataset: String, column: String },

    /// 요청한 group-by 컬럼이 하나도 존재하지 않음
    #[error("none of the group-by columns {requested:?} exist in dataset '{dataset}'")]
    InvalidGroupColumns {
        dataset: String,
        requested: Vec<String>,
    },

    #[error("column '{column}' not found in dataset '{dataset}'")]
    UnknownColumn { dataset: String, column: String },

    #[error("unsupported aggregation function: {0}")]
    UnsupportedAggregation(String),

    /// 상관계수 계산에 필요한 관측치 부족 (호출부에서 sentinel로 변환)
    #[error("insufficient samples: {found} paired observations, need at least {required}")]
    InsufficientSamples { found: usize, required: usize },

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    IndexBackend(String),

    #[error("generation service error: {0}")]
    Generation(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FusionError {
    /// 빈 결과로 복구해도 되는 에러인지 여부
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            FusionError::UnknownDataset(_) | FusionError::InsufficientSamples { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_errors() {
        assert!(FusionError::UnknownDataset("x".into()).is_soft());
        assert!(FusionError::InsufficientSamples {
            found: 1,
            required: 2
        }
        .is_soft());
        assert!(!FusionError::NoJoinKey {
            left: "a".into(),
            right: "b".into()
        }
        .is_soft());
    }

    #[test]
    fn test_error_messages() {
        let err = FusionError::MissingJoinColumn {
            dataset: "rainfall".into(),
            column: "district".into(),
        };
        assert_eq!(
            err.to_string(),
            "join column 'district' not found in dataset 'rainfall'"
        );
    }
}
