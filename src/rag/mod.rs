//! RAG 모듈 - 근거 기반 답변 생성
//!
//! - context: 검색 문서 → `[Source i - dataset]` 컨텍스트
//! - confidence: `1 - 평균 거리` 신뢰도
//! - generator: LanguageModel 트레이트 + HuggingFace 클라이언트
//! - pipeline: 검색 → 생성 → 신뢰도, 데이터셋 색인

mod confidence;
mod context;
mod generator;
mod pipeline;
mod prompts;

pub use confidence::estimate_confidence;
pub use context::assemble_context;
pub use generator::{GenerationParams, HuggingFaceInference, LanguageModel, DEFAULT_MODEL};
pub use pipeline::{
    row_document, Answer, IndexOptions, RagAnswer, RagPipeline, DEFAULT_COLLECTION, NO_RELEVANT_DATA_MESSAGE,
};
pub use prompts::{build_prompt, PromptStyle};

#[cfg(test)]
pub(crate) use pipeline::test_support;
