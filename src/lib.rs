//! govdata-rag - 공공 데이터셋 하이브리드 질의 엔진
//!
//! 등록된 표 형식 데이터셋에 대한 정형 질의(필터, 집계, 조인, 상관/시계열 분석)와
//! 행 단위 문서를 LanceDB에 색인한 시맨틱 검색 기반 답변 생성을 결합합니다.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod index;
pub mod query;
pub mod rag;
pub mod retrieval;
pub mod store;

// Re-exports
pub use analysis::{Analyzer, Correlation, SeriesStats, TimeSeriesReport, Trend};
pub use config::Settings;
pub use dataset::{
    ColumnType, Dataset, DatasetInfo, DatasetMetadata, DatasetRegistry, Record, Value,
};
pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedding, HashEmbedding};
pub use engine::FusionEngine;
pub use error::{FusionError, Result};
pub use fetch::{normalize_dataset, parse_csv, DataGovFetcher};
pub use index::{DocumentIndex, LanceVectorIndex, MemoryIndex, VectorIndex};
pub use query::{AggFunc, Aggregation, Filters, JoinType, QueryEngine, QueryOptions};
pub use rag::{
    Answer, HuggingFaceInference, IndexOptions, LanguageModel, PromptStyle, RagAnswer, RagPipeline,
};
pub use retrieval::{RetrievalResult, Retriever};
pub use store::DatasetStore;
