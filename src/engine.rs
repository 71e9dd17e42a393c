//! FusionEngine - 정형 질의와 시맨틱 답변을 묶는 진입점
//!
//! 레지스트리 등록은 동기적으로 끝나고, 벡터 색인은 별도 태스크에서 진행됩니다.
//! 두 쓰기는 트랜잭션으로 묶이지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::config::Settings;
use crate::dataset::{Dataset, DatasetInfo, DatasetMetadata, DatasetRegistry};
use crate::embedding::create_embedder;
use crate::error::Result;
use crate::index::{DocumentIndex, LanceVectorIndex, MetadataFilter};
use crate::query::QueryEngine;
use crate::rag::{
    GenerationParams, HuggingFaceInference, IndexOptions, PromptStyle, RagAnswer, RagPipeline,
};
use crate::retrieval::Retriever;
use crate::store::{DatasetStore, QueryLogEntry};

#[derive(Clone)]
pub struct FusionEngine {
    registry: DatasetRegistry,
    query: QueryEngine,
    analyzer: Analyzer,
    rag: RagPipeline,
}

impl FusionEngine {
    pub fn new(registry: DatasetRegistry, rag: RagPipeline) -> Self {
        let query = QueryEngine::new(registry.clone());
        let analyzer = Analyzer::new(query.clone());
        Self {
            registry,
            query,
            analyzer,
            rag,
        }
    }

    /// 설정으로 전체 스택 구성
    ///
    /// SQLite 저장소의 데이터셋을 복원하고 LanceDB 인덱스를 엽니다.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)?;

        let store = Arc::new(DatasetStore::open(&settings.database_path())?);
        let registry = DatasetRegistry::with_store(store);
        registry.load_from_store()?;

        let embedder = create_embedder(
            settings.embedding_backend,
            settings.gemini_api_key.clone(),
            settings.embedding_dimension,
        )?;

        let index =
            Arc::new(LanceVectorIndex::open(&settings.vector_dir(), settings.embedding_dimension).await?);
        let documents = DocumentIndex::new(embedder, index);

        let token = settings.hf_api_token.clone().unwrap_or_else(|| {
            tracing::warn!("HF_API_TOKEN not set, generation requests will fail");
            String::new()
        });
        let llm = Arc::new(HuggingFaceInference::new(token, settings.hf_model.as_str())?);

        let rag = RagPipeline::new(
            Retriever::new(documents, settings.similarity_threshold),
            llm,
        )
        .with_top_k(settings.top_k)
        .with_params(GenerationParams {
            max_tokens: settings.max_new_tokens,
            temperature: settings.temperature,
            do_sample: true,
        });

        Ok(Self::new(registry, rag))
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn query_engine(&self) -> &QueryEngine {
        &self.query
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.rag
    }

    /// 데이터셋 등록 후 색인 태스크 시작
    ///
    /// 키 컬럼과 시간 컬럼 값은 문서 메타데이터로 복사됩니다.
    pub fn ingest(
        &self,
        name: &str,
        data: Dataset,
        info: DatasetInfo,
    ) -> (DatasetMetadata, JoinHandle<Result<usize>>) {
        let options = IndexOptions::from_info(&info);
        self.ingest_with(name, data, info, options)
    }

    /// 색인 옵션을 지정해 등록 후 색인 태스크 시작
    ///
    /// 반환된 핸들을 기다리지 않아도 색인은 계속 진행됩니다.
    pub fn ingest_with(
        &self,
        name: &str,
        data: Dataset,
        info: DatasetInfo,
        options: IndexOptions,
    ) -> (DatasetMetadata, JoinHandle<Result<usize>>) {
        let snapshot = data.clone();
        let description = info.description.clone();
        let metadata = self.registry.register(name, data, info);

        let job_id = Uuid::new_v4();
        let pipeline = self.rag.clone();
        let name = name.to_string();
        tracing::info!("Indexing job {} started for '{}'", job_id, name);

        let handle = tokio::spawn(async move {
            let result = pipeline
                .index_dataset_with(&name, &description, &snapshot, &options)
                .await;
            match &result {
                Ok(count) => {
                    tracing::info!("Indexing job {} finished: {} new documents", job_id, count)
                }
                Err(e) => tracing::warn!("Indexing job {} for '{}' failed: {}", job_id, name, e),
            }
            result
        });

        (metadata, handle)
    }

    /// 질문에 답변 (정책 모드면 정책 제언 추가)
    ///
    /// `filter`는 문서 메타데이터 동등 조건입니다.
    /// 저장소가 있으면 질의 로그를 남기며, 기록 실패는 경고만 합니다.
    pub async fn ask(
        &self,
        question: &str,
        policy_mode: bool,
        style: PromptStyle,
        filter: Option<&MetadataFilter>,
    ) -> Result<RagAnswer> {
        let started = Instant::now();

        let mut rag = self.rag.answer_question(question, style, filter).await?;
        if policy_mode {
            rag.policy_insights = self.rag.policy_insights(&rag).await;
        }

        self.log_query(question, &rag, started.elapsed().as_secs_f64(), policy_mode);
        Ok(rag)
    }

    fn log_query(&self, question: &str, rag: &RagAnswer, elapsed: f64, policy_mode: bool) {
        let Some(store) = self.registry.store() else {
            return;
        };

        let mut sources_used: Vec<String> = Vec::new();
        for source in &rag.sources {
            if let Some(dataset) = source.get("dataset") {
                if !sources_used.contains(dataset) {
                    sources_used.push(dataset.clone());
                }
            }
        }

        let entry = QueryLogEntry {
            query_text: question.to_string(),
            response_confidence: rag.confidence,
            sources_used,
            execution_time: elapsed,
            policy_mode,
            created_at: Utc::now(),
        };

        if let Err(e) = store.log_query(&entry) {
            tracing::warn!("Failed to log query: {}", e);
        }
    }
}
