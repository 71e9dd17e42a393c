//! RAG 파이프라인 - 검색 → 컨텍스트 조립 → 생성 → 신뢰도

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::dataset::{Dataset, DatasetInfo, Value};
use crate::error::{FusionError, Result};
use crate::index::{stable_document_id, Metadata, MetadataFilter};
use crate::retrieval::Retriever;

use super::confidence::estimate_confidence;
use super::context::assemble_context;
use super::generator::{GenerationParams, LanguageModel};
use super::prompts::{build_prompt, policy_question, PromptStyle};

/// 기본 컬렉션 이름
pub const DEFAULT_COLLECTION: &str = "gov_datasets";

/// 관련 문서가 없을 때의 고정 응답
pub const NO_RELEVANT_DATA_MESSAGE: &str =
    "I couldn't find relevant information in the available datasets to answer this question.";

/// 정책 제언 생성 토큰 수
const POLICY_MAX_TOKENS: u32 = 512;

/// 데이터셋 색인 시 한 번에 임베딩할 행 수
const INDEX_BATCH_ROWS: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// 데이터셋 색인 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// 값을 문서 메타데이터로 복사할 컬럼 (검색 필터용)
    pub metadata_columns: Vec<String>,
    /// 문서 텍스트 템플릿 (`{column}` 치환). 없으면 `col: val | ...` 형식
    pub text_template: Option<String>,
}

impl IndexOptions {
    /// 등록 정보의 키 컬럼과 시간 컬럼을 메타데이터 컬럼으로 사용
    pub fn from_info(info: &DatasetInfo) -> Self {
        let mut metadata_columns = info.key_columns.clone();
        if let Some(time) = &info.time_column {
            if !metadata_columns.contains(time) {
                metadata_columns.push(time.clone());
            }
        }
        Self {
            metadata_columns,
            text_template: None,
        }
    }

    pub fn with_metadata_columns(mut self, columns: &[&str]) -> Self {
        self.metadata_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_text_template(mut self, template: impl Into<String>) -> Self {
        self.text_template = Some(template.into());
        self
    }
}

/// 생성 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    /// 컨텍스트 기반 답변
    Grounded { text: String },
    /// 임계값을 넘는 문서가 없음
    NoRelevantData,
    /// 언어 모델 호출 실패
    Failed { reason: String },
}

impl Answer {
    pub fn text(&self) -> Option<&str> {
        match self {
            Answer::Grounded { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Answer::Grounded { .. })
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Grounded { text } => write!(f, "{}", text),
            Answer::NoRelevantData => write!(f, "{}", NO_RELEVANT_DATA_MESSAGE),
            Answer::Failed { reason } => write!(f, "Error generating response: {}", reason),
        }
    }
}

/// 질의 응답 결과
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: Answer,
    /// 사용된 문서의 메타데이터 (검색 순서)
    pub sources: Vec<Metadata>,
    pub context: String,
    /// 0.0 ~ 1.0
    pub confidence: f32,
    pub source_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_insights: Option<Answer>,
}

impl RagAnswer {
    fn no_relevant_data() -> Self {
        Self {
            answer: Answer::NoRelevantData,
            sources: Vec::new(),
            context: String::new(),
            confidence: 0.0,
            source_count: 0,
            policy_insights: None,
        }
    }
}

// ============================================================================
// RagPipeline
// ============================================================================

/// 답변 생성 오케스트레이터
#[derive(Clone)]
pub struct RagPipeline {
    retriever: Retriever,
    llm: Arc<dyn LanguageModel>,
    collection: String,
    top_k: usize,
    params: GenerationParams,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            retriever,
            llm,
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: crate::retrieval::DEFAULT_TOP_K,
            params: GenerationParams::default(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 컨텍스트와 질문으로 답변 생성
    ///
    /// 언어 모델 실패는 `Answer::Failed`로 반환합니다.
    pub async fn generate_response(
        &self,
        question: &str,
        context: &str,
        style: PromptStyle,
        params: &GenerationParams,
    ) -> Answer {
        let prompt = build_prompt(style, question, context);

        match self.llm.generate(&prompt, params).await {
            Ok(text) => Answer::Grounded {
                text: text.trim().to_string(),
            },
            Err(e) => {
                tracing::error!("Error generating response: {}", e);
                Answer::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 검색 → 컨텍스트 → 생성 → 신뢰도
    ///
    /// 검색/임베딩 실패는 에러로, 생성 실패는 `Answer::Failed`로 반환합니다.
    pub async fn answer_question(
        &self,
        question: &str,
        style: PromptStyle,
        filter: Option<&MetadataFilter>,
    ) -> Result<RagAnswer> {
        let retrieved = self
            .retriever
            .retrieve(question, &self.collection, self.top_k, filter)
            .await?;

        if retrieved.is_empty() {
            return Ok(RagAnswer::no_relevant_data());
        }

        let context = assemble_context(retrieved.documents());
        let answer = self
            .generate_response(question, &context, style, &self.params)
            .await;
        let confidence = estimate_confidence(&retrieved.distances());

        Ok(RagAnswer {
            answer,
            sources: retrieved.documents().map(|d| d.metadata.clone()).collect(),
            context,
            confidence,
            source_count: retrieved.len(),
            policy_insights: None,
        })
    }

    /// 첫 답변을 바탕으로 정책 제언 생성 (같은 컨텍스트 사용)
    ///
    /// 근거 있는 답변이 아니면 None입니다.
    pub async fn policy_insights(&self, rag: &RagAnswer) -> Option<Answer> {
        let answer = rag.answer.text()?;
        let params = GenerationParams {
            max_tokens: POLICY_MAX_TOKENS,
            ..self.params
        };

        let insights = self
            .generate_response(
                &policy_question(answer),
                &rag.context,
                PromptStyle::Concise,
                &params,
            )
            .await;

        if let Answer::Failed { reason } = &insights {
            tracing::warn!("Error generating policy insights: {}", reason);
        }
        Some(insights)
    }

    /// 데이터셋 행을 문서로 변환해 컬렉션에 추가 (기본 옵션)
    pub async fn index_dataset(
        &self,
        name: &str,
        description: &str,
        data: &Dataset,
    ) -> Result<usize> {
        self.index_dataset_with(name, description, data, &IndexOptions::default())
            .await
    }

    /// 데이터셋 행을 문서로 변환해 컬렉션에 추가
    ///
    /// id는 내용 기반이므로 같은 데이터를 다시 색인해도 중복되지 않습니다.
    /// `metadata_columns`의 값은 null이 아닐 때 메타데이터에 복사되며,
    /// 기본 키(`dataset`, `row_id`, `description`)는 덮어쓰지 않습니다.
    pub async fn index_dataset_with(
        &self,
        name: &str,
        description: &str,
        data: &Dataset,
        options: &IndexOptions,
    ) -> Result<usize> {
        let metadata_idx: Vec<(&str, usize)> = options
            .metadata_columns
            .iter()
            .filter_map(|c| match data.column_index(c) {
                Some(idx) => Some((c.as_str(), idx)),
                None => {
                    tracing::warn!("Metadata column '{}' not in '{}', skipping", c, name);
                    None
                }
            })
            .collect();

        let template = options
            .text_template
            .as_deref()
            .map(|t| RowTemplate::new(t, data.columns()))
            .transpose()?;

        let mut inserted = 0;

        for (batch_no, start) in (0..data.num_rows()).step_by(INDEX_BATCH_ROWS).enumerate() {
            let end = (start + INDEX_BATCH_ROWS).min(data.num_rows());

            let mut texts = Vec::with_capacity(end - start);
            let mut metadatas = Vec::with_capacity(end - start);
            let mut ids = Vec::with_capacity(end - start);

            for row_index in start..end {
                let row = &data.rows()[row_index];
                let text = match &template {
                    Some(template) => template.render(row),
                    None => row_document(data.columns(), row),
                };
                ids.push(stable_document_id(name, row_index, &text));

                let mut metadata = Metadata::from([
                    ("dataset".to_string(), name.to_string()),
                    ("row_id".to_string(), row_index.to_string()),
                    ("description".to_string(), description.to_string()),
                ]);
                for &(column, idx) in &metadata_idx {
                    if !row[idx].is_null() {
                        metadata
                            .entry(column.to_string())
                            .or_insert_with(|| row[idx].to_string());
                    }
                }
                metadatas.push(metadata);
                texts.push(text);
            }

            tracing::debug!("Indexing batch {} of '{}' (rows {}..{})", batch_no + 1, name, start, end);
            let added = self
                .retriever
                .documents()
                .add_documents(&self.collection, texts, Some(metadatas), Some(ids))
                .await?;
            inserted += added.len();
        }

        tracing::info!("Indexed {} documents from {}", inserted, name);
        Ok(inserted)
    }
}

/// 행 → `"col: val | col: val"` 문서 텍스트
pub fn row_document(columns: &[String], row: &[Value]) -> String {
    columns
        .iter()
        .zip(row)
        .map(|(col, value)| match value {
            Value::Null => format!("{}: NA", col),
            v => format!("{}: {}", col, v),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// `{column}` 자리표시자 템플릿
///
/// 없는 컬럼의 자리표시자는 그대로 남고, null은 `NA`로 채웁니다.
struct RowTemplate {
    template: String,
    placeholder: Regex,
    columns: Vec<String>,
}

impl RowTemplate {
    fn new(template: &str, columns: &[String]) -> Result<Self> {
        let placeholder = Regex::new(r"\{([^{}]+)\}")
            .map_err(|e| FusionError::InvalidInput(format!("Invalid template pattern: {}", e)))?;
        Ok(Self {
            template: template.to_string(),
            placeholder,
            columns: columns.to_vec(),
        })
    }

    fn render(&self, row: &[Value]) -> String {
        self.placeholder
            .replace_all(&self.template, |caps: &regex::Captures| {
                let name = caps[1].trim();
                match self.columns.iter().position(|c| c == name) {
                    Some(idx) => match &row[idx] {
                        Value::Null => "NA".to_string(),
                        v => v.to_string(),
                    },
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::EchoModel;
    use super::*;
    use crate::dataset::test_support::rainfall;
    use crate::embedding::HashEmbedding;
    use crate::index::{DocumentIndex, MemoryIndex};

    fn pipeline(llm: Arc<EchoModel>, threshold: f32) -> RagPipeline {
        let documents =
            DocumentIndex::new(Arc::new(HashEmbedding::new(64)), Arc::new(MemoryIndex::new()));
        RagPipeline::new(Retriever::new(documents, threshold), llm)
    }

    #[test]
    fn test_row_document() {
        let columns = vec!["state".to_string(), "mm".to_string()];
        let row = vec![Value::from("A"), Value::Null];
        assert_eq!(row_document(&columns, &row), "state: A | mm: NA");
    }

    #[tokio::test]
    async fn test_empty_collection_returns_no_relevant_data() {
        let llm = Arc::new(EchoModel::default());
        let rag = pipeline(Arc::clone(&llm), 0.0)
            .answer_question("What is the rainfall?", PromptStyle::Reasoning, None)
            .await
            .unwrap();

        assert_eq!(rag.answer, Answer::NoRelevantData);
        assert_eq!(rag.confidence, 0.0);
        assert!(rag.sources.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_answer_question_end_to_end() {
        let llm = Arc::new(EchoModel::default());
        let pipeline = pipeline(Arc::clone(&llm), -1.0);
        let indexed = pipeline
            .index_dataset("rainfall", "IMD rainfall", &rainfall())
            .await
            .unwrap();
        assert_eq!(indexed, 2);

        let rag = pipeline
            .answer_question("state A rainfall mm", PromptStyle::Reasoning, None)
            .await
            .unwrap();

        assert_eq!(
            rag.answer.text(),
            Some("Rainfall increased from 800 to 850.")
        );
        assert_eq!(rag.source_count, 2);
        assert!(rag.context.starts_with("[Source 1 - rainfall]\n"));
        assert_eq!(rag.sources[0]["dataset"], "rainfall");
        assert!((0.0..=1.0).contains(&rag.confidence));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("User Question: state A rainfall mm"));
        assert_eq!(prompts[0].1.max_tokens, 1024);
    }

    #[test]
    fn test_row_template() {
        let columns = vec!["state".to_string(), "year".to_string(), "mm".to_string()];
        let template =
            RowTemplate::new("{state} received {mm} mm in {year} ({district})", &columns).unwrap();

        let row = vec![Value::from("Kerala"), Value::Int(2020), Value::Null];
        assert_eq!(
            template.render(&row),
            "Kerala received NA mm in 2020 ({district})"
        );
    }

    #[test]
    fn test_index_options_from_info() {
        let info = DatasetInfo::new("rain")
            .with_key_columns(&["state", "year"])
            .with_time_column("year");
        let options = IndexOptions::from_info(&info);
        assert_eq!(options.metadata_columns, vec!["state", "year"]);
        assert!(options.text_template.is_none());
    }

    #[tokio::test]
    async fn test_metadata_columns_enable_filtering() {
        let pipeline = pipeline(Arc::new(EchoModel::default()), -1.0);
        let data = crate::dataset::test_support::dataset(
            &["state", "year", "mm"],
            vec![
                vec!["Kerala".into(), 2020.into(), 3000.into()],
                vec!["Punjab".into(), 2020.into(), 600.into()],
                vec!["Kerala".into(), 2021.into(), 2900.into()],
                vec![Value::Null, 2021.into(), 100.into()],
            ],
        );
        let options = IndexOptions::default()
            .with_metadata_columns(&["state", "district"])
            .with_text_template("{state} received {mm} mm of rainfall in {year}");

        let indexed = pipeline
            .index_dataset_with("rainfall", "IMD", &data, &options)
            .await
            .unwrap();
        assert_eq!(indexed, 4);

        let filter: MetadataFilter = [("state".to_string(), "Kerala".to_string())].into();
        let result = pipeline
            .retriever()
            .retrieve("rainfall in 2020", DEFAULT_COLLECTION, 10, Some(&filter))
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        for doc in result.documents() {
            assert_eq!(doc.metadata["state"], "Kerala");
            assert_eq!(doc.metadata["dataset"], "rainfall");
            assert!(doc.text.starts_with("Kerala received "));
            assert!(!doc.metadata.contains_key("district"));
        }

        // null 값은 메타데이터에 넣지 않음
        let all = pipeline
            .retriever()
            .retrieve("rainfall", DEFAULT_COLLECTION, 10, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.documents().filter(|d| d.metadata.contains_key("state")).count(), 3);
    }

    #[tokio::test]
    async fn test_reindexing_is_idempotent() {
        let pipeline = pipeline(Arc::new(EchoModel::default()), 0.0);
        pipeline.index_dataset("rainfall", "", &rainfall()).await.unwrap();
        let again = pipeline.index_dataset("rainfall", "", &rainfall()).await.unwrap();

        assert_eq!(again, 0);
        let count = pipeline
            .retriever()
            .documents()
            .count(DEFAULT_COLLECTION)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_generation_failure_is_tagged() {
        let pipeline = pipeline(Arc::new(EchoModel::failing()), -1.0);
        pipeline.index_dataset("rainfall", "", &rainfall()).await.unwrap();

        let rag = pipeline
            .answer_question("rainfall", PromptStyle::Concise, None)
            .await
            .unwrap();

        assert!(matches!(rag.answer, Answer::Failed { .. }));
        assert!(rag.answer.text().is_none());
        assert_eq!(rag.source_count, 2);
    }

    #[tokio::test]
    async fn test_policy_insights_use_concise_prompt() {
        let llm = Arc::new(EchoModel::default());
        let pipeline = pipeline(Arc::clone(&llm), -1.0);
        pipeline.index_dataset("rainfall", "", &rainfall()).await.unwrap();

        let rag = pipeline
            .answer_question("rainfall", PromptStyle::Reasoning, None)
            .await
            .unwrap();
        let insights = pipeline.policy_insights(&rag).await.unwrap();

        assert!(insights.is_grounded());
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].0.starts_with("Context: "));
        assert!(prompts[1].0.contains("Based on this analysis: Rainfall increased"));
        assert_eq!(prompts[1].1.max_tokens, POLICY_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_no_policy_insights_without_answer() {
        let pipeline = pipeline(Arc::new(EchoModel::default()), 0.0);
        let rag = RagAnswer::no_relevant_data();
        assert!(pipeline.policy_insights(&rag).await.is_none());
    }
}
