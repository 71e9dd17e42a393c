//! 프롬프트 템플릿

/// 프롬프트 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// 단계별 추론과 근거 인용 요구
    #[default]
    Reasoning,
    /// 간결한 답변
    Concise,
}

pub fn build_prompt(style: PromptStyle, question: &str, context: &str) -> String {
    match style {
        PromptStyle::Reasoning => format!(
            "You are an analysis assistant for Indian government open data.\n\
             \n\
             Context from government datasets:\n\
             {context}\n\
             \n\
             User Question: {question}\n\
             \n\
             Instructions:\n\
             1. Answer the question using ONLY the data provided in the context\n\
             2. Show your reasoning process step by step\n\
             3. If the data shows trends or correlations, explain them\n\
             4. Cite specific data points (states, years, values) to support your answer\n\
             5. If the context doesn't contain enough information, say so clearly\n\
             6. Suggest policy insights if relevant\n\
             \n\
             Answer with reasoning:"
        ),
        PromptStyle::Concise => format!(
            "Context: {context}\n\
             \n\
             Question: {question}\n\
             \n\
             Answer clearly and concisely based only on the provided context:"
        ),
    }
}

/// 정책 제언 요청 질문
pub fn policy_question(answer: &str) -> String {
    format!(
        "Based on this analysis: {answer}\n\n\
         Provide data-driven policy recommendations grounded in the datasets above:"
    )
}
