//! 검색 문서 → 프롬프트 컨텍스트 조립

use crate::index::Document;

/// 문서별 섹션 `[Source {i} - {dataset}]`을 빈 줄로 이어붙임
///
/// 순서를 유지하며, `dataset` 메타데이터가 없으면 `Unknown`입니다.
pub fn assemble_context<'a>(documents: impl IntoIterator<Item = &'a Document>) -> String {
    documents
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[Source {} - {}]\n{}\n",
                i + 1,
                doc.dataset().unwrap_or("Unknown"),
                doc.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
