//! 신뢰도 추정
//!
//! `1 - 평균 거리`를 [0, 1]로 자른 값입니다. 보정된 확률이 아니라
//! 검색 근접도의 대략적인 지표입니다.

pub fn estimate_confidence(distances: &[f32]) -> f32 {
    if distances.is_empty() {
        return 0.0;
    }

    let mean = distances.iter().sum::<f32>() / distances.len() as f32;
    let confidence = 1.0 - mean;
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}
