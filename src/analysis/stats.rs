//! 기초 통계 함수

use crate::error::{FusionError, Result};

/// 산술 평균 (값이 없으면 None)
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 표본 표준편차 (n < 2이면 None)
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// 피어슨 상관계수
///
/// 한쪽 분산이 0이면 NaN을 반환합니다.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Result<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return Err(FusionError::InsufficientSamples {
            found: n,
            required: 2,
        });
    }

    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    if vx == 0.0 || vy == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(cov / (vx.sqrt() * vy.sqrt()))
}
