//! Analysis 모듈 - 상관분석과 시계열 분석
//!
//! 정형 질의 엔진의 조인/조회 위에서 동작합니다.

mod correlation;
mod stats;
mod timeseries;

use crate::query::QueryEngine;

pub use correlation::Correlation;
pub use stats::{mean, pearson, sample_std};
pub use timeseries::{coerce_timestamp, SeriesStats, TimeRange, TimeSeriesReport, Trend};

/// 상관/시계열 분석기
#[derive(Clone)]
pub struct Analyzer {
    engine: QueryEngine,
}

impl Analyzer {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }
}
