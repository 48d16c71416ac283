use thiserror::Error;

/// Errors raised by the market structure engine's public entrypoints.
///
/// Data-quality concerns (NaN propagation, volume unavailability, empty
/// timelines) are never represented here — they surface as first-class
/// report fields (`volume_quality`, `data_gaps`, EH `data_quality`) instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
