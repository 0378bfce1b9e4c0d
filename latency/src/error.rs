use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("latency generation failed: {0}")]
    Generation(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Failures surfaced synchronously to whoever asked for an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no data available for export")]
    Empty,

    #[error("record {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}
