use thiserror::Error;

/// Errors produced while building graphs, running layers or loading data.
#[derive(Debug, Error)]
pub enum GcnError {
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("invalid graph: {reason}")]
    InvalidGraph { reason: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("node feature {name:?} is not present in the scope")]
    MissingNodeFeature { name: String },

    #[error("zoom_out called before any output was collected")]
    NoOutputCollected,

    #[error("a zoom_in scope is already open on this context manager")]
    ScopeAlreadyOpen,

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("dataset error: {reason}")]
    Dataset { reason: String },
}

impl GcnError {
    pub(crate) fn invalid_graph(reason: impl Into<String>) -> Self {
        Self::InvalidGraph {
            reason: reason.into(),
        }
    }
    pub(crate) fn dataset(reason: impl Into<String>) -> Self {
        Self::Dataset {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GcnError>;
