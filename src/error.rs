use std::path::PathBuf;

/// Conditions a caller may need to tell apart. Data anomalies inside a feed
/// are normalised away and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{what} not found: {path}")]
    NotFound { what: &'static str, path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn not_found(what: &'static str, path: impl Into<String>) -> Self {
        PipelineError::NotFound {
            what,
            path: path.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}
