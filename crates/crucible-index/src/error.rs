#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("tool '{name}' not found on server '{server}'")]
    NotFound { server: String, name: String },

    #[error("invalid descriptor at {path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("descriptor io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("descriptor parse error at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}
