use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt audit record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        let err = AuditError::Corrupt {
            line: 3,
            reason: "not json".into(),
        };
        assert_eq!(err.to_string(), "corrupt audit record at line 3: not json");
    }
}
