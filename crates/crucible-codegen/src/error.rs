#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("template error: {reason}")]
    Template { reason: String },

    #[error("schema error in tool '{tool}': {reason}")]
    Schema { tool: String, reason: String },
}
