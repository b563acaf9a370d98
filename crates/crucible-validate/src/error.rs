use crucible_codegen::Language;

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("grammar for {language} rejected by parser: {reason}")]
    Grammar { language: Language, reason: String },
}
