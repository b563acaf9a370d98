//! PII tokenization for values crossing the sandbox boundary.
//!
//! Inbound, sensitive values are swapped for opaque `[KIND_n]` placeholders
//! before any input reaches generated code. Outbound, placeholders are
//! substituted back only for data forwarded to an external tool; everything
//! the model or the audit log sees keeps the placeholders.

pub mod patterns;
pub mod tokenizer;

pub use patterns::PiiKind;
pub use tokenizer::TokenMap;
