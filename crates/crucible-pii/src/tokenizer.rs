//! Session-scoped bijection between raw sensitive values and placeholders.

use std::collections::HashMap;

use serde_json::Value;

use crate::patterns::{PLACEHOLDER, PiiKind, sensitive_field, value_patterns};

/// One request's tokenizer state. Dropped (and cleared) when the request
/// completes; placeholders never outlive the session they were minted in.
#[derive(Debug, Default)]
pub struct TokenMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
    counters: HashMap<&'static str, usize>,
}

impl TokenMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for `raw`, minting one on first sight. The same raw value
    /// always maps to the same placeholder within a session.
    pub fn token_for(&mut self, kind: PiiKind, raw: &str) -> String {
        if let Some(existing) = self.forward.get(raw) {
            return existing.clone();
        }
        let n = self.counters.entry(kind.label()).or_insert(0);
        *n += 1;
        let placeholder = format!("[{}_{n}]", kind.label());
        self.forward.insert(raw.to_owned(), placeholder.clone());
        self.reverse.insert(placeholder.clone(), raw.to_owned());
        placeholder
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Walk `value` and replace sensitive content with placeholders.
    ///
    /// A string is tokenized whole when its field name is sensitive;
    /// otherwise each embedded match of a value pattern is replaced in
    /// place. Placeholders themselves never match a value pattern, so a
    /// string mixing placeholders with fresh raw values still has the raw
    /// values replaced, and tokenizing twice is a no-op.
    pub fn tokenize(&mut self, value: &mut Value) {
        self.tokenize_node(value, None);
    }

    fn tokenize_node(&mut self, value: &mut Value, field: Option<&str>) {
        match value {
            Value::String(s) => {
                if let Some(kind) = field.and_then(sensitive_field)
                    && !PLACEHOLDER.is_match(s)
                {
                    *s = self.token_for(kind, s);
                    return;
                }
                *s = self.tokenize_text(s);
            }
            Value::Array(items) => {
                for item in items {
                    self.tokenize_node(item, field);
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    self.tokenize_node(v, Some(k));
                }
            }
            _ => {}
        }
    }

    fn tokenize_text(&mut self, text: &str) -> String {
        let mut out = text.to_owned();
        for (kind, pattern) in value_patterns() {
            // Collect first: replacements must consult the shared map.
            let matches: Vec<String> = pattern
                .find_iter(&out)
                .map(|m| m.as_str().to_owned())
                .collect();
            for raw in matches {
                let placeholder = self.token_for(kind, &raw);
                out = out.replace(&raw, &placeholder);
            }
        }
        out
    }

    /// Walk `value` and substitute raw values back for placeholders.
    ///
    /// Only used for data leaving the engine towards an external tool;
    /// model-visible output and audit records keep the placeholders.
    pub fn detokenize(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                let replaced = PLACEHOLDER.replace_all(s, |caps: &regex::Captures<'_>| {
                    self.reverse
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_owned())
                });
                if let std::borrow::Cow::Owned(owned) = replaced {
                    *s = owned;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.detokenize(item);
                }
            }
            Value::Object(map) => {
                for v in map.values_mut() {
                    self.detokenize(v);
                }
            }
            _ => {}
        }
    }

    /// True when `text` still carries any placeholder minted here.
    #[must_use]
    pub fn contains_placeholder(&self, text: &str) -> bool {
        PLACEHOLDER
            .find_iter(text)
            .any(|m| self.reverse.contains_key(m.as_str()))
    }

    /// Drop the mapping early, before the session object itself goes away.
    pub fn zeroise(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.counters.clear();
        tracing::trace!("token map cleared");
    }
}

impl Drop for TokenMap {
    fn drop(&mut self) {
        self.zeroise();
    }
}
