use std::collections::HashMap;

use crate::descriptor::ToolDescriptor;

/// Immutable search snapshot built from one descriptor set.
///
/// Scoring is TF-IDF over `name` + `description` + `tags`; no embedding
/// service is involved. Ties are broken by `cost_hint` ascending, then by
/// qualified name for a stable order.
#[derive(Debug)]
pub struct IndexSnapshot {
    descriptors: Vec<ToolDescriptor>,
    /// Per-descriptor term frequencies, parallel to `descriptors`.
    term_freqs: Vec<HashMap<String, f64>>,
    /// Number of descriptors containing each term.
    doc_freq: HashMap<String, usize>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl IndexSnapshot {
    #[must_use]
    pub fn build(descriptors: Vec<ToolDescriptor>) -> Self {
        let mut term_freqs = Vec::with_capacity(descriptors.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for d in &descriptors {
            let mut text = format!("{} {}", d.name, d.description);
            for tag in &d.tags {
                text.push(' ');
                text.push_str(tag);
            }
            let tokens = tokenize(&text);
            let mut tf: HashMap<String, f64> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0.0) += 1.0;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        Self {
            descriptors,
            term_freqs,
            doc_freq,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn get(&self, server: &str, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.server == server && d.name == name)
    }

    /// Top-k descriptors for a natural-language query.
    ///
    /// Descriptors with zero overlap are excluded entirely.
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<&ToolDescriptor> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.descriptors.is_empty() {
            return Vec::new();
        }

        #[allow(clippy::cast_precision_loss)]
        let n_docs = self.descriptors.len() as f64;

        let mut scored: Vec<(f64, &ToolDescriptor)> = Vec::new();
        for (i, d) in self.descriptors.iter().enumerate() {
            let tf = &self.term_freqs[i];
            let mut score = 0.0;
            for term in &query_terms {
                let Some(freq) = tf.get(term) else { continue };
                #[allow(clippy::cast_precision_loss)]
                let df = self.doc_freq.get(term).copied().unwrap_or(1) as f64;
                // Smoothed IDF keeps single-document corpora from zeroing out.
                let idf = ((n_docs + 1.0) / (df + 1.0)).ln() + 1.0;
                score += freq * idf;
            }
            if score > 0.0 {
                scored.push((score, d));
            }
        }

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| da.cost_hint.cmp(&db.cost_hint))
                .then_with(|| da.qualified_name().cmp(&db.qualified_name()))
        });
        scored.truncate(k);
        scored.into_iter().map(|(_, d)| d).collect()
    }
}
