//! Complexity layer: cyclomatic estimate from control-flow keyword counts.

use std::sync::LazyLock;

use regex::Regex;

static BRANCH_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|else if|for|while|case|catch|except|and|or)\b|&&|\|\|").unwrap()
});

/// One plus the number of branch points in `source`.
#[must_use]
pub fn score(source: &str) -> u32 {
    let branches = BRANCH_KEYWORDS.find_iter(source).count();
    1 + u32::try_from(branches).unwrap_or(u32::MAX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_code_scores_one() {
        assert_eq!(score("const a = 1;\nconst b = a + 2;\n"), 1);
    }

    #[test]
    fn each_branch_adds_one() {
        let src = "if (a) { f(); } else if (b) { g(); }\nfor (;;) {}\n";
        // `if`, `else if` (containing its own `if`), `for`.
        assert!(score(src) >= 4);
    }

    #[test]
    fn logical_operators_count() {
        assert_eq!(score("const x = a && b || c;"), 3);
    }

    #[test]
    fn deeply_branched_source_exceeds_threshold() {
        let src = "if (x) {}\n".repeat(60);
        assert!(score(&src) > crate::report::COMPLEXITY_THRESHOLD);
    }
}
