use serde::{Deserialize, Serialize};

/// Severity of a single violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Overall risk of executing a source artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// One level up, saturating at critical.
    #[must_use]
    pub const fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

/// One finding from any validation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    /// 1-based source line, when the layer can attribute one.
    pub line: Option<usize>,
}

/// Aggregate verdict over a source artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Sorted by severity, most severe first.
    pub violations: Vec<Violation>,
    pub risk_level: RiskLevel,
    pub complexity_score: u32,
    pub obfuscation_flag: bool,
    /// Approximate token cost of the source, for budget accounting.
    pub resource_estimate: usize,
}

impl ValidationReport {
    /// True when execution must not proceed.
    #[must_use]
    pub fn blocked(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }
}

/// Complexity above this adds one risk level.
pub const COMPLEXITY_THRESHOLD: u32 = 50;

/// Map violations and complexity onto a risk level.
///
/// Any critical violation pins the level to critical. Otherwise two or more
/// high violations score high, exactly one scores medium, and excessive
/// complexity bumps the result one level.
#[must_use]
pub fn determine_risk(violations: &[Violation], complexity_score: u32) -> RiskLevel {
    if violations.iter().any(|v| v.severity == Severity::Critical) {
        return RiskLevel::Critical;
    }
    let high = violations
        .iter()
        .filter(|v| v.severity == Severity::High)
        .count();
    let base = match high {
        0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        _ => RiskLevel::High,
    };
    if complexity_score > COMPLEXITY_THRESHOLD {
        base.bump()
    } else {
        base
    }
}
