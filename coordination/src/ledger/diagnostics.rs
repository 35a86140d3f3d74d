//! Failure classification and the Markdown diagnostic report

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::{RepairAttempt, RepairOutcome, RollbackEvent};

static DEPENDENCY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(modulenotfound|importerror|no module named|cannot find module|unresolved import|dependency|missing package|not installed|version conflict)",
    )
    .unwrap()
});

static CONNECTIVITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(connection (refused|reset|closed)|timed? ?out|unreachable|dns|name resolution|econnrefused|broken pipe|socket|\b50[234]\b)",
    )
    .unwrap()
});

static IMPLEMENTATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(traceback|exception|panicked|typeerror|valueerror|keyerror|attributeerror|nullpointer|null reference|undefined|assertion|index out of (range|bounds)|syntax error)",
    )
    .unwrap()
});

/// Maximum characters quoted per excerpt
const EXCERPT_LIMIT: usize = 500;

/// Maximum excerpts in a report
const MAX_EXCERPTS: usize = 5;

/// Coarse failure bucket used for `error_type` and the report hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBucket {
    DependencyImport,
    Implementation,
    Connectivity,
    Other,
}

impl ErrorBucket {
    /// Stable code stored as the ledger `error_type`
    pub fn code(self) -> &'static str {
        match self {
            Self::DependencyImport => "dependency",
            Self::Implementation => "implementation",
            Self::Connectivity => "connectivity",
            Self::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DependencyImport => "Dependency/Import",
            Self::Implementation => "Implementation",
            Self::Connectivity => "Connectivity",
            Self::Other => "Other",
        }
    }

    fn hypothesis(self) -> &'static str {
        match self {
            Self::DependencyImport => {
                "A required package, module or service dependency is missing or at an incompatible version."
            }
            Self::Implementation => {
                "The component's own code is failing at runtime; restarts are unlikely to help without a code or data fix."
            }
            Self::Connectivity => {
                "The component cannot reach a peer it depends on; check the network path and the health of upstream services."
            }
            Self::Other => {
                "The failures do not match a known pattern; inspect the excerpts below for the underlying cause."
            }
        }
    }

    /// Map an `error_type` code back to its bucket
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "dependency" => Some(Self::DependencyImport),
            "implementation" => Some(Self::Implementation),
            "connectivity" => Some(Self::Connectivity),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a free-text error message.
///
/// Dependency patterns win over connectivity, which wins over implementation:
/// an `ImportError` traceback is a dependency problem, not a code bug.
pub fn classify_error(message: &str) -> ErrorBucket {
    if DEPENDENCY_PATTERN.is_match(message) {
        ErrorBucket::DependencyImport
    } else if CONNECTIVITY_PATTERN.is_match(message) {
        ErrorBucket::Connectivity
    } else if IMPLEMENTATION_PATTERN.is_match(message) {
        ErrorBucket::Implementation
    } else {
        ErrorBucket::Other
    }
}

fn bucket_of(attempt: &RepairAttempt) -> ErrorBucket {
    ErrorBucket::from_code(&attempt.error_type)
        .unwrap_or_else(|| classify_error(&attempt.error_message))
}

/// Count attempts per bucket
pub fn bucket_counts(attempts: &[RepairAttempt]) -> BTreeMap<ErrorBucket, usize> {
    let mut counts = BTreeMap::new();
    for attempt in attempts {
        *counts.entry(bucket_of(attempt)).or_insert(0) += 1;
    }
    counts
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render the fixed-section diagnostic document for one component
pub fn render_report(
    component: &str,
    goal: Option<&str>,
    attempts: &[RepairAttempt],
    rollbacks: &[RollbackEvent],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Diagnostic Report: {component}\n");

    out.push_str("## Goal\n\n");
    match goal {
        Some(goal) if !goal.trim().is_empty() => {
            let _ = writeln!(out, "{}\n", goal.trim());
        }
        _ => {
            let _ = writeln!(out, "Restore `{component}` to a healthy state.\n");
        }
    }

    out.push_str("## Step Log\n\n");
    if attempts.is_empty() && rollbacks.is_empty() {
        out.push_str("No repair attempts recorded.\n\n");
    } else {
        for (i, attempt) in attempts.iter().enumerate() {
            let status = if attempt.rejected {
                "rejected".to_string()
            } else {
                attempt.outcome.to_string()
            };
            let _ = writeln!(
                out,
                "{}. `{}` {} ({}): {} [{} ms]",
                i + 1,
                attempt.timestamp.format("%Y-%m-%d %H:%M:%S"),
                attempt.repair_tier,
                status,
                attempt.repair_action,
                attempt.duration_ms,
            );
        }
        for rollback in rollbacks {
            let _ = writeln!(
                out,
                "- rollback to `{}` at {} ({}): {}",
                rollback.snapshot_id,
                rollback.timestamp.format("%Y-%m-%d %H:%M:%S"),
                rollback.reason,
                if rollback.success { "ok" } else { "FAILED" },
            );
        }
        out.push('\n');
    }

    out.push_str("## Point of Failure\n\n");
    let last_failure = attempts
        .iter()
        .rev()
        .find(|a| a.outcome == RepairOutcome::Failure);
    match last_failure {
        Some(attempt) => {
            let _ = writeln!(
                out,
                "Last failed step: {} on `{}` ({}). Error: {}\n",
                attempt.repair_tier,
                attempt.component_name,
                bucket_of(attempt),
                truncate(&attempt.error_message, 200),
            );
        }
        None => out.push_str("No failed attempts recorded.\n\n"),
    }

    out.push_str("## Hypothesis\n\n");
    let counts = bucket_counts(attempts);
    let dominant = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(bucket, _)| *bucket);
    match dominant {
        Some(bucket) => {
            let _ = writeln!(out, "Most failures are **{bucket}**. {}\n", bucket.hypothesis());
            for (bucket, count) in &counts {
                let _ = writeln!(out, "- {bucket}: {count}");
            }
            out.push('\n');
        }
        None => out.push_str("Insufficient history to form a hypothesis.\n\n"),
    }

    out.push_str("## Relevant Excerpts\n\n");
    let mut seen = Vec::new();
    for attempt in attempts.iter().rev() {
        if seen.len() >= MAX_EXCERPTS {
            break;
        }
        for text in [&attempt.error_message, &attempt.execution_details] {
            if text.trim().is_empty() || seen.contains(text) || seen.len() >= MAX_EXCERPTS {
                continue;
            }
            seen.push(text.clone());
            let _ = writeln!(out, "```text\n{}\n```\n", truncate(text.trim(), EXCERPT_LIMIT));
        }
    }
    if seen.is_empty() {
        out.push_str("None.\n");
    }

    out
}
