use crate::models::Link;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enforcement mode for a verification check.
///
/// Determines whether a failed check fails verification or is only reported
/// as a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Failure fails verification
    #[default]
    Strict,
    /// Failure is reported but doesn't fail verification
    Report,
}

impl std::fmt::Display for Enforcement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Enforcement::Strict => write!(f, "strict"),
            Enforcement::Report => write!(f, "report"),
        }
    }
}

/// Outcome of a single verification check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Check identifier (e.g., "artifact_rules.disallow", "step.command")
    pub check: String,

    /// Step or inspection the check applies to
    pub subject: String,

    /// Whether the check passed
    pub passed: bool,

    /// Enforcement mode for this check
    pub enforcement: Enforcement,

    /// Human-readable message explaining the result
    pub message: String,

    /// Optional additional details
    pub details: Option<String>,
}

impl Finding {
    pub fn pass(
        check: impl Into<String>,
        subject: impl Into<String>,
        enforcement: Enforcement,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            subject: subject.into(),
            passed: true,
            enforcement,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(
        check: impl Into<String>,
        subject: impl Into<String>,
        enforcement: Enforcement,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            subject: subject.into(),
            passed: false,
            enforcement,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns true if this failure should cause verification to fail
    pub fn causes_failure(&self) -> bool {
        !self.passed && self.enforcement == Enforcement::Strict
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {} ({}): {}", status, self.subject, self.check, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " - {}", details)?;
        }
        Ok(())
    }
}

/// Result of a successful layout verification.
#[derive(Debug, Clone)]
pub struct VerificationSummary {
    /// One representative link per step, keyed by step name
    pub step_links: BTreeMap<String, Link>,

    /// Unsigned links recorded while running inspections
    pub inspection_links: BTreeMap<String, Link>,

    /// Every check that was evaluated
    pub findings: Vec<Finding>,

    /// Link spanning the whole supply chain: the first step's materials and
    /// the last step's products, byproducts and command
    pub summary_link: Link,
}

impl VerificationSummary {
    /// Failed checks that were only reported.
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| !f.passed && f.enforcement == Enforcement::Report)
    }

    pub fn passed_checks(&self) -> usize {
        self.findings.iter().filter(|f| f.passed).count()
    }
}
