//! Run summary: the ordered record of one invocation.
//!
//! Lives only for the process lifetime; rendered once as a transcript tail
//! or as JSON.
use crate::gateway::CallResult;
use serde::Serialize;

/// How the runner classified a step's final call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    /// A lookup found the record, so no write was attempted.
    Skipped,
    /// The server refused the write as a duplicate.
    AlreadyExists,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    /// Whether the outcome counts toward a clean run under the active policy.
    pub succeeded: bool,
    pub result: CallResult,
}

/// A read-only post-run check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub steps: Vec<StepRecord>,
    pub checks: Vec<Check>,
}

impl RunSummary {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|step| !step.succeeded)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|check| !check.passed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_steps().next().is_some() || self.failed_checks().next().is_some()
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps
            .iter()
            .filter(|step| step.outcome == outcome)
            .count()
    }

    /// Totals plus the failures repeated, so they survive a long transcript.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "steps: {} applied, {} already present, {} failed (of {})\n",
            self.count(StepOutcome::Applied),
            self.count(StepOutcome::Skipped) + self.count(StepOutcome::AlreadyExists),
            self.failed_steps().count(),
            self.steps.len()
        ));
        if !self.checks.is_empty() {
            out.push_str(&format!(
                "checks: {} passed, {} failed\n",
                self.checks.len() - self.failed_checks().count(),
                self.failed_checks().count()
            ));
        }
        for step in self.failed_steps() {
            let detail = step.result.error.as_deref().unwrap_or("no detail");
            out.push_str(&format!("  ❌ step {}: {}\n", step.name, detail));
        }
        for check in self.failed_checks() {
            let detail = check.detail.as_deref().unwrap_or("no detail");
            out.push_str(&format!("  ❌ check {}: {}\n", check.name, detail));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
