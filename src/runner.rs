//! Best-effort step execution.
//!
//! Steps run strictly in catalog order, one at a time. A failed step is
//! recorded and the next one runs regardless: nothing here returns `Err`.
use crate::catalog::{ProvisioningStep, StepAction, GET_LIST, INSERT, SAVE};
use crate::error::CallError;
use crate::gateway::{CallResult, Remote, Verb};
use crate::summary::{RunSummary, StepOutcome, StepRecord};
use regex::Regex;
use serde_json::{json, Value};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Count "already exists" responses as success.
    pub existing_is_success: bool,
    /// Print the ✅/❌ transcript line for each step as it completes.
    pub echo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            existing_is_success: true,
            echo: true,
        }
    }
}

/// Execute every step and return one record per step, in order.
pub fn run(remote: &dyn Remote, steps: &[ProvisioningStep], options: &RunOptions) -> RunSummary {
    let mut summary = RunSummary::default();
    for (idx, step) in steps.iter().enumerate() {
        let start = Instant::now();
        let (outcome, result) = execute_step(remote, step);
        let succeeded = match outcome {
            StepOutcome::Applied | StepOutcome::Skipped => true,
            StepOutcome::AlreadyExists => options.existing_is_success,
            StepOutcome::Failed => false,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if succeeded {
            tracing::info!(step = %step.name, ?outcome, elapsed_ms, "step complete");
        } else {
            tracing::warn!(
                step = %step.name,
                ?outcome,
                elapsed_ms,
                error = result.error.as_deref().unwrap_or(""),
                "step failed"
            );
        }
        if options.echo {
            println!("{}", transcript_line(step, outcome, succeeded, &result));
        }
        tracing::debug!(index = idx, total = steps.len(), "step recorded");
        summary.steps.push(StepRecord {
            name: step.name.clone(),
            outcome,
            succeeded,
            result,
        });
    }
    summary
}

fn execute_step(remote: &dyn Remote, step: &ProvisioningStep) -> (StepOutcome, CallResult) {
    match &step.action {
        StepAction::Call {
            operation,
            verb,
            payload,
        } => classify(remote.call(operation, *verb, payload)),
        StepAction::Ensure {
            doctype,
            name,
            payload,
        } => ensure(remote, doctype, name, payload),
        StepAction::UpdateFirst { doctype, fields } => update_first(remote, doctype, fields),
    }
}

fn classify(result: CallResult) -> (StepOutcome, CallResult) {
    let outcome = if result.succeeded {
        StepOutcome::Applied
    } else if is_already_exists(&result) {
        StepOutcome::AlreadyExists
    } else {
        StepOutcome::Failed
    };
    (outcome, result)
}

/// Whether a failed call is the server refusing a duplicate record.
pub fn is_already_exists(result: &CallResult) -> bool {
    if result.succeeded {
        return false;
    }
    if result.status_code == Some(409) {
        return true;
    }
    let duplicate = Regex::new(r"(?i)DuplicateEntryError|already exists|duplicate entry")
        .expect("regex for duplicate record errors");
    let in_error = result
        .error
        .as_deref()
        .is_some_and(|error| duplicate.is_match(error));
    let in_body = result
        .body
        .as_ref()
        .and_then(|body| body.get("exc_type"))
        .and_then(Value::as_str)
        .is_some_and(|exc_type| duplicate.is_match(exc_type));
    in_error || in_body
}

// A failed lookup falls through to the insert; the server decides.
fn ensure(remote: &dyn Remote, doctype: &str, name: &str, payload: &Value) -> (StepOutcome, CallResult) {
    let lookup = remote.call(
        GET_LIST,
        Verb::Get,
        &json!({
            "doctype": doctype,
            "filters": [["name", "=", name]],
            "limit_page_length": 1
        }),
    );
    if lookup.succeeded && !lookup.records().is_empty() {
        tracing::debug!(doctype, name, "record present, skipping insert");
        return (StepOutcome::Skipped, lookup);
    }
    if !lookup.succeeded {
        tracing::debug!(doctype, name, "lookup failed, attempting insert");
    }
    classify(remote.call(INSERT, Verb::Post, &json!({ "doc": payload })))
}

fn update_first(remote: &dyn Remote, doctype: &str, fields: &Value) -> (StepOutcome, CallResult) {
    let lookup = remote.call(
        GET_LIST,
        Verb::Get,
        &json!({ "doctype": doctype, "limit_page_length": 1 }),
    );
    if !lookup.succeeded {
        return (StepOutcome::Failed, lookup);
    }
    let Some(record_name) = lookup
        .records()
        .first()
        .and_then(|record| record.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        let error = CallError::Unexpected {
            operation: GET_LIST.to_string(),
            detail: format!("no {doctype} record to update"),
        };
        return (
            StepOutcome::Failed,
            CallResult::failure(lookup.status_code, lookup.body, error),
        );
    };

    let mut doc = json!({ "doctype": doctype, "name": record_name });
    if let (Some(target), Some(source)) = (doc.as_object_mut(), fields.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    classify(remote.call(SAVE, Verb::Post, &json!({ "doc": doc })))
}

fn transcript_line(
    step: &ProvisioningStep,
    outcome: StepOutcome,
    succeeded: bool,
    result: &CallResult,
) -> String {
    let detail = result.error.as_deref().unwrap_or("no detail");
    match (outcome, succeeded) {
        (StepOutcome::Applied, _) => format!("✅ {}", step.on_success),
        (StepOutcome::Skipped, _) => format!("✅ {} (already present)", step.on_success),
        (StepOutcome::AlreadyExists, true) => format!("✅ {} (already exists)", step.name),
        (StepOutcome::AlreadyExists, false) => {
            format!("❌ {}: already exists ({detail})", step.on_failure)
        }
        (StepOutcome::Failed, _) => format!("❌ {}: {detail}", step.on_failure),
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
