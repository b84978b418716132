//! Read-only checks run after provisioning.
//!
//! Each check degrades to a boolean on its own; none of them writes.
use crate::catalog::GET_LIST;
use crate::gateway::{CallResult, Remote, Verb};
use crate::summary::Check;
use serde_json::{json, Value};

const LOGGED_USER_METHOD: &str = "frappe.auth.get_logged_user";

/// What the checks expect of the target.
#[derive(Debug, Clone)]
pub struct Expectations {
    /// Mount path probed for the secondary app, without slashes.
    pub mount: String,
    /// `None` skips the company country check.
    pub expected_country: Option<String>,
}

pub fn verify(remote: &dyn Remote, expectations: &Expectations) -> Vec<Check> {
    let mut checks = vec![
        root_reachable(remote),
        mount_reachable(remote, &expectations.mount),
        api_identity(remote),
    ];
    if let Some(country) = expectations.expected_country.as_deref() {
        checks.push(company_country(remote, country));
    }
    for check in &checks {
        if check.passed {
            tracing::info!(check = %check.name, "check passed");
        } else {
            tracing::warn!(check = %check.name, detail = check.detail.as_deref().unwrap_or(""), "check failed");
        }
    }
    checks
}

fn root_reachable(remote: &dyn Remote) -> Check {
    let result = remote.fetch("/");
    let passed = result.status_code == Some(200);
    check("root reachable", passed, status_detail(&result))
}

/// The mount may not be installed yet, so 404 passes too.
fn mount_reachable(remote: &dyn Remote, mount: &str) -> Check {
    let result = remote.fetch(&format!("/{mount}"));
    check(
        &format!("mount /{mount} reachable"),
        mount_status_passes(result.status_code),
        status_detail(&result),
    )
}

pub fn mount_status_passes(status: Option<u16>) -> bool {
    matches!(status, Some(200) | Some(404))
}

fn api_identity(remote: &dyn Remote) -> Check {
    let result = remote.call(LOGGED_USER_METHOD, Verb::Get, &Value::Null);
    let user = result
        .message()
        .and_then(Value::as_str)
        .map(str::to_string);
    let detail = match (&user, result.succeeded) {
        (Some(user), true) => format!("logged in as {user}"),
        _ => status_detail(&result),
    };
    check("api identity", result.succeeded, detail)
}

fn company_country(remote: &dyn Remote, expected: &str) -> Check {
    let name = format!("company country is {expected}");
    let result = remote.call(
        GET_LIST,
        Verb::Get,
        &json!({
            "doctype": "Company",
            "fields": ["name", "country"],
            "limit_page_length": 1
        }),
    );
    if !result.succeeded {
        return check(&name, false, status_detail(&result));
    }
    let Some(company) = result.records().first() else {
        return check(&name, false, "no Company record".to_string());
    };
    let actual = company.get("country").and_then(Value::as_str);
    let company_name = company
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>");
    let detail = format!("{company_name}: country {}", actual.unwrap_or("<unset>"));
    check(&name, actual == Some(expected), detail)
}

fn check(name: &str, passed: bool, detail: String) -> Check {
    Check {
        name: name.to_string(),
        passed,
        detail: Some(detail),
    }
}

fn status_detail(result: &CallResult) -> String {
    match (result.status_code, result.error.as_deref()) {
        (_, Some(error)) => error.to_string(),
        (Some(status), None) => format!("HTTP {status}"),
        (None, None) => "no response".to_string(),
    }
}

/// Console lines for the checks, in order.
pub fn transcript(checks: &[Check]) -> Vec<String> {
    checks
        .iter()
        .map(|check| {
            let mark = if check.passed { "✅" } else { "❌" };
            match check.detail.as_deref() {
                Some(detail) => format!("{mark} {} ({detail})", check.name),
                None => format!("{mark} {}", check.name),
            }
        })
        .collect()
}
