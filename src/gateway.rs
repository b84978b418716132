//! Session gateway for the ERP's method-call HTTP API.
//!
//! Authentication is a single `POST /api/method/login`; the agent's cookie
//! jar carries the session for every later call. Nothing here retries or
//! re-authenticates: an expired session shows up as failed call results.
//!
//! Remote failures never escape as `Err`. They are folded into
//! [`CallResult`] so the runner can record them and keep going.
use crate::config::Settings;
use crate::error::{AuthError, CallError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use ureq::Agent;

const LOGIN_METHOD: &str = "login";
/// Upper bound on raw response text carried in an error message.
const MAX_ERROR_TEXT: usize = 300;

/// HTTP verb for a remote method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
}

/// Outcome of one remote call; consumed immediately, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallResult {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallResult {
    pub fn success(status_code: u16, body: Option<Value>) -> Self {
        Self {
            succeeded: true,
            status_code: Some(status_code),
            body,
            error: None,
        }
    }

    pub fn failure(status_code: Option<u16>, body: Option<Value>, error: CallError) -> Self {
        Self {
            succeeded: false,
            status_code,
            body,
            error: Some(error.to_string()),
        }
    }

    /// The `message` member of a decoded body, where Frappe puts results.
    pub fn message(&self) -> Option<&Value> {
        self.body.as_ref().and_then(|body| body.get("message"))
    }

    /// Records returned by a `get_list` call (`message` or legacy `data`).
    pub fn records(&self) -> &[Value] {
        let Some(body) = self.body.as_ref() else {
            return &[];
        };
        body.get("message")
            .or_else(|| body.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The call surface the runner and verifier depend on.
pub trait Remote {
    /// Invoke `{base_url}/api/method/{operation}`.
    ///
    /// GET sends `params` (a JSON object) as query pairs; POST sends it as a
    /// JSON body.
    fn call(&self, operation: &str, verb: Verb, params: &Value) -> CallResult;

    /// Plain GET of `{base_url}{path}`.
    fn fetch(&self, path: &str) -> CallResult;
}

/// An authenticated connection context.
pub struct Session {
    agent: Agent,
    base_url: String,
    user: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Log in once and keep the cookie-carrying agent.
    pub fn authenticate(settings: &Settings) -> Result<Self, AuthError> {
        let mut config = Agent::config_builder().http_status_as_error(false);
        if settings.timeout.is_some() {
            config = config.timeout_global(settings.timeout);
        }
        let agent: Agent = config.build().into();

        let url = method_url(&settings.base_url, LOGIN_METHOD);
        tracing::debug!(%url, user = %settings.username, "login");
        let response = agent
            .post(url.as_str())
            .send_form([
                ("usr", settings.username.as_str()),
                ("pwd", settings.password.as_str()),
            ])
            .map_err(|err| AuthError::Transport {
                url: url.clone(),
                detail: err.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(AuthError::Rejected { url, status });
        }
        tracing::info!(user = %settings.username, "session established");
        Ok(Self {
            agent,
            base_url: settings.base_url.clone(),
            user: settings.username.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn execute(&self, label: &str, request: Request<'_>) -> CallResult {
        let start = Instant::now();
        let sent = match request {
            Request::Get { url, query } => {
                let mut builder = self.agent.get(url);
                for (key, value) in &query {
                    builder = builder.query(key.as_str(), value.as_str());
                }
                builder.call()
            }
            Request::PostJson { url, body } => self.agent.post(url).send_json(body),
        };
        let mut response = match sent {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(operation = label, error = %err, "transport failure");
                return CallResult::failure(
                    None,
                    None,
                    CallError::Transport {
                        operation: label.to_string(),
                        detail: err.to_string(),
                    },
                );
            }
        };
        let status = response.status().as_u16();
        let text = match response.body_mut().read_to_string() {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(operation = label, status, error = %err, "unreadable response body");
                return CallResult::failure(
                    Some(status),
                    None,
                    CallError::Unexpected {
                        operation: label.to_string(),
                        detail: format!("could not read response body: {err}"),
                    },
                );
            }
        };
        let body = serde_json::from_str::<Value>(&text).ok();
        tracing::debug!(
            operation = label,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = text.len(),
            "remote call complete"
        );

        if (200..300).contains(&status) {
            return CallResult::success(status, body);
        }
        let detail = server_detail(body.as_ref(), &text);
        CallResult::failure(
            Some(status),
            body,
            CallError::Status {
                operation: label.to_string(),
                status,
                detail,
            },
        )
    }
}

enum Request<'a> {
    Get {
        url: &'a str,
        query: Vec<(String, String)>,
    },
    PostJson {
        url: &'a str,
        body: &'a Value,
    },
}

impl Remote for Session {
    fn call(&self, operation: &str, verb: Verb, params: &Value) -> CallResult {
        let url = method_url(&self.base_url, operation);
        tracing::debug!(operation, ?verb, "remote call");
        let request = match verb {
            Verb::Get => match query_pairs(params) {
                Ok(query) => Request::Get { url: &url, query },
                Err(detail) => {
                    return CallResult::failure(
                        None,
                        None,
                        CallError::Unexpected {
                            operation: operation.to_string(),
                            detail,
                        },
                    )
                }
            },
            Verb::Post => Request::PostJson {
                url: &url,
                body: params,
            },
        };
        self.execute(operation, request)
    }

    fn fetch(&self, path: &str) -> CallResult {
        let url = format!("{}{}", self.base_url, path);
        self.execute(
            path,
            Request::Get {
                url: &url,
                query: Vec::new(),
            },
        )
    }
}

pub fn method_url(base_url: &str, operation: &str) -> String {
    format!("{}/api/method/{}", base_url.trim_end_matches('/'), operation)
}

/// Flatten a JSON object into query pairs. Strings pass through verbatim;
/// anything else is sent as JSON text, which is how the server parses
/// `filters` and `fields`.
pub fn query_pairs(params: &Value) -> Result<Vec<(String, String)>, String> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()),
        other => Err(format!("GET params must be a JSON object, got {other}")),
    }
}

/// Best human-readable error detail from a failed response.
///
/// Prefers the server's `exception`, then the first `_server_messages`
/// entry, then `message`, then the raw text.
pub fn server_detail(body: Option<&Value>, raw: &str) -> String {
    if let Some(body) = body {
        if let Some(exception) = body.get("exception").and_then(Value::as_str) {
            return exception.to_string();
        }
        if let Some(message) = body
            .get("_server_messages")
            .and_then(Value::as_str)
            .and_then(first_server_message)
        {
            return message;
        }
        if let Some(message) = body.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let raw = raw.trim();
    if raw.is_empty() {
        return "<empty response>".to_string();
    }
    truncate_chars(raw, MAX_ERROR_TEXT)
}

// `_server_messages` is a JSON string holding a list of JSON strings.
fn first_server_message(encoded: &str) -> Option<String> {
    let outer: Vec<String> = serde_json::from_str(encoded).ok()?;
    let first = outer.first()?;
    match serde_json::from_str::<Value>(first) {
        Ok(inner) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => Some(first.clone()),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
