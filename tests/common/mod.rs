//! Shared test infrastructure for integration tests: an in-process mock ERP
//! server and a runner for the compiled binary.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;
use tiny_http::{Header, Method, Request, Response, Server};

pub const PASSWORD: &str = "admin";
pub const SESSION_ID: &str = "mock-session";

/// Server-side state the tests inspect after a run.
#[derive(Debug, Default)]
pub struct ErpState {
    /// doctype -> record names
    pub records: BTreeMap<String, BTreeSet<String>>,
    /// (operation, doc) for every accepted or rejected write
    pub writes: Vec<(String, Value)>,
    /// request paths in arrival order
    pub paths: Vec<String>,
    /// API calls refused for lacking the session cookie
    pub unauthenticated: usize,
    pub company_country: Option<String>,
}

impl ErpState {
    pub fn count(&self, doctype: &str) -> usize {
        self.records.get(doctype).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn has(&self, doctype: &str, name: &str) -> bool {
        self.records
            .get(doctype)
            .is_some_and(|names| names.contains(name))
    }
}

/// Minimal stand-in for the ERP method API.
pub struct MockErp {
    pub base_url: String,
    pub state: Arc<Mutex<ErpState>>,
    server: Arc<Server>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockErp {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind mock ERP"));
        let addr = server.server_addr().to_ip().expect("ip listener");
        let mut initial = ErpState::default();
        initial
            .records
            .entry("Company".to_string())
            .or_default()
            .insert("Acme".to_string());
        let state = Arc::new(Mutex::new(initial));

        let worker_server = Arc::clone(&server);
        let worker_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            for request in worker_server.incoming_requests() {
                handle_request(request, &worker_state);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ErpState> {
        self.state.lock().expect("state lock")
    }
}

impl Drop for MockErp {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(mut request: Request, state: &Mutex<ErpState>) {
    let mut body = String::new();
    let _ = request.as_reader().read_to_string(&mut body);
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (url.clone(), BTreeMap::new()),
    };
    let is_post = *request.method() == Method::Post;
    let has_session = request.headers().iter().any(|header| {
        header.field.equiv("Cookie")
            && header
                .value
                .as_str()
                .split(';')
                .any(|pair| pair.trim() == format!("sid={SESSION_ID}"))
    });

    let mut state = state.lock().expect("state lock");
    state.paths.push(path.clone());
    let mut set_cookie = None;
    let (status, reply) = match (is_post, path.as_str()) {
        (true, "/api/method/login") => {
            let form = parse_query(&body);
            if form.get("pwd").map(String::as_str) == Some(PASSWORD) {
                set_cookie = Some(format!("sid={SESSION_ID}; Path=/; HttpOnly"));
                (200, json!({"message": "Logged In", "full_name": "Administrator"}))
            } else {
                (401, json!({"message": "Incorrect password", "exc_type": "AuthenticationError"}))
            }
        }
        (_, api) if api.starts_with("/api/") && !has_session => {
            state.unauthenticated += 1;
            (403, json!({"exc_type": "PermissionError", "exception": "frappe.exceptions.PermissionError: Not logged in"}))
        }
        (false, "/") => (200, json!("desk")),
        (false, "/mint") => (404, json!({"exc_type": "PageDoesNotExistError"})),
        (false, "/api/method/frappe.auth.get_logged_user") => {
            (200, json!({"message": "Administrator"}))
        }
        (false, "/api/method/frappe.client.get_list") => get_list(&state, &query),
        (true, "/api/method/frappe.client.insert") => insert(&mut state, &body),
        (true, "/api/method/frappe.client.save") => save(&mut state, &body),
        _ => (404, json!({"exc_type": "DoesNotExistError"})),
    };
    drop(state);

    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("content type header");
    let mut response = Response::from_string(reply.to_string())
        .with_status_code(status)
        .with_header(header);
    if let Some(cookie) = set_cookie {
        let header =
            Header::from_bytes(&b"Set-Cookie"[..], cookie.as_bytes()).expect("set-cookie header");
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

fn get_list(state: &ErpState, query: &BTreeMap<String, String>) -> (u16, Value) {
    let doctype = query.get("doctype").cloned().unwrap_or_default();
    let wanted = query
        .get("filters")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|filters| filters[0][2].as_str().map(str::to_string));
    let names: Vec<&String> = state
        .records
        .get(&doctype)
        .map(|names| names.iter().collect())
        .unwrap_or_default();
    let rows: Vec<Value> = names
        .into_iter()
        .filter(|name| wanted.is_none() || wanted.as_deref() == Some(name.as_str()))
        .take(1)
        .map(|name| {
            if doctype == "Company" {
                json!({"name": name, "country": state.company_country})
            } else {
                json!({"name": name})
            }
        })
        .collect();
    (200, json!({ "message": rows }))
}

fn record_name(doc: &Value) -> Option<String> {
    if doc["doctype"] == "BOM" {
        return doc["item"].as_str().map(|item| format!("BOM-{item}-001"));
    }
    [
        "item_code",
        "uom_name",
        "warehouse_name",
        "item_group_name",
        "currency_name",
        "title",
    ]
    .iter()
    .find_map(|field| doc[*field].as_str().map(str::to_string))
}

fn insert(state: &mut ErpState, body: &str) -> (u16, Value) {
    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let doc = payload["doc"].clone();
    state.writes.push(("insert".to_string(), doc.clone()));
    let Some(doctype) = doc["doctype"].as_str().map(str::to_string) else {
        return (417, json!({"exception": "frappe.exceptions.ValidationError: doctype missing"}));
    };
    let Some(name) = record_name(&doc) else {
        return (417, json!({"exception": "frappe.exceptions.MandatoryError: name"}));
    };
    if doctype == "BOM" {
        let mut referenced = vec![doc["item"].as_str().unwrap_or_default().to_string()];
        if let Some(items) = doc["items"].as_array() {
            referenced.extend(
                items
                    .iter()
                    .filter_map(|item| item["item_code"].as_str().map(str::to_string)),
            );
        }
        if let Some(missing) = referenced.iter().find(|code| !state.has("Item", code)) {
            return (
                417,
                json!({
                    "exc_type": "LinkValidationError",
                    "exception": format!("frappe.exceptions.LinkValidationError: Could not find Item: {missing}")
                }),
            );
        }
    }
    if state.has(&doctype, &name) {
        return (
            409,
            json!({
                "exc_type": "DuplicateEntryError",
                "exception": format!("frappe.exceptions.DuplicateEntryError: {doctype} {name} already exists")
            }),
        );
    }
    state.records.entry(doctype).or_default().insert(name.clone());
    (200, json!({ "message": { "name": name } }))
}

fn save(state: &mut ErpState, body: &str) -> (u16, Value) {
    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let doc = payload["doc"].clone();
    state.writes.push(("save".to_string(), doc.clone()));
    let doctype = doc["doctype"].as_str().unwrap_or_default();
    let name = doc["name"].as_str().unwrap_or_default();
    if !state.has(doctype, name) {
        return (404, json!({"exc_type": "DoesNotExistError"}));
    }
    if doctype == "Company" {
        state.company_country = doc["country"].as_str().map(str::to_string);
    }
    (200, json!({ "message": doc }))
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

/// Captured result of one binary invocation.
#[derive(Debug)]
pub struct CliOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CliOutput {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|err| panic!("stdout is not JSON ({err}):\n{}", self.stdout))
    }
}

/// Isolated environment for running the binary: no ambient `ERP_*`
/// variables and an empty config dir.
pub struct Harness {
    pub home: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            home: tempfile::tempdir().expect("temp home"),
        }
    }

    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.home.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).expect("write harness file");
        path
    }

    pub fn run(&self, args: &[&str], envs: &[(&str, &str)]) -> CliOutput {
        let mut command = Command::new(env!("CARGO_BIN_EXE_erp-bootstrap"));
        command
            .args(args)
            .env_remove("ERP_BASE_URL")
            .env_remove("ERP_USERNAME")
            .env_remove("ERP_PASSWORD")
            .env_remove("ERP_COMPANY")
            .env_remove("RUST_LOG")
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.home.path().join("config"));
        for (key, value) in envs {
            command.env(key, value);
        }
        let output = command.output().expect("run erp-bootstrap");
        CliOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}
