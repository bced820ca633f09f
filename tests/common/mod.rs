#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gcloudsql::template::{Method, RenderedRequest};
use gcloudsql::transport::{RawResponse, Transport};
use gcloudsql::{Config, Connection, PollOptions, StaticToken};
use serde_json::{Value, json};

pub const API_BASE: &str = "https://sqladmin.test/sql/v1beta4";
pub const TOKEN_INFO_URL: &str = "https://oauth2.test/tokeninfo";
pub const TOKEN: &str = "ya29.test-token";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub body: String,
    pub authorization: Option<String>,
    /// Operation created (submissions) or polled (status requests).
    pub op: Option<String>,
}

impl Call {
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

#[derive(Default)]
pub struct State {
    next_op: usize,
    pending: HashMap<String, usize>,
}

/// In-memory Cloud SQL Admin API.
///
/// Every submission creates `op-N`, which answers `pending_polls` status
/// requests with PENDING before reporting DONE.
pub struct FakeApi {
    pub instance: Mutex<Value>,
    pub calls: Mutex<Vec<Call>>,
    pub pending_polls: usize,
    pub delay: Duration,
    pub submit_status: Mutex<u16>,
    pub token_status: u16,
    pub state: Mutex<State>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            instance: Mutex::new(instance_json()),
            calls: Mutex::new(Vec::new()),
            pending_polls: 1,
            delay: Duration::ZERO,
            submit_status: Mutex::new(200),
            token_status: 200,
            state: Mutex::new(State::default()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls after connection setup (token introspection and instance fetch).
    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls().into_iter().skip(2).collect()
    }

    fn respond(status: u16, body: Value) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    fn operation(name: &str, status: &str) -> Value {
        json!({
            "kind": "sql#operation",
            "name": name,
            "status": status,
            "operationType": "UPDATE",
            "targetId": "i1",
            "targetProject": "p1",
            "selfLink": format!("{}/projects/p1/operations/{}", API_BASE, name),
        })
    }
}

impl Transport for FakeApi {
    fn send(&self, request: &RenderedRequest) -> gcloudsql::Result<RawResponse> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let mut call = Call {
            method: request.method,
            url: request.url.clone(),
            body: request.body_str().unwrap_or_default().to_string(),
            authorization: request.header("Authorization").map(str::to_string),
            op: None,
        };

        let response = if request.url.starts_with(TOKEN_INFO_URL) {
            Self::respond(
                self.token_status,
                json!({
                    "issued_to": "32555940559.apps.googleusercontent.com",
                    "audience": "32555940559.apps.googleusercontent.com",
                    "scope": "https://www.googleapis.com/auth/cloud-platform",
                    "expires_in": 3600,
                    "email": "ops@example.com",
                    "verified_email": true,
                    "access_type": "offline",
                }),
            )
        } else if let Some((_, name)) = request.url.split_once("/operations/") {
            let mut state = self.state.lock().unwrap();
            call.op = Some(name.to_string());
            match state.pending.get_mut(name) {
                Some(0) => Self::respond(200, Self::operation(name, "DONE")),
                Some(left) => {
                    *left -= 1;
                    Self::respond(200, Self::operation(name, "PENDING"))
                }
                None => Self::respond(404, json!({ "error": { "code": 404 } })),
            }
        } else if request.method == Method::Get {
            Self::respond(200, self.instance.lock().unwrap().clone())
        } else {
            let status = *self.submit_status.lock().unwrap();
            if status != 200 {
                Self::respond(status, json!({ "error": { "code": status } }))
            } else {
                let mut state = self.state.lock().unwrap();
                state.next_op += 1;
                let name = format!("op-{}", state.next_op);
                state.pending.insert(name.clone(), self.pending_polls);
                call.op = Some(name.clone());
                Self::respond(200, Self::operation(&name, "PENDING"))
            }
        };

        self.calls.lock().unwrap().push(call);
        Ok(response)
    }
}

pub fn instance_json() -> Value {
    json!({
        "kind": "sql#instance",
        "state": "RUNNABLE",
        "databaseVersion": "MYSQL_8_0",
        "project": "p1",
        "name": "i1",
        "region": "us-central1",
        "gceZone": "us-central1-a",
        "connectionName": "p1:us-central1:i1",
        "selfLink": format!("{}/projects/p1/instances/i1", API_BASE),
        "ipAddresses": [
            { "type": "PRIMARY", "ipAddress": "9.9.9.9" },
            { "type": "OUTGOING", "ipAddress": "8.8.8.8" }
        ],
        "settings": {
            "tier": "db-n1-standard-1",
            "ipConfiguration": {
                "ipv4Enabled": true,
                "requireSsl": false,
                "authorizedNetworks": [
                    { "value": "10.0.0.0/8", "name": "vpn", "kind": "sql#aclEntry" },
                    { "value": "198.51.100.0/24", "name": "ci", "kind": "sql#aclEntry" }
                ]
            }
        }
    })
}

pub fn config() -> Config {
    Config {
        api_base: API_BASE.to_string(),
        token_info_url: TOKEN_INFO_URL.to_string(),
        poll: PollOptions {
            interval: Duration::ZERO,
            timeout: Some(Duration::from_secs(10)),
            progress: false,
        },
        ..Config::default()
    }
}

pub fn connect(api: &Arc<FakeApi>) -> gcloudsql::Result<Connection> {
    Connection::builder("p1", "i1")
        .config(config())
        .transport(api.clone())
        .credential_provider(Arc::new(StaticToken::new(TOKEN)))
        .connect()
}

/// `io::Write` sink shared with a test, for capturing log output.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
