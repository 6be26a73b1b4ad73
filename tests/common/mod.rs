//! Shared harness for router-level tests
//!
//! Builds the real router over a temp registry, a temp base directory, an
//! in-memory metrics sink and a scripted task bridge, then drives it with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use omnidrop::bridge::{BridgeError, TaskBridge, TaskRequest};
use omnidrop::files::FileWriter;
use omnidrop::gateway::{AppState, create_router};
use omnidrop::metrics::InMemorySink;
use omnidrop::oauth::{ClientRegistry, OAuthClient, TokenManager};

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const LEGACY_TOKEN: &str = "legacy-shared-token";
pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How the scripted bridge answers
#[derive(Debug, Clone)]
pub enum BridgeReply {
    Output(String),
    Reject(String),
    Panic,
}

/// Task bridge that records invocations instead of spawning a script
pub struct ScriptedBridge {
    reply: Mutex<BridgeReply>,
    calls: Mutex<Vec<[String; 4]>>,
}

impl ScriptedBridge {
    fn new() -> Self {
        Self {
            reply: Mutex::new(BridgeReply::Output("success".to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_with(&self, reply: BridgeReply) {
        *self.reply.lock() = reply;
    }

    pub fn calls(&self) -> Vec<[String; 4]> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TaskBridge for ScriptedBridge {
    async fn create_task(&self, task: &TaskRequest) -> Result<String, BridgeError> {
        self.calls.lock().push(task.bridge_args());
        let reply = self.reply.lock().clone();
        match reply {
            BridgeReply::Output(output) => Ok(output),
            BridgeReply::Reject(output) => Err(BridgeError::Rejected(output)),
            BridgeReply::Panic => panic!("bridge exploded"),
        }
    }
}

pub struct Harness {
    pub router: Router,
    pub metrics: Arc<InMemorySink>,
    pub bridge: Arc<ScriptedBridge>,
    pub tokens: Arc<TokenManager>,
    pub registry_path: PathBuf,
    pub base: TempDir,
    _registry_dir: TempDir,
}

/// Registry entry: (client_id, secret, comma-separated scopes, disabled)
pub type ClientSpec<'a> = (&'a str, &'a str, &'a str, bool);

pub const DEFAULT_CLIENTS: [ClientSpec<'static>; 4] = [
    ("svc-a", "hunter2", "tasks:write", false),
    ("svc-files", "files-secret", "files:write", false),
    ("svc-admin", "admin-secret", "*", false),
    ("svc-off", "off-secret", "tasks:write", true),
];

pub fn client(id: &str, scopes: &str) -> OAuthClient {
    OAuthClient {
        client_id: id.to_string(),
        client_secret_hash: String::new(),
        name: format!("{id} client"),
        scopes: scopes
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        created_at: Utc::now(),
        updated_at: None,
        disabled: false,
    }
}

pub fn write_registry(path: &Path, entries: &[ClientSpec<'_>]) {
    let mut yaml = String::from("clients:\n");
    for (id, secret, scopes, disabled) in entries {
        let hash = bcrypt::hash(secret, 4).unwrap();
        let scopes: Vec<String> = scopes
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| format!("\"{s}\""))
            .collect();
        yaml.push_str(&format!(
            "  - client_id: {id}\n    client_secret_hash: \"{hash}\"\n    name: {id} client\n    scopes: [{}]\n    created_at: 2025-01-01T00:00:00Z\n    disabled: {disabled}\n",
            scopes.join(", ")
        ));
    }
    std::fs::write(path, yaml).unwrap();
}

pub fn harness() -> Harness {
    build(None, &DEFAULT_CLIENTS)
}

pub fn harness_with_legacy() -> Harness {
    build(Some(LEGACY_TOKEN), &DEFAULT_CLIENTS)
}

fn build(legacy_token: Option<&str>, clients: &[ClientSpec<'_>]) -> Harness {
    let registry_dir = tempfile::tempdir().unwrap();
    let registry_path = registry_dir.path().join("oauth-clients.yaml");
    write_registry(&registry_path, clients);

    let base = tempfile::tempdir().unwrap();
    let metrics = Arc::new(InMemorySink::new());
    let bridge = Arc::new(ScriptedBridge::new());
    let tokens = Arc::new(TokenManager::new(SECRET.as_bytes(), "omnidrop"));

    let state = AppState {
        registry: Arc::new(ClientRegistry::load(&registry_path).unwrap()),
        tokens: Arc::clone(&tokens),
        token_ttl: TOKEN_TTL,
        legacy_token: legacy_token.map(str::to_string),
        bridge: Arc::clone(&bridge) as Arc<dyn TaskBridge>,
        files: FileWriter::new(base.path()),
        metrics: Arc::clone(&metrics) as Arc<dyn omnidrop::metrics::MetricsSink>,
    };

    Harness {
        router: create_router(Arc::new(state)),
        metrics,
        bridge,
        tokens,
        registry_path,
        base,
        _registry_dir: registry_dir,
    }
}

impl Harness {
    /// Mint a signed token directly, bypassing the token endpoint
    pub fn token(&self, client_id: &str, scopes: &str) -> String {
        self.tokens
            .issue(&client(client_id, scopes), Duration::from_secs(300))
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            json,
            text,
        }
    }

    pub async fn post_json(&self, path: &str, bearer: Option<&str>, body: &str) -> Reply {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
    pub text: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
