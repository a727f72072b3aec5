#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use staffdesk::{
    AppError, AppState, Config, Result, SharedState,
    chat::ChatModel,
    config::BootstrapAdmin,
    login::SessionUser,
    router,
    users::{NewUser, User},
};

pub const PASSWORD: &str = "secret123";
pub const ADMIN_EMAIL: &str = "admin@staffdesk.test";

/// Replies with the last line of the user's message.
pub struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let last = prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("User: "))
            .unwrap_or_default();
        Ok(format!("echo: {}", last))
    }
}

pub struct DownModel;

#[async_trait]
impl ChatModel for DownModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(AppError::upstream("model returned 503 Service Unavailable"))
    }
}

/// Answers with canned replies in order and keeps the prompts it was given.
pub struct Scripted {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for Scripted {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::upstream("script ran out of replies"))
    }
}

pub struct Harness {
    pub state: SharedState,
    pub app: Router,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(EchoModel))
}

/// Fresh state in a temp directory with the bootstrap admin seeded.
pub fn harness_with(model: Arc<dyn ChatModel>) -> Harness {
    harness_configured(model, |_| {})
}

pub fn harness_configured(model: Arc<dyn ChatModel>, tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        database_dir: dir.path().to_path_buf(),
        bootstrap_admin: Some(BootstrapAdmin {
            full_name: "Ada Admin".into(),
            email: ADMIN_EMAIL.into(),
            password: PASSWORD.into(),
        }),
        ..Config::default()
    };
    tweak(&mut config);
    let state = Arc::new(AppState::new(config, model).unwrap());
    let app = router(state.clone());
    Harness {
        state,
        app,
        _dir: dir,
    }
}

impl Harness {
    pub fn add_user(&self, name: &str, email: &str, role: &str, team: Option<&str>) -> User {
        self.state
            .users
            .register(&NewUser {
                full_name: name.into(),
                email: email.into(),
                password: PASSWORD.into(),
                role: role.into(),
                team: team.map(str::to_string),
                status: None,
            })
            .unwrap()
    }

    /// Session token for a user, created directly in the session store.
    pub fn token_for(&self, user: &User) -> String {
        self.state.sessions.create(user.id)
    }

    /// A signed-in caller, as the role layers would hand it to a handler.
    pub fn session_for(&self, user: &User) -> SessionUser {
        SessionUser {
            token: self.token_for(user),
            user: user.clone(),
        }
    }

    pub fn admin(&self) -> User {
        self.state
            .users
            .find_by_email(ADMIN_EMAIL)
            .unwrap()
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Form post, optionally carrying the session cookie.
pub fn form_request(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("session={}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn page_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("session={}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
