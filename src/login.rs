#![cfg(not(tarpaulin_include))]

//! Authentication and session management
//!
//! Passwords are stored as Argon2id hashes. A successful login creates an
//! opaque session token that the client sends back either in the `session`
//! cookie or as an `Authorization: Bearer` header.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::SharedState;
use crate::error::{AppError, Result};
use crate::users::{Role, User, UserStore, UserView};

pub const SESSION_COOKIE: &str = "session";

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// A live session entry
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: u32,
    pub expires_at: SystemTime,
}

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub token: String,
    pub user: User,
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AppError::internal("Password hashing failed"))
}

/// Check a plaintext password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|_| AppError::internal("Invalid password hash format"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Verify credentials and return the matching active user
///
/// # Arguments
/// * `users` - User table to look the email up in
/// * `email` - Login email, matched case-insensitively
/// * `password` - Plain text password to check against the stored hash
///
/// # Returns
/// * `Result<User>` - The authenticated user
///
/// # Errors
/// * `BadRequest` if either field is blank
/// * `Unauthorized` for an unknown email or a wrong password (same message for both)
/// * `Forbidden` if the account is inactive or suspended
pub fn authenticate(users: &UserStore, email: &str, password: &str) -> Result<User> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let invalid = || AppError::unauthorized("Invalid email or password");
    let user = users.find_by_email(email)?.ok_or_else(invalid)?;
    if !verify_password(password, &user.password_hash)? {
        log::warn!("failed login for {}", user.email);
        return Err(invalid());
    }
    if !user.is_active() {
        return Err(AppError::forbidden(format!("Account is {}", user.status)));
    }

    log::info!("login: {} ({})", user.email, user.role);
    Ok(user)
}

/// In-memory session table
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new session
    ///
    /// # Arguments
    /// * `user_id` - The authenticated user
    ///
    /// # Returns
    /// * `String` - A fresh UUID v4 token valid for the configured lifetime
    pub fn create(&self, user_id: u32) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id,
            expires_at: SystemTime::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(token.clone(), session);
        token
    }

    /// User id for a live session; `None` for unknown or expired tokens.
    pub fn validate(&self, token: &str) -> Option<u32> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(token)
            .filter(|s| s.expires_at > SystemTime::now())
            .map(|s| s.user_id)
    }

    /// Remove a single session.
    ///
    /// # Arguments
    /// * `token` - Session token to revoke
    ///
    /// # Returns
    /// * `bool` - Whether a session was removed
    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token).is_some()
    }

    /// Drop every session belonging to a user.
    ///
    /// # Arguments
    /// * `user_id` - Owner of the sessions
    ///
    /// # Returns
    /// * `Vec<String>` - Tokens that were removed, so state tied to them can go too
    pub fn revoke_user(&self, user_id: u32) -> Vec<String> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let dropped: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.user_id == user_id)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &dropped {
            sessions.remove(token);
        }
        dropped
    }

    /// Drop expired sessions and return their tokens.
    pub fn purge_expired(&self) -> Vec<String> {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &expired {
            sessions.remove(token);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session token from the bearer header, falling back to the cookie.
pub fn session_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    bearer.or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
}

/// Resolve the caller of a request.
///
/// # Arguments
/// * `state` - Shared application state
/// * `headers` - Request headers, checked for a bearer token first
/// * `jar` - Request cookies, checked for the `session` cookie
///
/// # Returns
/// * `Option<SessionUser>` - The caller, or `None` when the token is unknown,
///   expired or belongs to a user who is no longer active
///
/// A miss sweeps expired sessions, and a session of an inactive user is ended;
/// either way their chat transcripts are dropped with them.
pub fn resolve_session(
    state: &SharedState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Option<SessionUser> {
    let token = session_token(headers, jar)?;
    let Some(user_id) = state.sessions.validate(&token) else {
        state.sweep_expired_sessions();
        return None;
    };
    let user = state.users.get(user_id).ok()?;
    if !user.is_active() {
        state.end_session(&token);
        return None;
    }
    Some(SessionUser { token, user })
}

pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn clear_session_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Authentication middleware
///
/// Rejects the request unless the caller holds a live session whose role is
/// in `roles`. On success the [`SessionUser`] is stored in the request
/// extensions for the handler.
async fn enforce(
    roles: &[Role],
    state: SharedState,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session) = resolve_session(&state, request.headers(), &jar) else {
        return AppError::unauthorized("Invalid or missing session").into_response();
    };

    if !roles.contains(&session.user.role) {
        let allowed: Vec<&str> = roles.iter().map(|r| r.label()).collect();
        return AppError::forbidden(format!("{} access required", allowed.join(" or ")))
            .into_response();
    }

    request.extensions_mut().insert(session);
    next.run(request).await
}

pub async fn require_session(
    State(state): State<SharedState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    enforce(&Role::ALL, state, jar, request, next).await
}

pub async fn require_admin(
    State(state): State<SharedState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    enforce(&[Role::Admin], state, jar, request, next).await
}

pub async fn require_manager(
    State(state): State<SharedState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    enforce(&[Role::Manager], state, jar, request, next).await
}

pub async fn require_employee(
    State(state): State<SharedState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    enforce(&[Role::Employee], state, jar, request, next).await
}

/// `POST /api/login`
pub async fn api_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(credentials): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = authenticate(&state.users, &credentials.email, &credentials.password)?;
    let token = state.sessions.create(user.id);

    let body = Json(json!({
        "success": true,
        "user": UserView::from(&user),
        "token": token,
        "message": format!("Welcome back, {}!", user.full_name),
    }));
    Ok((jar.add(session_cookie(token)), body))
}

/// `POST /api/logout`
pub async fn api_logout(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    jar: CookieJar,
) -> impl IntoResponse {
    state.end_session(&session.token);
    (
        clear_session_cookie(jar),
        Json(json!({ "success": true, "message": "Logged out successfully." })),
    )
}

/// `GET /api/me`
pub async fn api_me(Extension(session): Extension<SessionUser>) -> impl IntoResponse {
    Json(json!({ "success": true, "user": UserView::from(&session.user) }))
}
