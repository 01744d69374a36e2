#![cfg(feature = "web")]
//! Optional password gate in front of the whole UI.
//!
//! With no password configured every request passes. With one, the login
//! form marks the caller's session as authenticated; everything else
//! redirects (pages) or answers 401 (API calls) until then.

use crate::app::{AppState, StatusResponse};
use crate::error::{Result, SheetError};
use crate::session::{SESSION_COOKIE, SessionId};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Form, Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

/// Holds the argon2 hash of the configured password, if any
pub struct AccessGate {
    hash: Option<String>,
}

impl AccessGate {
    /// Gate that lets everyone through
    pub fn open() -> Self {
        AccessGate { hash: None }
    }

    /// Hash `password` once at start-up; `None` disables the gate
    pub fn new(password: Option<&str>) -> Result<Self> {
        match password {
            Some(password) => Ok(AccessGate {
                hash: Some(hash_password(password)?),
            }),
            None => Ok(AccessGate::open()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hash.is_some()
    }

    /// Check a submitted password; always true when the gate is open
    pub fn verify(&self, password: &str) -> bool {
        match &self.hash {
            Some(hash) => verify_password(password, hash),
            None => true,
        }
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SheetError::Config(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub password: String,
}

pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

/// Check the password and start a fresh authenticated session
///
/// The session moves to a new id on success, so an id handed out before
/// login is never the one that carries the authenticated flag.
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Form(form): Form<LoginForm>,
) -> Response {
    let checker = state.clone();
    let accepted = tokio::task::spawn_blocking(move || checker.gate.verify(&form.password))
        .await
        .unwrap_or(false);

    if accepted {
        let fresh = state.sessions.rotate(&id);
        state.sessions.with_session(&fresh, |s| s.authenticated = true);
        info!("Session logged in under a new id");
        (Extension(SessionId(fresh)), Redirect::to("/")).into_response()
    } else {
        warn!("Rejected login for session {}", id);
        (StatusCode::UNAUTHORIZED, "Invalid password").into_response()
    }
}

/// Drop the session with its uploads and clear the cookie
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    state.sessions.remove(&id);
    let cookie = Cookie::build(SESSION_COOKIE).path("/");
    (jar.remove(cookie), Redirect::to("/login"))
}

/// Authentication middleware for every route except login and logout
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    request: Request,
    next: Next,
) -> Response {
    if !state.gate.is_enabled() || state.sessions.is_authenticated(&id) {
        return next.run(request).await;
    }

    if request.uri().path().starts_with("/api/") {
        (
            StatusCode::UNAUTHORIZED,
            Json(StatusResponse::error("Login required")),
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}
