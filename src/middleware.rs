//! Request enforcement middleware.
//!
//! For every request that is not skipped, the subject is taken from the
//! `Authorization` header (basic-auth username or the bearer token's `sub`
//! claim), the object is the URL path and the action is the HTTP method. The
//! triple is handed to the shared [`Enforcer`]:
//!
//! - allowed: the request continues to the next handler
//! - denied: `403 Forbidden`
//! - enforcement error: `500 Internal Server Error` with the error message
//!
//! Tokens are only decoded, never verified; authenticating the caller is the
//! job of whatever sits in front of this layer.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::authz::{AuthzError, Enforcer};
use crate::settings::Enforcement;

/// Where the subject comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// `Authorization: Basic base64(user:password)`; the subject is `user`.
    #[default]
    Basic,
    /// `Authorization: Bearer <jwt>`; the subject is the payload's `sub` claim.
    Bearer,
}

pub type Skipper = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct EnforceConfig {
    enforcer: Arc<Enforcer>,
    auth_type: AuthType,
    skipper: Skipper,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

impl EnforceConfig {
    /// Basic auth, nothing skipped.
    pub fn new(enforcer: Arc<Enforcer>) -> Self {
        Self {
            enforcer,
            auth_type: AuthType::Basic,
            skipper: Arc::new(|_: &Request| false),
        }
    }

    pub fn from_settings(enforcer: Arc<Enforcer>, settings: &Enforcement) -> Self {
        Self::new(enforcer)
            .auth_type(settings.auth_type)
            .skip_paths(settings.skip_paths.clone())
    }

    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// Requests for which `skipper` returns true bypass enforcement.
    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skipper = Arc::new(skipper);
        self
    }

    /// Skip requests whose path is exactly one of `paths`.
    pub fn skip_paths(self, paths: Vec<String>) -> Self {
        self.skipper(move |request| paths.iter().any(|p| p == request.uri().path()))
    }

    /// Subject named by the request's credentials; empty when there are none.
    pub fn subject(&self, headers: &HeaderMap) -> String {
        let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        else {
            return String::new();
        };
        match self.auth_type {
            AuthType::Basic => basic_username(value).unwrap_or_default(),
            AuthType::Bearer => bearer_subject(value).unwrap_or_default(),
        }
    }

    pub fn check_permission(&self, request: &Request) -> Result<bool, AuthzError> {
        let subject = self.subject(request.headers());
        let path = request.uri().path();
        let method = request.method().as_str();
        self.enforcer.enforce([subject.as_str(), path, method])
    }
}

/// `value` without its `scheme ` prefix; the scheme name is case-insensitive.
fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (name, rest) = value.split_once(' ')?;
    name.eq_ignore_ascii_case(scheme).then_some(rest)
}

fn basic_username(value: &str) -> Option<String> {
    let encoded = strip_scheme(value, "Basic")?.trim();
    let decoded = Base64::decode_vec(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let user = match credentials.split_once(':') {
        Some((user, _)) => user,
        None => credentials.as_str(),
    };
    Some(user.to_string())
}

fn bearer_subject(value: &str) -> Option<String> {
    let token = strip_scheme(value, "Bearer").unwrap_or(value).trim();
    let Some(payload) = token.split('.').nth(1) else {
        tracing::warn!("bearer token is not a JWT");
        return None;
    };
    let bytes = match Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "token decode failed");
            return None;
        }
    };
    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(claims) => Some(claims.sub),
        Err(e) => {
            tracing::warn!(error = %e, "token claims are not valid JSON");
            None
        }
    }
}

/// `from_fn_with_state` middleware; see the module docs.
pub async fn enforce(
    State(config): State<EnforceConfig>,
    request: Request,
    next: Next,
) -> Response {
    if (config.skipper)(&request) {
        return next.run(request).await;
    }

    match config.check_permission(&request) {
        Ok(true) => next.run(request).await,
        Ok(false) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
