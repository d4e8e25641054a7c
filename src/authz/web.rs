use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::adapter::PolicyLine;
use crate::authz::store::POLICY_TYPE;
use crate::authz::Enforcer;

#[derive(Debug, Deserialize)]
pub struct EnforceRequest {
    /// One value per request field, in declaration order.
    pub request: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnforceResponse {
    pub allowed: bool,
    pub matched: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    /// `p` (the default) or a role definition name such as `g`.
    #[serde(default = "default_ptype")]
    pub ptype: String,
    pub values: Vec<String>,
}

fn default_ptype() -> String {
    POLICY_TYPE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub user: String,
    pub role: String,
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    pub domain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RolesResponse {
    pub user: String,
    pub roles: Vec<String>,
    pub implicit_roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

pub fn router(enforcer: Arc<Enforcer>) -> Router {
    Router::new()
        .route("/v1/enforce", post(handle_enforce))
        .route(
            "/v1/policies",
            get(list_policies)
                .post(add_policy)
                .delete(remove_policy),
        )
        .route("/v1/policies/reload", post(reload_policies))
        .route("/v1/policies/save", post(save_policies))
        .route("/v1/roles", post(add_role))
        .route("/v1/roles/{user}", get(get_roles))
        .route("/healthz", get(health))
        .with_state(enforcer)
}

async fn handle_enforce(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<EnforceRequest>,
) -> impl IntoResponse {
    match enforcer.enforce_ex(req.request) {
        Ok(decision) => Json(EnforceResponse {
            allowed: decision.allowed,
            matched: decision.matched,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_policies(State(enforcer): State<Arc<Enforcer>>) -> Json<Vec<PolicyLine>> {
    Json(enforcer.lines())
}

async fn add_policy(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<RuleRequest>,
) -> impl IntoResponse {
    let result = if req.ptype == POLICY_TYPE {
        enforcer.add_policy(req.values)
    } else {
        enforcer.add_named_grouping_policy(&req.ptype, req.values)
    };
    match result {
        Ok(changed) => Json(ChangedResponse { changed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn remove_policy(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<RuleRequest>,
) -> impl IntoResponse {
    let result = if req.ptype == POLICY_TYPE {
        enforcer.remove_policy(req.values)
    } else {
        enforcer.remove_named_grouping_policy(&req.ptype, req.values)
    };
    match result {
        Ok(changed) => Json(ChangedResponse { changed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn reload_policies(State(enforcer): State<Arc<Enforcer>>) -> impl IntoResponse {
    match enforcer.load_policy() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn save_policies(State(enforcer): State<Arc<Enforcer>>) -> impl IntoResponse {
    match enforcer.save_policy() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn add_role(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<RoleRequest>,
) -> impl IntoResponse {
    match enforcer.add_role_for_user(&req.user, &req.role, req.domain.as_deref()) {
        Ok(changed) => Json(ChangedResponse { changed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_roles(
    State(enforcer): State<Arc<Enforcer>>,
    Path(user): Path<String>,
    Query(query): Query<DomainQuery>,
) -> Json<RolesResponse> {
    let domain = query.domain.as_deref();
    Json(RolesResponse {
        roles: enforcer.get_roles_for_user(&user, domain),
        implicit_roles: enforcer.get_implicit_roles_for_user(&user, domain),
        user,
    })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
