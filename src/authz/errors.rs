use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// Broad category of an [`AuthzError`].
///
/// Callers use this to tell a broken model apart from a rejected mutation or a
/// failed evaluation. A denied request is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Mutation,
    Evaluation,
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    // ---------- compile ----------
    #[error("Invalid model: {0}")]
    #[diagnostic(
        code(gatehouse::authz::invalid_model),
        help("A model needs [request_definition] r, [policy_definition] p, [policy_effect] e and [matchers] m; [role_definition] g, g2, ... is optional")
    )]
    InvalidModel(String),

    #[error("Invalid matcher expression: {0}")]
    #[diagnostic(
        code(gatehouse::authz::invalid_matcher),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Fields are referenced as r.<field> and p.<field>")
    )]
    InvalidMatcher(String),

    #[error("Undeclared field `{0}` referenced in matcher")]
    #[diagnostic(
        code(gatehouse::authz::undeclared_field),
        help("Declare the field in [request_definition] or [policy_definition]")
    )]
    UndeclaredField(String),

    #[error("Unknown function `{0}` in matcher")]
    #[diagnostic(
        code(gatehouse::authz::unknown_function),
        help("Built-ins: keyMatch, keyMatch2, keyMatch3, regexMatch, globMatch; role predicates need a [role_definition] entry")
    )]
    UnknownFunction(String),

    #[error("Function `{name}` takes {expected} argument(s), got {actual}")]
    #[diagnostic(code(gatehouse::authz::function_arity))]
    FunctionArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported policy effect `{0}`")]
    #[diagnostic(
        code(gatehouse::authz::unsupported_effect),
        help("Use one of: some(where (p.eft == allow)) | some(where (p.eft == allow)) && !some(where (p.eft == deny)) | !some(where (p.eft == deny)) | priority(p.eft) || deny")
    )]
    UnsupportedEffect(String),

    // ---------- mutation ----------
    #[error("Invalid policy rule: {0}")]
    #[diagnostic(
        code(gatehouse::authz::invalid_rule),
        help("Rule values must match the arity of the model's policy or role definition")
    )]
    InvalidRule(String),

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(gatehouse::authz::policy_load),
        help("Check that the file exists and contains comma-separated rule lines")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save policy file `{path}`")]
    #[diagnostic(code(gatehouse::authz::policy_save))]
    PolicySaveError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No policy adapter configured")]
    #[diagnostic(
        code(gatehouse::authz::no_adapter),
        help("Construct the enforcer with an adapter to use load_policy/save_policy")
    )]
    NoAdapter,

    // ---------- evaluation ----------
    #[error("Request has {actual} value(s) but the model's request_definition declares {expected}")]
    #[diagnostic(code(gatehouse::authz::request_arity))]
    RequestArity { expected: usize, actual: usize },

    #[error("Matcher evaluation failed: {0}")]
    #[diagnostic(code(gatehouse::authz::evaluation))]
    Evaluation(String),
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::InvalidModel(_)
            | AuthzError::InvalidMatcher(_)
            | AuthzError::UndeclaredField(_)
            | AuthzError::UnknownFunction(_)
            | AuthzError::FunctionArity { .. }
            | AuthzError::UnsupportedEffect(_) => ErrorKind::Compile,
            AuthzError::InvalidRule(_)
            | AuthzError::PolicyLoadError { .. }
            | AuthzError::PolicySaveError { .. }
            | AuthzError::NoAdapter => ErrorKind::Mutation,
            AuthzError::RequestArity { .. } | AuthzError::Evaluation(_) => ErrorKind::Evaluation,
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Compile | ErrorKind::Mutation => StatusCode::BAD_REQUEST,
            ErrorKind::Evaluation => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let status = match &self {
            AuthzError::PolicyLoadError { .. }
            | AuthzError::PolicySaveError { .. }
            | AuthzError::NoAdapter => StatusCode::INTERNAL_SERVER_ERROR,
            _ => status,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AuthzError::UnknownFunction("foo".into()).kind(),
            ErrorKind::Compile
        );
        assert_eq!(
            AuthzError::InvalidRule("bad".into()).kind(),
            ErrorKind::Mutation
        );
        assert_eq!(
            AuthzError::RequestArity {
                expected: 3,
                actual: 2
            }
            .kind(),
            ErrorKind::Evaluation
        );
    }

    #[test]
    fn test_into_response_status() {
        let resp = AuthzError::InvalidRule("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AuthzError::Evaluation("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = AuthzError::NoAdapter.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = AuthzError::PolicyLoadError {
            path: "policy.csv".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
