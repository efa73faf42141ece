mod builtin;
mod validator;

pub use builtin::{Builtin, NoAuth};
pub use validator::TaskValidator;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Scopes granted to the token mounted into addon pods.
pub const ADDON_ROLE: [&str; 14] = [
    "applications:get",
    "applications:put",
    "applications.tags:*",
    "applications.bucket:*",
    "identities:get",
    "identities:decrypt",
    "proxies:get",
    "settings:get",
    "tags:*",
    "tagtypes:*",
    "tasks:get",
    "tasks.report:*",
    "tasks.bucket:get",
    "files:*",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("Token not valid: {reason}")]
    NotValid { reason: String },
}

impl AuthError {
    pub(crate) fn not_valid(reason: impl Into<String>) -> Self {
        AuthError::NotValid {
            reason: reason.into(),
        }
    }
}

/// Claims of an authenticated token.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub user: String,
    /// Space separated scopes.
    pub scope: String,
    /// Task the token was issued for.
    pub task: Option<u64>,
    pub other: serde_json::Map<String, Value>,
}

impl Claims {
    pub(crate) fn from_map(mut map: serde_json::Map<String, Value>) -> Result<Self, AuthError> {
        let mut take_string = |key: &str| match map.remove(key) {
            Some(Value::String(value)) => Ok(value),
            _ => Err(AuthError::NotAuthenticated(format!("claim '{key}' missing"))),
        };
        let user = take_string("user")?;
        let scope = take_string("scope")?;
        let task = map.get("task").and_then(Value::as_u64);
        map.remove("task");
        Ok(Claims {
            user,
            scope,
            task,
            other: map,
        })
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.scope.split_whitespace().map(Scope::parse).collect()
    }
}

/// `<resource>:<method>` grant; `*` matches anything on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub resource: String,
    pub method: String,
}

impl Scope {
    pub fn parse(scope: &str) -> Self {
        let (resource, method) = scope.split_once(':').unwrap_or((scope, ""));
        Scope {
            resource: resource.trim().to_string(),
            method: method.trim().to_string(),
        }
    }

    pub fn allow(&self, resource: &str, method: &str) -> bool {
        let matches = |granted: &str, requested: &str| {
            granted == "*" || granted.eq_ignore_ascii_case(requested)
        };
        matches(&self.resource, resource) && matches(&self.method, method)
    }
}

/// Additional check of an authenticated token.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, claims: &Claims) -> Result<(), AuthError>;
}

/// Issues and authenticates tokens.
#[async_trait]
pub trait Provider: Send + Sync {
    fn new_token(
        &self,
        user: &str,
        scopes: &[&str],
        claims: serde_json::Map<String, Value>,
    ) -> Result<String, AuthError>;

    /// Authenticates an `Authorization` header value (`Bearer <token>`).
    async fn authenticate(&self, authorization: &str) -> Result<Claims, AuthError>;
}
