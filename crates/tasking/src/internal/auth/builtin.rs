use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use orion::hazardous::mac::hmac::sha512::{HmacSha512, SecretKey, Tag};
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::internal::auth::{AuthError, Claims, Provider, Validator};

const BEARER: &str = "Bearer ";

/// Issues and verifies HS512 signed JWT tokens with a shared key.
pub struct Builtin {
    key: SecretKey,
    validators: RwLock<Vec<Arc<dyn Validator>>>,
}

impl Builtin {
    pub fn new(key: &str) -> Result<Self, AuthError> {
        let key = SecretKey::from_slice(key.as_bytes())
            .map_err(|_| AuthError::NotAuthenticated("invalid token key".to_string()))?;
        Ok(Builtin {
            key,
            validators: Default::default(),
        })
    }

    /// Registers a validator run on every authenticated token.
    pub fn register(&self, validator: Arc<dyn Validator>) {
        self.validators.write().push(validator);
    }

    fn sign(&self, input: &str) -> Result<Tag, AuthError> {
        HmacSha512::hmac(&self.key, input.as_bytes())
            .map_err(|_| AuthError::NotAuthenticated("signing failed".to_string()))
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let not_authenticated = || AuthError::NotAuthenticated(token.to_string());
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(not_authenticated());
        };
        let header: Value = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(not_authenticated)?;
        if header.get("alg").and_then(Value::as_str) != Some("HS512") {
            return Err(not_authenticated());
        }
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .ok()
            .and_then(|bytes| Tag::from_slice(&bytes).ok())
            .ok_or_else(not_authenticated)?;
        let signed = &token[..header_len(token)];
        HmacSha512::verify(&signature, &self.key, signed.as_bytes())
            .map_err(|_| not_authenticated())?;
        let claims: serde_json::Map<String, Value> = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(not_authenticated)?;
        Claims::from_map(claims)
    }
}

/// Length of `<header>.<payload>`.
fn header_len(token: &str) -> usize {
    token.rfind('.').unwrap_or(token.len())
}

#[async_trait]
impl Provider for Builtin {
    fn new_token(
        &self,
        user: &str,
        scopes: &[&str],
        mut claims: serde_json::Map<String, Value>,
    ) -> Result<String, AuthError> {
        claims.insert("user".to_string(), Value::String(user.to_string()));
        claims.insert("scope".to_string(), Value::String(scopes.join(" ")));
        let header = json!({"alg": "HS512", "typ": "JWT"});
        let encode = |value: &Value| {
            serde_json::to_vec(value)
                .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
                .map_err(|e| AuthError::NotAuthenticated(e.to_string()))
        };
        let signed = format!("{}.{}", encode(&header)?, encode(&Value::Object(claims))?);
        let tag = self.sign(&signed)?;
        Ok(format!(
            "{signed}.{}",
            URL_SAFE_NO_PAD.encode(tag.unprotected_as_bytes())
        ))
    }

    async fn authenticate(&self, authorization: &str) -> Result<Claims, AuthError> {
        let token = authorization
            .strip_prefix(BEARER)
            .unwrap_or(authorization)
            .trim();
        let claims = self.decode(token)?;
        let validators: Vec<Arc<dyn Validator>> = self.validators.read().clone();
        for validator in validators {
            validator.validate(&claims).await?;
        }
        Ok(claims)
    }
}

/// Permits everything.
pub struct NoAuth;

#[async_trait]
impl Provider for NoAuth {
    fn new_token(
        &self,
        _user: &str,
        _scopes: &[&str],
        _claims: serde_json::Map<String, Value>,
    ) -> Result<String, AuthError> {
        Ok(String::new())
    }

    async fn authenticate(&self, _authorization: &str) -> Result<Claims, AuthError> {
        Ok(Claims {
            user: "admin.noauth".to_string(),
            scope: "*:*".to_string(),
            task: None,
            other: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::auth::ADDON_ROLE;

    struct Reject;

    #[async_trait]
    impl Validator for Reject {
        async fn validate(&self, claims: &Claims) -> Result<(), AuthError> {
            match claims.task {
                Some(_) => Err(AuthError::not_valid("rejected")),
                None => Ok(()),
            }
        }
    }

    fn task_claims(id: u64) -> serde_json::Map<String, Value> {
        json!({"task": id}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let provider = Builtin::new("tackle").unwrap();
        let token = provider
            .new_token("addon:analyzer", &ADDON_ROLE, task_claims(5))
            .unwrap();
        let claims = provider
            .authenticate(&format!("Bearer {token}"))
            .await
            .unwrap();
        assert_eq!(claims.user, "addon:analyzer");
        assert_eq!(claims.task, Some(5));
        assert_eq!(claims.scopes().len(), ADDON_ROLE.len());
        assert!(claims.scopes().iter().any(|s| s.allow("files", "post")));
    }

    #[tokio::test]
    async fn test_token_wrong_key_or_tampered() {
        let provider = Builtin::new("tackle").unwrap();
        let token = provider.new_token("admin", &["*:*"], Default::default()).unwrap();

        let other = Builtin::new("other").unwrap();
        assert!(matches!(
            other.authenticate(&token).await,
            Err(AuthError::NotAuthenticated(_))
        ));

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"user":"root","scope":"*:*"}"#);
        parts[1] = &forged;
        assert!(provider.authenticate(&parts.join(".")).await.is_err());
        assert!(provider.authenticate("Bearer not-a-token").await.is_err());
    }

    #[tokio::test]
    async fn test_validators_run() {
        let provider = Builtin::new("tackle").unwrap();
        provider.register(Arc::new(Reject));
        let plain = provider.new_token("admin", &["*:*"], Default::default()).unwrap();
        assert!(provider.authenticate(&plain).await.is_ok());
        let task = provider.new_token("addon:x", &["*:*"], task_claims(1)).unwrap();
        assert_eq!(
            provider.authenticate(&task).await.unwrap_err(),
            AuthError::not_valid("rejected")
        );
    }

    #[tokio::test]
    async fn test_noauth() {
        let claims = NoAuth.authenticate("").await.unwrap();
        assert_eq!(claims.user, "admin.noauth");
        assert!(claims.scopes()[0].allow("tasks", "delete"));
    }
}
