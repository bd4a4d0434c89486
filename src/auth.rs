//! A thin bearer-token auth layer gating the HTTP surface. This is
//! deliberately not a port of a full RBAC/API-key/OAuth2 subsystem — the
//! spec treats authentication as peripheral and reuses only the JWT claims
//! shape a caller already carries: subject, issuer, audience, expiry.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;

/// Claim structure for JWT tokens issued to API callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// User's roles. Defaults to empty so tokens minted before this field
    /// existed still decode; an empty list means no elevated access.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The authenticated caller, extracted from request extensions by
/// [`auth_middleware`] before the handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthUser {
    /// Check if the user has a specific role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Admins can act on behalf of any user — used to scope
    /// `GET /api/orders/{id}` to "the owner or an admin".
    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingAuth,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}

/// Validates a bearer JWT against `config`'s secret/issuer/audience and
/// returns the subject claim as a `Uuid` alongside its roles.
pub fn validate_token(config: &AppConfig, token: &str) -> Result<(Uuid, Vec<String>), AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[config.auth_issuer.clone()]);
    validation.set_audience(&[config.auth_audience.clone()]);

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?
    .claims;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
    Ok((user_id, claims.roles))
}

/// Axum middleware: validates the bearer token and inserts [`AuthUser`]
/// into request extensions so handlers can use it as an extractor.
pub async fn auth_middleware(
    axum::extract::State(config): axum::extract::State<Arc<AppConfig>>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let token = match token {
        Some(t) => t,
        None => return AuthError::MissingAuth.into_response(),
    };

    match validate_token(&config, token) {
        Ok((user_id, roles)) => {
            request.extensions_mut().insert(AuthUser { user_id, roles });
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn test_config() -> AppConfig {
        crate::config::test_support::base_config()
    }

    fn sign(config: &AppConfig, sub: &str, exp_offset_secs: i64) -> String {
        sign_with_roles(config, sub, exp_offset_secs, vec![])
    }

    fn sign_with_roles(
        config: &AppConfig,
        sub: &str,
        exp_offset_secs: i64,
        roles: Vec<String>,
    ) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset_secs,
            iss: config.auth_issuer.clone(),
            aud: config.auth_audience.clone(),
            roles,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_user_id() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = sign(&config, &user_id.to_string(), 3600);
        let (resolved_id, roles) = validate_token(&config, &token).unwrap();
        assert_eq!(resolved_id, user_id);
        assert!(roles.is_empty());
    }

    #[test]
    fn admin_role_round_trips_through_the_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = sign_with_roles(&config, &user_id.to_string(), 3600, vec!["admin".to_string()]);
        let (_, roles) = validate_token(&config, &token).unwrap();
        assert!(roles.iter().any(|r| r == "admin"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let token = sign(&config, &Uuid::new_v4().to_string(), -10);
        assert!(matches!(
            validate_token(&config, &token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let config = test_config();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 3600,
            iss: config.auth_issuer.clone(),
            aud: "someone-else".to_string(),
            roles: vec![],
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            validate_token(&config, &token),
            Err(AuthError::InvalidToken)
        ));
    }
}
