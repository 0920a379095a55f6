//! Admin JWT authentication middleware (§4.4, §8). Every mutating or
//! listing Request Facade route requires a valid, non-expired token whose
//! claims carry the `admin` role; webhook ingress and the instance metadata
//! service are mounted outside this middleware and authenticate themselves
//! differently (HMAC signature, one-shot bearer token).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use garm_core::auth::AdminClaims;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

/// Authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// JWT secret for HMAC signing.
    pub jwt_secret: String,
    /// Skip signature verification (DEV MODE ONLY - NEVER USE IN PRODUCTION).
    pub skip_verification: bool,
}

impl AuthConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            skip_verification: false,
        }
    }

    /// Skip signature verification. Only for local development.
    pub fn dev_mode() -> Self {
        Self {
            jwt_secret: String::new(),
            skip_verification: true,
        }
    }
}

/// Authentication middleware holding the decoding key.
#[derive(Clone)]
pub struct AuthMiddleware {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("skip_verification", &self.config.skip_verification)
            .field("decoding_key", &self.decoding_key.is_some())
            .finish()
    }
}

impl AuthMiddleware {
    pub fn new(config: AuthConfig) -> Self {
        let decoding_key = if config.skip_verification || config.jwt_secret.is_empty() {
            None
        } else {
            Some(DecodingKey::from_secret(config.jwt_secret.as_bytes()))
        };
        Self {
            config: Arc::new(config),
            decoding_key,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<AdminClaims, AuthError> {
        if self.config.skip_verification {
            self.decode_without_verification(token)
        } else if let Some(ref key) = self.decoding_key {
            self.decode_with_verification(token, key)
        } else {
            Err(AuthError::InvalidToken("jwt secret not configured".into()))
        }
    }

    fn decode_with_verification(&self, token: &str, key: &DecodingKey) -> Result<AdminClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 60;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = decode::<AdminClaims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                AuthError::InvalidToken("invalid signature".into())
            }
            jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::InvalidToken(format!("missing required claim: {claim}"))
            }
            _ => AuthError::InvalidToken(e.to_string()),
        })?;
        Ok(token_data.claims)
    }

    fn decode_without_verification(&self, token: &str) -> Result<AdminClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let dummy_key = DecodingKey::from_secret(b"dummy");
        let token_data = decode::<AdminClaims>(token, &dummy_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if token_data.claims.is_expired() {
            return Err(AuthError::TokenExpired);
        }
        Ok(token_data.claims)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("invalid authorization header format")]
    InvalidHeader,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("caller lacks the admin role")]
    NotAdmin,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingHeader | AuthError::InvalidHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken(_) | AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::NotAdmin => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

/// Verified admin identity, inserted into request extensions by
/// [`auth_middleware`] and pulled out by route handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: AdminClaims,
}

fn bearer_token(req: &Request<Body>) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;
    header.strip_prefix("Bearer ").map(str::trim).ok_or(AuthError::InvalidHeader)
}

/// Rejects any request whose bearer token does not decode to non-expired,
/// admin-rolled claims (§4.4).
pub async fn auth_middleware(
    State(middleware): State<Arc<AuthMiddleware>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    let claims = match middleware.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    if !claims.is_admin() {
        return AuthError::NotAdmin.into_response();
    }

    req.extensions_mut().insert(AuthContext { claims });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn claims(expired: bool) -> AdminClaims {
        AdminClaims::builder()
            .user_id(Uuid::new_v4())
            .role("admin")
            .duration_secs(if expired { -3600 } else { 3600 })
            .build()
            .unwrap()
    }

    fn token(claims: &AdminClaims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_admin_token_is_accepted() {
        let middleware = AuthMiddleware::new(AuthConfig::with_secret("s3cret"));
        let t = token(&claims(false), "s3cret");
        let result = middleware.validate_token(&t).unwrap();
        assert!(result.is_admin());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let middleware = AuthMiddleware::new(AuthConfig::with_secret("correct"));
        let t = token(&claims(false), "wrong");
        assert!(middleware.validate_token(&t).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let middleware = AuthMiddleware::new(AuthConfig::with_secret("s3cret"));
        let t = token(&claims(true), "s3cret");
        match middleware.validate_token(&t) {
            Err(AuthError::TokenExpired) => {}
            other => panic!("expected TokenExpired, got {other:?}"),
        }
    }

    #[test]
    fn dev_mode_skips_signature_but_checks_expiry() {
        let middleware = AuthMiddleware::new(AuthConfig::dev_mode());
        let valid = token(&claims(false), "whatever");
        assert!(middleware.validate_token(&valid).is_ok());

        let expired = token(&claims(true), "whatever");
        assert!(matches!(middleware.validate_token(&expired), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn non_admin_role_is_flagged_downstream() {
        let viewer = AdminClaims::builder().user_id(Uuid::new_v4()).role("viewer").build().unwrap();
        assert!(!viewer.is_admin());
    }
}
