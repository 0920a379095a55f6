use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Admin JWT claims. Every mutating or listing Request Facade call
/// requires `is_admin()` to be true (§4.4, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Subject (operator user ID).
    pub sub: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Roles held by the caller.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Custom claims (e.g. entity scoping, in future).
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl AdminClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.exp
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    pub fn builder() -> AdminClaimsBuilder {
        AdminClaimsBuilder::new()
    }
}

/// Builder for admin claims.
#[derive(Debug, Default)]
pub struct AdminClaimsBuilder {
    sub: Option<String>,
    roles: Vec<String>,
    custom: HashMap<String, serde_json::Value>,
    duration_secs: i64,
}

impl AdminClaimsBuilder {
    pub fn new() -> Self {
        Self {
            sub: None,
            roles: Vec::new(),
            custom: HashMap::new(),
            duration_secs: 3600,
        }
    }

    pub fn user_id(mut self, id: Uuid) -> Self {
        self.sub = Some(id.to_string());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn duration_secs(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn build(self) -> crate::Result<AdminClaims> {
        let sub = self
            .sub
            .ok_or_else(|| crate::Error::Internal("admin claims require a subject".into()))?;
        let now = chrono::Utc::now().timestamp();
        Ok(AdminClaims {
            sub,
            iat: now,
            exp: now + self.duration_secs,
            roles: self.roles,
            custom: self.custom,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_grants_is_admin() {
        let user_id = Uuid::new_v4();
        let claims = AdminClaims::builder()
            .user_id(user_id)
            .role("admin")
            .duration_secs(7200)
            .build()
            .unwrap();

        assert_eq!(claims.user_id(), Some(user_id));
        assert!(claims.is_admin());
        assert!(!claims.is_expired());
    }

    #[test]
    fn non_admin_role_denied() {
        let claims = AdminClaims::builder()
            .user_id(Uuid::new_v4())
            .role("viewer")
            .build()
            .unwrap();
        assert!(!claims.is_admin());
    }

    #[test]
    fn expiration_detected() {
        let claims = AdminClaims {
            sub: "x".into(),
            iat: 0,
            exp: 1,
            roles: vec![],
            custom: HashMap::new(),
        };
        assert!(claims.is_expired());
    }
}
