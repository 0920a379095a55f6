use serde::{Deserialize, Serialize};

/// Short-lived bootstrap token minted by the provisioning queue at
/// instance-create time and embedded in the provider's user-data payload
/// (§4.6, §6 "Instance metadata transport").
///
/// The token is a JWT whose subject is the instance name; the metadata
/// service accepts it only while the instance is `pending`/`installing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTokenClaims {
    /// Instance name.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl InstanceTokenClaims {
    pub fn new(instance_name: impl Into<String>, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: instance_name.into(),
            iat: now,
            exp: now + ttl_secs,
        }
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_not_expired() {
        let t = InstanceTokenClaims::new("garm-abc123", 3600);
        assert!(!t.is_expired());
        assert_eq!(t.sub, "garm-abc123");
    }

    #[test]
    fn ttl_zero_is_immediately_expired() {
        let t = InstanceTokenClaims::new("garm-abc123", -1);
        assert!(t.is_expired());
    }
}
