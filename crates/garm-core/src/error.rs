use thiserror::Error;

/// The six error kinds every public garm operation maps into (§7).
///
/// Each variant carries a human-readable message; `Unavailable` additionally
/// carries `persistent`, distinguishing a forge's persistent 401 (park the
/// affected manager workflow in unauthorized-backoff) from a transient
/// connection reset or 5xx (retry once, per §4.2).
#[derive(Error, Debug)]
pub enum Error {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {message}")]
    Unavailable { message: String, persistent: bool },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            persistent: false,
        }
    }

    pub fn unavailable_persistent(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            persistent: true,
        }
    }

    /// True for an `Unavailable` error the forge boundary marked persistent
    /// (e.g. a 401), signalling the Pool Manager should enter
    /// unauthorized-backoff rather than treat this as a transient blip.
    pub fn is_persistent_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable {
                persistent: true,
                ..
            }
        )
    }

    /// True for a not-found error. Callers at the store/forge/provider
    /// boundary use this to implement idempotent deletes (§7).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {e}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Internal(format!("database error: {other}")),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 401 {
                return Error::unavailable_persistent(format!("forge returned 401: {e}"));
            }
            if status.as_u16() == 404 {
                return Error::NotFound(format!("forge returned 404: {e}"));
            }
            if status.as_u16() == 429 || status.is_server_error() {
                return Error::unavailable(format!("forge returned {status}: {e}"));
            }
        }
        if e.is_timeout() || e.is_connect() {
            return Error::unavailable(format!("forge call failed: {e}"));
        }
        Error::Internal(format!("forge call failed: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("io error: {e}"))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_unavailable_is_detected() {
        let e = Error::unavailable_persistent("401");
        assert!(e.is_persistent_unavailable());
        let e2 = Error::unavailable("timeout");
        assert!(!e2.is_persistent_unavailable());
    }

    #[test]
    fn not_found_detection() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(!Error::Internal("x".into()).is_not_found());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let e: Error = sqlx::Error::RowNotFound.into();
        assert!(e.is_not_found());
    }
}
