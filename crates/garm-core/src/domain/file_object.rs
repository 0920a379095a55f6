use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Tag key reserved for agent-tools bookkeeping; file-object CRUD must
/// refuse to create/update/delete objects carrying it (§3).
pub const RESERVED_TAG_KEY: &str = "category";
pub const RESERVED_TAG_VALUE: &str = "garm-agent";

/// Opaque blob with tag search (§3 "File Object").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: i64,
    pub sha256: String,
    pub size_bytes: u64,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hex-encoded SHA-256 digest of `data`, used as the file object's content
/// fingerprint (§3 "File Object").
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// `true` if these tags carry the reserved `category=garm-agent` marker.
pub fn carries_reserved_tag(tags: &BTreeMap<String, String>) -> bool {
    tags.get(RESERVED_TAG_KEY)
        .map(|v| v == RESERVED_TAG_VALUE)
        .unwrap_or(false)
}

/// File-object create/update/delete must refuse requests carrying the
/// reserved tag (§3, §8).
pub fn validate_mutation(tags: &BTreeMap<String, String>) -> crate::Result<()> {
    if carries_reserved_tag(tags) {
        return Err(crate::Error::BadRequest(format!(
            "tag {RESERVED_TAG_KEY}={RESERVED_TAG_VALUE} is reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_tag() {
        let mut tags = BTreeMap::new();
        tags.insert("category".to_string(), "garm-agent".to_string());
        assert!(validate_mutation(&tags).is_err());
    }

    #[test]
    fn allows_other_tags() {
        let mut tags = BTreeMap::new();
        tags.insert("category".to_string(), "logs".to_string());
        assert!(validate_mutation(&tags).is_ok());
    }
}
