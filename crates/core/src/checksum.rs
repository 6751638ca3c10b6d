//! Migration-invariant user checksums.
//!
//! The checksum covers every part of the aggregate a role migration must not
//! touch: identity, profile data, structured columns, timestamps, and the
//! related-data summary. It deliberately excludes `role` and `version`, the
//! only two fields a migration changes.
//!
//! Fields are serialized into a sorted map before hashing, so the digest
//! does not depend on struct field order or on the order related rows were
//! read in.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::hashing::sha256_hex;
use crate::roles::Role;
use crate::types::{DbId, Timestamp};
use crate::user::{RelatedSummary, UserAggregate};

/// Identifies the canonicalization scheme, so stored checksums can be
/// recomputed after a format change.
pub const CHECKSUM_ALGORITHM: &str = "sha256/canonical-json-v1";

/// Canonical, sorted representation of the checksummed fields.
pub fn canonical_fields(user: &UserAggregate) -> BTreeMap<&'static str, Value> {
    let mut fields = BTreeMap::new();
    fields.insert("id", json!(user.id));
    fields.insert("email", json!(user.email));
    fields.insert("name", json!(user.name));
    fields.insert("subscription_status", json!(user.subscription_status));
    fields.insert("preferences", json!(user.preferences.to_raw()));
    fields.insert("profile", json!(user.profile.to_raw()));
    fields.insert("created_at", json!(user.created_at.to_rfc3339()));
    fields.insert(
        "last_login_at",
        json!(user.last_login_at.map(|t| t.to_rfc3339())),
    );
    fields.insert("related", json!(user.related));
    fields
}

/// Compute the checksum of a user aggregate.
pub fn checksum(user: &UserAggregate) -> String {
    let canonical = canonical_fields(user);
    // Serializing a BTreeMap of plain JSON values cannot fail.
    let text = serde_json::to_string(&canonical).unwrap_or_default();
    sha256_hex(text.as_bytes())
}

/// Fail with `IntegrityCheckFailed` unless the two checksums agree.
pub fn verify_unchanged(user_id: DbId, expected: &str, actual: &str) -> Result<(), CoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::IntegrityCheckFailed {
            user_id,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Checksum plus the values it covers, for operators comparing two points
/// in time by hand.
#[derive(Debug, Clone, Serialize)]
pub struct ChecksumReport {
    pub user_id: DbId,
    pub role: Role,
    pub version: i64,
    pub algorithm: &'static str,
    pub checksum: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: Timestamp,
    pub last_login_at: Option<Timestamp>,
    pub preferences_valid: bool,
    pub profile_valid: bool,
    pub related: RelatedSummary,
}

impl ChecksumReport {
    pub fn for_user(user: &UserAggregate) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            version: user.version,
            algorithm: CHECKSUM_ALGORITHM,
            checksum: checksum(user),
            email: user.email.clone(),
            name: user.name.clone(),
            created_at: user.created_at,
            last_login_at: user.last_login_at,
            preferences_valid: !user.preferences.is_malformed(),
            profile_valid: !user.profile.is_malformed(),
            related: user.related.clone(),
        }
    }
}
