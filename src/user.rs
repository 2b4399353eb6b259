use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Profile field names carried in `encrypted_profile`.
pub const FIELD_FIRST_NAME: &str = "firstName";
pub const FIELD_LAST_NAME: &str = "lastName";

/// Ciphertext envelope for a single profile field.
///
/// Each field is sealed under its own data key; the data key travels wrapped
/// by the managed key named in `key_id`, so one field can be rotated or
/// re-encrypted without touching the rest of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEnvelope {
    pub key_id: String,
    #[serde(with = "serde_bytes")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Persisted user record.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: Uuid,
    /// Normalized (lowercase) email, the store's uniqueness key. Immutable.
    pub email: String,
    /// Argon2 PHC digest. Only ever compared, never decrypted.
    pub password_hash: String,
    pub encrypted_profile: BTreeMap<String, FieldEnvelope>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    /// Assemble a new record with a freshly generated id and both timestamps
    /// set to now.
    pub fn new(
        email: String,
        password_hash: String,
        encrypted_profile: BTreeMap<String, FieldEnvelope>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            encrypted_profile,
            created_at: now,
            updated_at: now,
        }
    }
}

// Records pass through tracing call sites; keep the hash and ciphertexts out
// of any Debug output.
impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field(
                "encrypted_profile",
                &self.encrypted_profile.keys().collect::<Vec<_>>(),
            )
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
