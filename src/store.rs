//! Credential store adapter: durable user records keyed by normalized email.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::{config::Region, types::AttributeValue, Client};
use base64ct::{Base64, Encoding};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::user::{FieldEnvelope, UserRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional create lost: a record with this email already exists.
    #[error("record already exists")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Durable record store. `create_if_absent` must be atomic on the email key;
/// the flows rely on it, not on their own pre-check, for uniqueness.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError>;
}

const ATTR_USER_ID: &str = "userId";
const ATTR_EMAIL: &str = "email";
const ATTR_PASSWORD_HASH: &str = "passwordHash";
const ATTR_PROFILE: &str = "encryptedProfile";
const ATTR_CREATED_AT: &str = "createdAt";
const ATTR_UPDATED_AT: &str = "updatedAt";

const ATTR_KEY_ID: &str = "keyId";
const ATTR_ENCRYPTED_KEY: &str = "encryptedKey";
const ATTR_NONCE: &str = "nonce";
const ATTR_CIPHERTEXT: &str = "ciphertext";

/// DynamoDB-backed store. The table's partition key is the normalized email,
/// which makes `attribute_not_exists(email)` a true atomic create-if-absent
/// for the uniqueness constraint.
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    pub fn new(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    /// Connect using the default AWS credential/region chain.
    pub async fn connect(table: &str) -> Self {
        let shared = defaults(BehaviorVersion::latest()).load().await;
        Self::new(Client::new(&shared), table)
    }

    /// Connect to a local DynamoDB endpoint with static credentials.
    pub async fn connect_local(
        table: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;
        Self::new(Client::new(&shared), table)
    }
}

#[async_trait]
impl CredentialStore for DynamoStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(ATTR_EMAIL, AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::Error::new(e).context("dynamodb get_item")))?;

        match out.item() {
            Some(item) => Ok(Some(item_to_record(item)?)),
            None => Ok(None),
        }
    }

    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError> {
        let item = record_to_item(record)?;
        match self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(email)")
            .send()
            .await
        {
            Ok(_) => {
                debug!(user_id = %record.user_id, "user record created");
                Ok(())
            }
            Err(err) => {
                let svc = err.into_service_error();
                if svc.is_conditional_check_failed_exception() {
                    Err(StoreError::Conflict)
                } else {
                    Err(StoreError::Unavailable(
                        anyhow::Error::new(svc).context("dynamodb put_item"),
                    ))
                }
            }
        }
    }
}

fn record_to_item(record: &UserRecord) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let mut profile = HashMap::new();
    for (field, envelope) in &record.encrypted_profile {
        profile.insert(field.clone(), envelope_to_attr(envelope));
    }

    let created_at = record
        .created_at
        .format(&Rfc3339)
        .context("format createdAt")
        .map_err(StoreError::Unavailable)?;
    let updated_at = record
        .updated_at
        .format(&Rfc3339)
        .context("format updatedAt")
        .map_err(StoreError::Unavailable)?;

    let mut item = HashMap::new();
    item.insert(
        ATTR_USER_ID.to_string(),
        AttributeValue::S(record.user_id.to_string()),
    );
    item.insert(
        ATTR_EMAIL.to_string(),
        AttributeValue::S(record.email.clone()),
    );
    item.insert(
        ATTR_PASSWORD_HASH.to_string(),
        AttributeValue::S(record.password_hash.clone()),
    );
    item.insert(ATTR_PROFILE.to_string(), AttributeValue::M(profile));
    item.insert(ATTR_CREATED_AT.to_string(), AttributeValue::S(created_at));
    item.insert(ATTR_UPDATED_AT.to_string(), AttributeValue::S(updated_at));
    Ok(item)
}

fn item_to_record(item: &HashMap<String, AttributeValue>) -> Result<UserRecord, StoreError> {
    let parse = || -> anyhow::Result<UserRecord> {
        let user_id = Uuid::parse_str(string_attr(item, ATTR_USER_ID)?).context("parse userId")?;
        let email = string_attr(item, ATTR_EMAIL)?.to_string();
        let password_hash = string_attr(item, ATTR_PASSWORD_HASH)?.to_string();

        let profile_attr = item
            .get(ATTR_PROFILE)
            .and_then(|v| v.as_m().ok())
            .ok_or_else(|| anyhow!("missing attribute {ATTR_PROFILE}"))?;
        let mut encrypted_profile = BTreeMap::new();
        for (field, attr) in profile_attr {
            encrypted_profile.insert(field.clone(), attr_to_envelope(attr)?);
        }

        let created_at = OffsetDateTime::parse(string_attr(item, ATTR_CREATED_AT)?, &Rfc3339)
            .context("parse createdAt")?;
        let updated_at = OffsetDateTime::parse(string_attr(item, ATTR_UPDATED_AT)?, &Rfc3339)
            .context("parse updatedAt")?;

        Ok(UserRecord {
            user_id,
            email,
            password_hash,
            encrypted_profile,
            created_at,
            updated_at,
        })
    };
    parse().map_err(StoreError::Unavailable)
}

fn envelope_to_attr(envelope: &FieldEnvelope) -> AttributeValue {
    let mut m = HashMap::new();
    m.insert(
        ATTR_KEY_ID.to_string(),
        AttributeValue::S(envelope.key_id.clone()),
    );
    m.insert(
        ATTR_ENCRYPTED_KEY.to_string(),
        AttributeValue::S(Base64::encode_string(&envelope.encrypted_key)),
    );
    m.insert(
        ATTR_NONCE.to_string(),
        AttributeValue::S(Base64::encode_string(&envelope.nonce)),
    );
    m.insert(
        ATTR_CIPHERTEXT.to_string(),
        AttributeValue::S(Base64::encode_string(&envelope.ciphertext)),
    );
    AttributeValue::M(m)
}

fn attr_to_envelope(attr: &AttributeValue) -> anyhow::Result<FieldEnvelope> {
    let m = attr
        .as_m()
        .map_err(|_| anyhow!("profile field is not a map"))?;
    let key_id = map_string(m, ATTR_KEY_ID)?.to_string();
    Ok(FieldEnvelope {
        key_id,
        encrypted_key: decode_b64(m, ATTR_ENCRYPTED_KEY)?,
        nonce: decode_b64(m, ATTR_NONCE)?,
        ciphertext: decode_b64(m, ATTR_CIPHERTEXT)?,
    })
}

fn string_attr<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> anyhow::Result<&'a str> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing attribute {name}"))
}

fn map_string<'a>(m: &'a HashMap<String, AttributeValue>, name: &str) -> anyhow::Result<&'a str> {
    m.get(name)
        .and_then(|v| v.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing envelope attribute {name}"))
}

fn decode_b64(m: &HashMap<String, AttributeValue>, name: &str) -> anyhow::Result<Vec<u8>> {
    let s = map_string(m, name)?;
    Base64::decode_vec(s).map_err(|e| anyhow!("decode {name}: {e}"))
}

/// In-process store for tests and AWS-less embedding. One lock around the
/// map keeps check-and-insert atomic.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub async fn count(&self) -> usize {
        self.users.lock().await.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.lock().await.get(email).cloned())
    }

    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.lock().await;
        if users.contains_key(&record.email) {
            return Err(StoreError::Conflict);
        }
        users.insert(record.email.clone(), record.clone());
        Ok(())
    }
}
