use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_hours: i64,
}

/// Process-wide configuration, read once at startup and passed by reference
/// into constructors. Holds the token-signing secret and the managed-key
/// handle; neither changes after initialization.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt: JwtConfig,
    /// DynamoDB table holding user records, keyed by normalized email.
    pub users_table: String,
    /// Handle of the KMS key that wraps per-field data keys.
    pub kms_key_id: String,
    pub min_password_len: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            ttl_hours: std::env::var("JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
        };
        let users_table =
            std::env::var("DYNAMODB_TABLE_NAME").unwrap_or_else(|_| "users".into());
        let kms_key_id = std::env::var("KMS_KEY_ID").context("KMS_KEY_ID is required")?;
        let min_password_len = std::env::var("MIN_PASSWORD_LEN")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(8);

        Ok(Self {
            jwt,
            users_table,
            kms_key_id,
            min_password_len,
        })
    }
}
