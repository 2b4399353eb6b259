use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Capabilities granted by every access token. Fixed, not request-controllable.
pub const TOKEN_SCOPE: &str = "read write";

/// Signed claim set of an access token. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

/// HS256 signing and verification keys, precomputed once from config.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self::new(&cfg.secret, Duration::from_secs((cfg.ttl_hours as u64) * 3600))
    }

    /// Token lifetime in seconds, as reported in login responses.
    pub fn expires_in(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Sign an access token for `subject` with the configured lifetime.
    pub fn issue(&self, subject: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: subject,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            scope: TOKEN_SCOPE.to_string(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(subject = %subject, "access token signed");
        Ok(token)
    }

    /// Verify signature and expiry. Expiry is strict: zero leeway, no
    /// clock-skew tolerance.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(subject = %data.claims.sub, "access token verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new("test-signing-secret-32-chars-min!", Duration::from_secs(86400))
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = keys();
        let subject = Uuid::new_v4();
        let token = keys.issue(subject).expect("issue");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.scope, TOKEN_SCOPE);
        assert_eq!(claims.exp - claims.iat, 86400);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = keys().issue(Uuid::new_v4()).expect("issue");
        let other = TokenKeys::new("a-different-signing-secret-here!!", Duration::from_secs(86400));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(keys().verify("not-a-token").is_err());
    }

    #[test]
    fn token_expires_after_lifetime() {
        let keys = TokenKeys::new("test-signing-secret-32-chars-min!", Duration::from_secs(1));
        let token = keys.issue(Uuid::new_v4()).expect("issue");
        assert!(keys.verify(&token).is_ok());
        std::thread::sleep(Duration::from_secs(2));
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn expires_in_reports_configured_lifetime() {
        let cfg = JwtConfig {
            secret: "test-signing-secret-32-chars-min!".into(),
            ttl_hours: 24,
        };
        assert_eq!(TokenKeys::from_config(&cfg).expires_in(), 86400);
    }
}
