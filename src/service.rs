//! Registration and login flows.

use std::collections::BTreeMap;
use std::sync::Arc;

use aws_config::{defaults, BehaviorVersion};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    cipher::{FieldCipher, KmsFieldCipher},
    config::AppConfig,
    dto::{LoginRequest, RegisterRequest, RegisterResponse, TokenResponse},
    error::{AuthError, AuthResult},
    password,
    store::{CredentialStore, DynamoStore, StoreError},
    token::{TokenKeys, TOKEN_SCOPE},
    user::{UserRecord, FIELD_FIRST_NAME, FIELD_LAST_NAME},
};

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    // Verified when no account matches a login email, so the miss path costs
    // about as much as a password mismatch.
    static ref DUMMY_DIGEST: String =
        password::hash_password("login-timing-placeholder").expect("hash placeholder digest");
}

/// Stateless auth entry points over the credential store, field cipher and
/// token keys. Cheap to clone behind an `Arc`, safe to share across tasks.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<dyn FieldCipher>,
    tokens: TokenKeys,
    min_password_len: usize,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn CredentialStore>,
        cipher: Arc<dyn FieldCipher>,
    ) -> Self {
        Self {
            store,
            cipher,
            tokens: TokenKeys::from_config(&config.jwt),
            min_password_len: config.min_password_len,
        }
    }

    /// Wire the service against AWS: DynamoDB records, KMS field encryption.
    pub async fn init(config: &AppConfig) -> Self {
        let shared = defaults(BehaviorVersion::latest()).load().await;
        let store = Arc::new(DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&shared),
            &config.users_table,
        ));
        let cipher = Arc::new(KmsFieldCipher::new(
            aws_sdk_kms::Client::new(&shared),
            &config.kms_key_id,
        ));
        Self::new(config, store, cipher)
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> AuthResult<RegisterResponse> {
        let email = req.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            warn!("register rejected: invalid email");
            return Err(AuthError::Validation("invalid email".into()));
        }
        if req.password.len() < self.min_password_len {
            warn!("register rejected: password too short");
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }
        let first_name = req.first_name.trim();
        let last_name = req.last_name.trim();
        if first_name.is_empty() || last_name.is_empty() {
            warn!("register rejected: missing name");
            return Err(AuthError::Validation(
                "first and last name are required".into(),
            ));
        }

        // Fast-fail only; uniqueness is enforced by the conditional write
        // below, not by this check.
        match self.store.find_by_email(&email).await {
            Ok(Some(_)) => {
                warn!(email = %email, "email already registered");
                return Err(AuthError::AlreadyExists);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "find_by_email failed");
                return Err(AuthError::Internal(e.into()));
            }
        }

        let password_hash = password::hash_password(&req.password)?;

        let mut profile = BTreeMap::new();
        for (field, value) in [(FIELD_FIRST_NAME, first_name), (FIELD_LAST_NAME, last_name)] {
            let envelope = self.cipher.encrypt(field, value).await.map_err(|e| {
                error!(error = %e, field = field, "field encryption failed");
                AuthError::Internal(e.into())
            })?;
            profile.insert(field.to_string(), envelope);
        }

        let record = UserRecord::new(email, password_hash, profile);
        match self.store.create_if_absent(&record).await {
            Ok(()) => {
                info!(user_id = %record.user_id, email = %record.email, "user registered");
                Ok(RegisterResponse {
                    user_id: record.user_id,
                })
            }
            Err(StoreError::Conflict) => {
                warn!(email = %record.email, "email already registered");
                Err(AuthError::AlreadyExists)
            }
            Err(e) => {
                error!(error = %e, "create user failed");
                Err(AuthError::Internal(e.into()))
            }
        }
    }

    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> AuthResult<TokenResponse> {
        let email = req.email.trim().to_lowercase();
        if email.is_empty() || req.password.is_empty() {
            warn!("login rejected: missing email or password");
            return Err(AuthError::Validation(
                "email and password are required".into(),
            ));
        }

        let user = match self.store.find_by_email(&email).await {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "find_by_email failed");
                return Err(AuthError::Internal(e.into()));
            }
        };

        let user = match user {
            Some(u) => u,
            None => {
                let _ = password::verify_password(&req.password, &DUMMY_DIGEST);
                warn!(email = %email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !password::verify_password(&req.password, &user.password_hash) {
            warn!(user_id = %user.user_id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let access_token = self.tokens.issue(user.user_id)?;
        info!(user_id = %user.user_id, "user logged in");
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.expires_in(),
            scope: TOKEN_SCOPE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_accepts_plain_addresses() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("a.b+c@sub.domain.io"));
    }

    #[test]
    fn email_regex_rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@nodomain"));
        assert!(!is_valid_email("spaces in@local.part"));
        assert!(!is_valid_email("missing@tld"));
    }
}
