//! End-to-end flow tests over the in-process store and local field cipher.

use std::sync::Arc;
use std::time::Duration;

use userauth::cipher::{FieldCipher, LocalFieldCipher};
use userauth::config::{AppConfig, JwtConfig};
use userauth::dto::{LoginRequest, RegisterRequest};
use userauth::error::AuthError;
use userauth::store::{CredentialStore, MemoryStore};
use userauth::token::TokenKeys;
use userauth::user::{FIELD_FIRST_NAME, FIELD_LAST_NAME};
use userauth::AuthService;

const JWT_SECRET: &str = "integration-test-signing-secret!!";

fn test_config() -> AppConfig {
    AppConfig {
        jwt: JwtConfig {
            secret: JWT_SECRET.into(),
            ttl_hours: 24,
        },
        users_table: "users-test".into(),
        kms_key_id: "local".into(),
        min_password_len: 8,
    }
}

fn test_service() -> (AuthService, Arc<MemoryStore>, Arc<LocalFieldCipher>) {
    let store = Arc::new(MemoryStore::default());
    let cipher = Arc::new(LocalFieldCipher::new([7u8; 32]));
    let service = AuthService::new(&test_config(), store.clone(), cipher.clone());
    (service, store, cipher)
}

fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.into(),
        password: "Secret123!".into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
    }
}

fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.into(),
        password: password.into(),
    }
}

#[tokio::test]
async fn register_then_login_returns_verifiable_token() {
    let (service, _, _) = test_service();

    let created = service
        .register(register_request("a@b.com"))
        .await
        .expect("register");

    let token = service
        .login(login_request("a@b.com", "Secret123!"))
        .await
        .expect("login");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, 86400);
    assert_eq!(token.scope, "read write");

    let keys = TokenKeys::new(JWT_SECRET, Duration::from_secs(86400));
    let claims = keys.verify(&token.access_token).expect("verify token");
    assert_eq!(claims.sub, created.user_id);
    assert_eq!(claims.scope, "read write");
}

#[tokio::test]
async fn duplicate_email_is_a_conflict_case_insensitively() {
    let (service, store, _) = test_service();

    service
        .register(register_request("a@b.com"))
        .await
        .expect("first register");

    let err = service
        .register(register_request("A@B.COM"))
        .await
        .expect_err("second register must fail");
    assert!(matches!(err, AuthError::AlreadyExists));
    assert_eq!(store.count().await, 1);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_indistinguishable() {
    let (service, _, _) = test_service();
    service
        .register(register_request("a@b.com"))
        .await
        .expect("register");

    let wrong_password = service
        .login(login_request("a@b.com", "wrong-password"))
        .await
        .expect_err("wrong password must fail");
    let unknown_email = service
        .login(login_request("nobody@b.com", "Secret123!"))
        .await
        .expect_err("unknown email must fail");

    assert!(matches!(wrong_password, AuthError::InvalidCredentials));
    assert!(matches!(unknown_email, AuthError::InvalidCredentials));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn register_validation_failures() {
    let (service, store, _) = test_service();

    assert!(matches!(
        service.register(register_request("not-an-email")).await,
        Err(AuthError::Validation(_))
    ));

    let mut short_password = register_request("a@b.com");
    short_password.password = "short".into();
    assert!(matches!(
        service.register(short_password).await,
        Err(AuthError::Validation(_))
    ));

    let mut blank_name = register_request("a@b.com");
    blank_name.first_name = "   ".into();
    assert!(matches!(
        service.register(blank_name).await,
        Err(AuthError::Validation(_))
    ));

    // No partial records from any failed attempt.
    assert_eq!(store.count().await, 0);
}

#[tokio::test]
async fn login_requires_email_and_password() {
    let (service, _, _) = test_service();
    assert!(matches!(
        service.login(login_request("", "Secret123!")).await,
        Err(AuthError::Validation(_))
    ));
    assert!(matches!(
        service.login(login_request("a@b.com", "")).await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn concurrent_registrations_have_exactly_one_winner() {
    let (service, store, _) = test_service();
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.register(register_request("race@b.com")).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => created += 1,
            Err(AuthError::AlreadyExists) => conflicts += 1,
            Err(other) => panic!("unexpected outcome: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.count().await, 1);
}

#[tokio::test]
async fn stored_record_never_holds_plaintext() {
    let (service, store, cipher) = test_service();
    let created = service
        .register(register_request("Ada@B.com"))
        .await
        .expect("register");

    // Email is stored normalized; the original casing finds nothing.
    let record = store
        .find_by_email("ada@b.com")
        .await
        .expect("find")
        .expect("record present");
    assert_eq!(record.user_id, created.user_id);
    assert_eq!(record.email, "ada@b.com");
    assert_eq!(record.created_at, record.updated_at);

    assert_ne!(record.password_hash, "Secret123!");
    assert!(record.password_hash.starts_with("$argon2"));

    let first = record
        .encrypted_profile
        .get(FIELD_FIRST_NAME)
        .expect("firstName envelope");
    let last = record
        .encrypted_profile
        .get(FIELD_LAST_NAME)
        .expect("lastName envelope");
    assert!(!first
        .ciphertext
        .windows(3)
        .any(|w| w == "Ada".as_bytes()));

    assert_eq!(
        cipher.decrypt(FIELD_FIRST_NAME, first).await.expect("decrypt"),
        "Ada"
    );
    assert_eq!(
        cipher.decrypt(FIELD_LAST_NAME, last).await.expect("decrypt"),
        "Lovelace"
    );
}
