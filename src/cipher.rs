//! Envelope encryption of individual profile fields.
//!
//! Every field value is sealed with AES-256-GCM under its own single-use data
//! key; the data key is wrapped by a managed key referenced through a key
//! handle and travels inside the envelope. The field name is bound as AEAD
//! associated data, so an envelope moved between fields fails to open.

use anyhow::anyhow;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use aws_sdk_kms::types::DataKeySpec;
use aws_smithy_types::Blob;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::error;

use crate::user::FieldEnvelope;

pub const NONCE_LEN: usize = 12;
const DATA_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Authentication failure on open: tampered or mismatched envelope.
    /// Fails closed, no partial plaintext is ever returned.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("key provider error: {0}")]
    Provider(#[source] anyhow::Error),
}

/// Encrypts and decrypts named profile fields against a managed key.
///
/// Implementations never hold the managed key itself, only a handle to it.
#[async_trait]
pub trait FieldCipher: Send + Sync {
    async fn encrypt(&self, field: &str, plaintext: &str) -> Result<FieldEnvelope, CipherError>;
    async fn decrypt(&self, field: &str, envelope: &FieldEnvelope) -> Result<String, CipherError>;
}

fn seal(key: &[u8], aad: &str, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CipherError> {
    if key.len() != DATA_KEY_LEN {
        return Err(CipherError::Provider(anyhow!(
            "data key must be {DATA_KEY_LEN} bytes"
        )));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CipherError::Provider(anyhow!("aes-gcm seal failed")))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn open(key: &[u8], aad: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    if key.len() != DATA_KEY_LEN || nonce.len() != NONCE_LEN {
        return Err(CipherError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CipherError::DecryptionFailed)
}

/// KMS-backed cipher: a fresh data key per field from `GenerateDataKey`,
/// unwrapped on read with `Decrypt`. Raw key material for the managed key
/// never enters the process.
#[derive(Clone)]
pub struct KmsFieldCipher {
    client: aws_sdk_kms::Client,
    key_id: String,
}

impl KmsFieldCipher {
    pub fn new(client: aws_sdk_kms::Client, key_id: &str) -> Self {
        Self {
            client,
            key_id: key_id.to_string(),
        }
    }
}

#[async_trait]
impl FieldCipher for KmsFieldCipher {
    async fn encrypt(&self, field: &str, plaintext: &str) -> Result<FieldEnvelope, CipherError> {
        let out = self
            .client
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "kms generate_data_key failed");
                CipherError::Provider(anyhow::Error::new(e).context("kms generate_data_key"))
            })?;

        let data_key = out
            .plaintext()
            .ok_or_else(|| CipherError::Provider(anyhow!("kms returned no plaintext data key")))?
            .clone()
            .into_inner();
        let encrypted_key = out
            .ciphertext_blob()
            .ok_or_else(|| CipherError::Provider(anyhow!("kms returned no wrapped data key")))?
            .clone()
            .into_inner();

        let (nonce, ciphertext) = seal(&data_key, field, plaintext.as_bytes())?;
        Ok(FieldEnvelope {
            key_id: self.key_id.clone(),
            encrypted_key,
            nonce,
            ciphertext,
        })
    }

    async fn decrypt(&self, field: &str, envelope: &FieldEnvelope) -> Result<String, CipherError> {
        let out = self
            .client
            .decrypt()
            .key_id(&envelope.key_id)
            .ciphertext_blob(Blob::new(envelope.encrypted_key.clone()))
            .send()
            .await
            .map_err(|e| {
                let svc = e.into_service_error();
                if svc.is_invalid_ciphertext_exception() {
                    CipherError::DecryptionFailed
                } else {
                    error!(error = %svc, "kms decrypt failed");
                    CipherError::Provider(anyhow::Error::new(svc).context("kms decrypt"))
                }
            })?;

        let data_key = out
            .plaintext()
            .ok_or_else(|| CipherError::Provider(anyhow!("kms returned no plaintext data key")))?
            .clone()
            .into_inner();
        let plaintext = open(&data_key, field, &envelope.nonce, &envelope.ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}

/// In-process cipher for dev and tests. A 32-byte master key held in memory
/// plays the managed key and wraps each data key with AES-GCM; the wrap nonce
/// is prepended to the wrapped blob.
#[derive(Clone)]
pub struct LocalFieldCipher {
    master_key: [u8; 32],
    key_id: String,
}

impl LocalFieldCipher {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            key_id: "local".to_string(),
        }
    }
}

#[async_trait]
impl FieldCipher for LocalFieldCipher {
    async fn encrypt(&self, field: &str, plaintext: &str) -> Result<FieldEnvelope, CipherError> {
        let mut data_key = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut data_key);

        let (nonce, ciphertext) = seal(&data_key, field, plaintext.as_bytes())?;
        let (wrap_nonce, wrapped) = seal(&self.master_key, field, &data_key)?;
        let mut encrypted_key = wrap_nonce;
        encrypted_key.extend_from_slice(&wrapped);

        Ok(FieldEnvelope {
            key_id: self.key_id.clone(),
            encrypted_key,
            nonce,
            ciphertext,
        })
    }

    async fn decrypt(&self, field: &str, envelope: &FieldEnvelope) -> Result<String, CipherError> {
        if envelope.encrypted_key.len() <= NONCE_LEN {
            return Err(CipherError::DecryptionFailed);
        }
        let (wrap_nonce, wrapped) = envelope.encrypted_key.split_at(NONCE_LEN);
        let data_key = open(&self.master_key, field, wrap_nonce, wrapped)?;
        let plaintext = open(&data_key, field, &envelope.nonce, &envelope.ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}
