//! Local read-only API credential management.
//!
//! The loopback dispatch authenticates against the platform with a dedicated
//! read-only key pair minted on first use. Both halves are encrypted at rest
//! with XChaCha20-Poly1305 under a key derived from a process-wide secret;
//! the random nonce is prepended to the ciphertext and the whole blob stored
//! as unpadded URL-safe base64. Anything that fails to decrypt is treated as
//! absent, which triggers regeneration instead of an error.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{aead::Aead, KeyInit, XChaCha20Poly1305, XNonce};
use chrono::Utc;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::LocalApiCredential;
use crate::services::store::{self, keys, OptionStore};

const NONCE_LEN: usize = 24;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(default)]
    key_id: String,
    #[serde(default)]
    consumer_key_enc: String,
    #[serde(default)]
    consumer_secret_enc: String,
}

#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn OptionStore>,
    key: [u8; 32],
}

impl CredentialStore {
    pub fn new(store: Arc<dyn OptionStore>, local_key_secret: &Secret<String>) -> Self {
        let key: [u8; 32] = Sha256::digest(local_key_secret.expose_secret().as_bytes()).into();
        Self { store, key }
    }

    /// Returns the stored credential if both halves decrypt to non-empty
    /// strings; otherwise mints a fresh read-only key pair, persists it
    /// encrypted, and records a one-time notice for the operator surface.
    pub async fn get_or_create(&self) -> Result<LocalApiCredential, AppError> {
        if let Some(stored) =
            store::get_as::<StoredCredential>(self.store.as_ref(), keys::WC_API_CREDENTIALS)
                .await?
        {
            if !stored.key_id.is_empty()
                && !stored.consumer_key_enc.is_empty()
                && !stored.consumer_secret_enc.is_empty()
            {
                let consumer_key = self.decrypt(&stored.consumer_key_enc);
                let consumer_secret = self.decrypt(&stored.consumer_secret_enc);
                if !consumer_key.is_empty() && !consumer_secret.is_empty() {
                    return Ok(LocalApiCredential {
                        key_id: stored.key_id,
                        consumer_key,
                        consumer_secret,
                    });
                }
            }
        }

        let (consumer_key, consumer_secret) = mint_key_pair(&mut rand::thread_rng());
        let key_id = Uuid::new_v4().to_string();

        store::set_as(
            self.store.as_ref(),
            keys::WC_API_CREDENTIALS,
            &StoredCredential {
                key_id: key_id.clone(),
                consumer_key_enc: self.encrypt(&consumer_key)?,
                consumer_secret_enc: self.encrypt(&consumer_secret)?,
            },
        )
        .await?;

        // Persistent notice until the operator clears it.
        self.store
            .set(
                keys::WC_API_KEY_NOTICE,
                json!({
                    "created_at": Utc::now().timestamp(),
                    "key_id": key_id,
                }),
            )
            .await?;

        tracing::info!(key_id = %key_id, "Created read-only WooPayments API credential");

        Ok(LocalApiCredential {
            key_id,
            consumer_key,
            consumer_secret,
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("invalid key: {}", e)))?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("encryption failed: {}", e)))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Decryption failures (corrupt ciphertext, wrong key, truncated blob)
    /// come back as an empty string so the caller regenerates.
    pub fn decrypt(&self, encoded: &str) -> String {
        let blob = match URL_SAFE_NO_PAD.decode(encoded) {
            Ok(blob) => blob,
            Err(_) => return String::new(),
        };
        if blob.len() < NONCE_LEN {
            return String::new();
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = match XChaCha20Poly1305::new_from_slice(&self.key) {
            Ok(cipher) => cipher,
            Err(_) => return String::new(),
        };
        match cipher.decrypt(XNonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => String::from_utf8(plaintext).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

/// Mints a `ck_`/`cs_` pair from 20 bytes of randomness each, hex-encoded.
fn mint_key_pair<R: RngCore>(rng: &mut R) -> (String, String) {
    let mut ck = [0u8; 20];
    let mut cs = [0u8; 20];
    rng.fill_bytes(&mut ck);
    rng.fill_bytes(&mut cs);
    (
        format!("ck_{}", hex::encode(ck)),
        format!("cs_{}", hex::encode(cs)),
    )
}
