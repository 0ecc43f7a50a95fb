// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::app::errors::{AdaptorError, AdaptorResult};

const ENC_PREFIX: &str = "ENC[AES256_GCM,data:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Names of adaptor parameters whose values are stored encrypted.
pub const SECRET_PARAMS: &[&str] = &["password", "passphrase"];

pub fn is_secret_param(name: &str) -> bool {
    SECRET_PARAMS.contains(&name)
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX) && value.ends_with(']')
}

/// AES-256-GCM cipher for password-class parameters at rest. Values are
/// stored as `ENC[AES256_GCM,data:<b64>,iv:<b64>,tag:<b64>]`.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Derives the cipher key from the configured secret.
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> AdaptorResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AdaptorError::internal("secret encryption failed"))?;
        // aes-gcm appends the tag to the ciphertext; store them separately.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(format!(
            "ENC[AES256_GCM,data:{},iv:{},tag:{}]",
            B64.encode(&sealed),
            B64.encode(nonce_bytes),
            B64.encode(&tag),
        ))
    }

    /// Decrypts an `ENC[...]` value. Plain values pass through untouched so
    /// freshly-submitted configurations keep working before their first save.
    pub fn decrypt(&self, value: &str) -> AdaptorResult<String> {
        if !is_encrypted(value) {
            return Ok(value.to_string());
        }
        let (data, nonce_bytes, tag) = parse_enc(value)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(AdaptorError::not_ready("encrypted value has a malformed iv"));
        }
        let mut sealed = data;
        sealed.extend_from_slice(&tag);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_slice())
            .map_err(|_| {
                AdaptorError::not_ready("secret decryption failed; wrong key or tampered value")
            })?;
        String::from_utf8(plain)
            .map_err(|_| AdaptorError::not_ready("decrypted secret is not valid UTF-8"))
    }
}

fn parse_enc(value: &str) -> AdaptorResult<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let malformed = || AdaptorError::not_ready("malformed ENC[AES256_GCM,...] value");
    let inner = value
        .strip_prefix("ENC[AES256_GCM,")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let mut data = None;
    let mut iv = None;
    let mut tag = None;
    for part in inner.split(',') {
        let (name, b64) = part.split_once(':').ok_or_else(malformed)?;
        let bytes = B64.decode(b64).map_err(|_| malformed())?;
        match name {
            "data" => data = Some(bytes),
            "iv" => iv = Some(bytes),
            "tag" => tag = Some(bytes),
            _ => return Err(malformed()),
        }
    }
    match (data, iv, tag) {
        (Some(data), Some(iv), Some(tag)) => Ok((data, iv, tag)),
        _ => Err(malformed()),
    }
}
