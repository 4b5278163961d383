//! AES payload codec.
//!
//! Encrypts outbound payloads with AES-128/256 in CBC or ECB mode and PKCS#7
//! padding, returning standard base64. The IV is caller-supplied and reused,
//! so identical inputs always yield identical ciphertext.

use std::sync::OnceLock;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;

use crate::error::{Result, SyncError};
use crate::models::{CipherMode, Encryption};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;
type Aes256EcbEnc = ecb::Encryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

/// Character used to right-pad short keys.
pub const KEY_PAD: u8 = b'0';

/// AES block size, which is also the IV length.
pub const IV_LEN: usize = 16;

// ── Normalisation ─────────────────────────────────────────────────────────────

/// Right-pad `key` with `'0'` and truncate it to the mode's key length.
pub fn normalize_key(key: &str, mode: CipherMode) -> Vec<u8> {
    let len = mode.key_len();
    let mut bytes: Vec<u8> = key.as_bytes().iter().copied().take(len).collect();
    bytes.resize(len, KEY_PAD);
    bytes
}

/// First 16 bytes of the textual IV.
pub fn normalize_iv(iv: &str) -> &[u8] {
    let bytes = iv.as_bytes();
    &bytes[..bytes.len().min(IV_LEN)]
}

fn required_iv<'a>(mode: CipherMode, iv: Option<&'a str>) -> Result<&'a [u8]> {
    let iv = iv.ok_or_else(|| SyncError::Encryption(format!("{mode} requires an IV")))?;
    let iv = normalize_iv(iv);
    if iv.len() != IV_LEN {
        return Err(SyncError::Encryption(format!(
            "IV must be at least {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    Ok(iv)
}

fn cipher_init_error(e: impl std::fmt::Display) -> SyncError {
    SyncError::Encryption(format!("cipher initialisation failed: {e}"))
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encrypt `plaintext` and return base64 ciphertext.
///
/// `iv` is ignored for ECB modes and required for CBC modes.
pub fn encrypt(plaintext: &str, key: &str, mode: CipherMode, iv: Option<&str>) -> Result<String> {
    let key = normalize_key(key, mode);
    let data = plaintext.as_bytes();

    let ciphertext = match mode {
        CipherMode::Aes128Cbc => Aes128CbcEnc::new_from_slices(&key, required_iv(mode, iv)?)
            .map_err(cipher_init_error)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        CipherMode::Aes256Cbc => Aes256CbcEnc::new_from_slices(&key, required_iv(mode, iv)?)
            .map_err(cipher_init_error)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        CipherMode::Aes128Ecb => Aes128EcbEnc::new_from_slice(&key)
            .map_err(cipher_init_error)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        CipherMode::Aes256Ecb => Aes256EcbEnc::new_from_slice(&key)
            .map_err(cipher_init_error)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    };

    Ok(BASE64.encode(ciphertext))
}

/// Inverse of [`encrypt`].
pub fn decrypt(ciphertext: &str, key: &str, mode: CipherMode, iv: Option<&str>) -> Result<String> {
    let key = normalize_key(key, mode);
    let data = BASE64
        .decode(ciphertext)
        .map_err(|e| SyncError::Encryption(format!("invalid base64: {e}")))?;

    let plain = match mode {
        CipherMode::Aes128Cbc => Aes128CbcDec::new_from_slices(&key, required_iv(mode, iv)?)
            .map_err(cipher_init_error)?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
        CipherMode::Aes256Cbc => Aes256CbcDec::new_from_slices(&key, required_iv(mode, iv)?)
            .map_err(cipher_init_error)?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
        CipherMode::Aes128Ecb => Aes128EcbDec::new_from_slice(&key)
            .map_err(cipher_init_error)?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
        CipherMode::Aes256Ecb => Aes256EcbDec::new_from_slice(&key)
            .map_err(cipher_init_error)?
            .decrypt_padded_vec_mut::<Pkcs7>(&data),
    }
    .map_err(|e| SyncError::Encryption(format!("invalid padding: {e}")))?;

    String::from_utf8(plain).map_err(|e| SyncError::Encryption(format!("invalid UTF-8: {e}")))
}

// ── Validation ────────────────────────────────────────────────────────────────

fn key_pattern(mode: CipherMode) -> &'static Regex {
    static SHORT: OnceLock<Regex> = OnceLock::new();
    static LONG: OnceLock<Regex> = OnceLock::new();
    match mode.key_len() {
        16 => SHORT.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{16}$").expect("static regex")),
        _ => LONG.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{32}$").expect("static regex")),
    }
}

/// Check key and IV against the fixed-length alphanumeric pattern for the mode.
pub fn validate_encryption(enc: &Encryption) -> Result<()> {
    let mode = enc.cipher_mode;
    let pattern = key_pattern(mode);
    let expected = mode.key_len();

    if !pattern.is_match(&enc.key) {
        return Err(SyncError::InvalidConnection(format!(
            "{mode} key must be {expected} letters or digits"
        )));
    }
    if mode.requires_iv() {
        match enc.iv.as_deref() {
            Some(iv) if pattern.is_match(iv) => {}
            _ => {
                return Err(SyncError::InvalidConnection(format!(
                    "{mode} IV must be {expected} letters or digits"
                )))
            }
        }
    }
    Ok(())
}
