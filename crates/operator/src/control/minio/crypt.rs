//! Encryption of admin API bodies.
//!
//! Layout: `salt (32) | algorithm id (1) | nonce (8) | fragments`. The
//! stream key is derived from the admin secret key and the salt. Fragments
//! are AEAD sealed chunks of at most [`BUF_SIZE`] bytes; each fragment nonce
//! is the 8 byte stream nonce followed by a little-endian sequence number,
//! and each fragment authenticates a flag byte (`0x80` on the final
//! fragment) followed by the tag computed at sequence number zero.
//!
//! Requests are always sealed with PBKDF2 + AES-256-GCM. Responses may use
//! any of the three algorithms the server knows.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use sha2::Sha256;

use crate::control::ControlError;

pub const SALT_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 8;
pub const HEADER_SIZE: usize = SALT_SIZE + 1 + NONCE_SIZE;
pub const TAG_SIZE: usize = 16;
pub const BUF_SIZE: usize = 16 * 1024;

pub const ARGON2ID_AES_GCM: u8 = 0x00;
pub const ARGON2ID_CHACHA20_POLY1305: u8 = 0x01;
pub const PBKDF2_AES_GCM: u8 = 0x02;

const PBKDF2_ROUNDS: u32 = 8192;
const ARGON2ID_TIME: u32 = 1;
const ARGON2ID_MEMORY: u32 = 64 * 1024;
const ARGON2ID_THREADS: u32 = 4;
const FINAL_FLAG: u8 = 0x80;

enum StreamCipher {
    AesGcm(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl StreamCipher {
    fn derive(id: u8, password: &str, salt: &[u8]) -> Result<Self, ControlError> {
        let mut key = [0u8; 32];
        match id {
            PBKDF2_AES_GCM => {
                pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
            }
            ARGON2ID_AES_GCM | ARGON2ID_CHACHA20_POLY1305 => {
                let params = Params::new(ARGON2ID_MEMORY, ARGON2ID_TIME, ARGON2ID_THREADS, Some(32))
                    .map_err(|e| ControlError::Crypto(e.to_string()))?;
                Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                    .hash_password_into(password.as_bytes(), salt, &mut key)
                    .map_err(|e| ControlError::Crypto(e.to_string()))?;
            }
            other => {
                return Err(ControlError::Crypto(format!(
                    "unsupported algorithm id {:#04x}",
                    other
                )))
            }
        }

        let cipher = if id == ARGON2ID_CHACHA20_POLY1305 {
            ChaCha20Poly1305::new_from_slice(&key)
                .map(|c| StreamCipher::ChaCha(Box::new(c)))
        } else {
            Aes256Gcm::new_from_slice(&key).map(|c| StreamCipher::AesGcm(Box::new(c)))
        };
        cipher.map_err(|e| ControlError::Crypto(e.to_string()))
    }

    fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        seq: u32,
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ControlError> {
        let full = fragment_nonce(nonce, seq);
        let payload = Payload { msg, aad };
        let sealed = match self {
            StreamCipher::AesGcm(c) => c.encrypt(GenericArray::from_slice(&full), payload),
            StreamCipher::ChaCha(c) => c.encrypt(GenericArray::from_slice(&full), payload),
        };
        sealed.map_err(|_| ControlError::Crypto("encrypt error".into()))
    }

    fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        seq: u32,
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ControlError> {
        let full = fragment_nonce(nonce, seq);
        let payload = Payload { msg, aad };
        let opened = match self {
            StreamCipher::AesGcm(c) => c.decrypt(GenericArray::from_slice(&full), payload),
            StreamCipher::ChaCha(c) => c.decrypt(GenericArray::from_slice(&full), payload),
        };
        opened.map_err(|_| ControlError::Crypto("decrypt error".into()))
    }

    fn header_tag(&self, nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>, ControlError> {
        self.seal(nonce, 0, &[], &[])
    }
}

fn fragment_nonce(nonce: &[u8; NONCE_SIZE], seq: u32) -> [u8; 12] {
    let mut full = [0u8; 12];
    full[..NONCE_SIZE].copy_from_slice(nonce);
    full[NONCE_SIZE..].copy_from_slice(&seq.to_le_bytes());
    full
}

fn fragment_aad(last: bool, tag: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + tag.len());
    aad.push(if last { FINAL_FLAG } else { 0 });
    aad.extend_from_slice(tag);
    aad
}

fn sequence(index: usize) -> Result<u32, ControlError> {
    u32::try_from(index + 1).map_err(|_| ControlError::Crypto("payload too large".into()))
}

pub fn encrypt(password: &str, data: &[u8]) -> Result<Vec<u8>, ControlError> {
    encrypt_with(password, data, &mut rand::rng())
}

pub fn encrypt_with<R: RngCore>(
    password: &str,
    data: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, ControlError> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let cipher = StreamCipher::derive(PBKDF2_AES_GCM, password, &salt)?;
    let tag = cipher.header_tag(&nonce)?;

    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(BUF_SIZE).collect()
    };
    let last = chunks.len() - 1;

    let mut out = Vec::with_capacity(HEADER_SIZE + data.len() + TAG_SIZE * chunks.len());
    out.extend_from_slice(&salt);
    out.push(PBKDF2_AES_GCM);
    out.extend_from_slice(&nonce);

    for (index, chunk) in chunks.into_iter().enumerate() {
        let aad = fragment_aad(index == last, &tag);
        out.extend(cipher.seal(&nonce, sequence(index)?, chunk, &aad)?);
    }

    Ok(out)
}

pub fn decrypt(password: &str, data: &[u8]) -> Result<Vec<u8>, ControlError> {
    if data.len() < HEADER_SIZE + TAG_SIZE {
        return Err(ControlError::Crypto("encrypted body too short".into()));
    }
    let (header, body) = data.split_at(HEADER_SIZE);
    let salt = &header[..SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&header[SALT_SIZE + 1..]);

    let cipher = StreamCipher::derive(header[SALT_SIZE], password, salt)?;
    let tag = cipher.header_tag(&nonce)?;

    let fragments: Vec<&[u8]> = body.chunks(BUF_SIZE + TAG_SIZE).collect();
    let last = fragments.len() - 1;

    let mut plain = Vec::with_capacity(body.len());
    for (index, fragment) in fragments.into_iter().enumerate() {
        let aad = fragment_aad(index == last, &tag);
        plain.extend(cipher.open(&nonce, sequence(index)?, fragment, &aad)?);
    }
    Ok(plain)
}
