//! Sealing of provider bearer tokens at rest.
//!
//! With a configured key, tokens are encrypted with AES-256-GCM and stored as
//! a small JSON envelope. Without a key, tokens are stored as provided.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token key must be {expected} hex characters")]
    KeyLength { expected: usize },

    #[error("invalid hex: {0}")]
    Hex(&'static str),

    #[error("token envelope: {0}")]
    Envelope(String),

    #[error("token encryption failed")]
    Seal,

    #[error("token decryption failed (wrong key?)")]
    Open,
}

#[derive(Clone)]
pub struct TokenKey([u8; TOKEN_KEY_BYTES]);

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenKey(..)")
    }
}

impl TokenKey {
    pub fn from_hex(raw: &str) -> Result<Self, CredentialError> {
        let decoded = hex_decode(raw)?;
        let bytes: [u8; TOKEN_KEY_BYTES] = decoded.try_into().map_err(|_| {
            CredentialError::KeyLength {
                expected: TOKEN_KEY_BYTES * 2,
            }
        })?;
        Ok(Self(bytes))
    }

    fn aead_key(&self) -> Result<LessSafeKey, CredentialError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.0).map_err(|_| CredentialError::Seal)?;
        Ok(LessSafeKey::new(unbound))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedToken {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

pub fn seal_token(token: &str, key: &TokenKey) -> Result<String, CredentialError> {
    let mut buffer = token.as_bytes().to_vec();

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CredentialError::Seal)?;

    key.aead_key()?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut buffer,
        )
        .map_err(|_| CredentialError::Seal)?;

    let envelope = SealedToken {
        version: ENVELOPE_VERSION,
        nonce_hex: hex_encode(&nonce_bytes),
        ciphertext_hex: hex_encode(&buffer),
    };
    serde_json::to_string(&envelope).map_err(|e| CredentialError::Envelope(e.to_string()))
}

/// Returns true when the stored value looks like a sealed envelope rather
/// than a plain bearer token.
pub fn is_sealed(stored: &str) -> bool {
    serde_json::from_str::<SealedToken>(stored).is_ok()
}

pub fn open_token(stored: &str, key: &TokenKey) -> Result<String, CredentialError> {
    let envelope: SealedToken =
        serde_json::from_str(stored).map_err(|e| CredentialError::Envelope(e.to_string()))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(CredentialError::Envelope(format!(
            "unsupported version {}",
            envelope.version
        )));
    }

    let nonce_bytes: [u8; NONCE_BYTES] = hex_decode(&envelope.nonce_hex)?
        .try_into()
        .map_err(|_| CredentialError::Envelope("nonce length".to_string()))?;
    let mut ciphertext = hex_decode(&envelope.ciphertext_hex)?;

    let plaintext = key
        .aead_key()?
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| CredentialError::Open)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CredentialError::Open)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, CredentialError> {
    let bytes = raw.trim().as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(CredentialError::Hex("odd length"));
    }

    bytes
        .chunks(2)
        .map(|pair| {
            let hi = decode_hex_nibble(pair[0]).ok_or(CredentialError::Hex("invalid digit"))?;
            let lo = decode_hex_nibble(pair[1]).ok_or(CredentialError::Hex("invalid digit"))?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{is_sealed, open_token, seal_token, CredentialError, TokenKey};

    const KEY_HEX: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    const OTHER_KEY_HEX: &str = "ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100";

    #[test]
    fn sealed_token_round_trips_and_hides_plaintext() {
        let key = TokenKey::from_hex(KEY_HEX).expect("parse key");
        let sealed = seal_token("bearer-secret", &key).expect("seal");

        assert!(!sealed.contains("bearer-secret"));
        assert!(is_sealed(&sealed));
        assert_eq!(open_token(&sealed, &key).expect("open"), "bearer-secret");
    }

    #[test]
    fn wrong_key_cannot_open() {
        let key = TokenKey::from_hex(KEY_HEX).expect("parse key");
        let other = TokenKey::from_hex(OTHER_KEY_HEX).expect("parse other key");
        let sealed = seal_token("bearer-secret", &key).expect("seal");

        assert!(matches!(
            open_token(&sealed, &other),
            Err(CredentialError::Open)
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            TokenKey::from_hex("abcd"),
            Err(CredentialError::KeyLength { .. })
        ));
        assert!(TokenKey::from_hex("zz").is_err());
    }

    #[test]
    fn plain_tokens_are_not_mistaken_for_envelopes() {
        assert!(!is_sealed("plain-bearer-token"));
    }
}
