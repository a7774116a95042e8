//! # Envelope Codec
//!
//! Body confidentiality for every encrypted request and response.
//!
//! ## Layout
//!
//! ```text
//! +---------+----------------------+---------+----------------------+
//! | 0..2    | 2..18                | 18..20  | 20..                 |
//! | filler  | IV (AES-256-CBC)     | filler  | ciphertext (PKCS#7)  |
//! +---------+----------------------+---------+----------------------+
//! ```
//!
//! All 20 header bytes are random. Only bytes 2..18 are key material (the IV);
//! the rest only obscure the body length.

use crate::error::{ReariseError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use std::fmt;

/// Length of the random envelope header
pub const HEADER_LEN: usize = 20;

/// Range of the header used as the CBC initialization vector
pub const IV_RANGE: std::ops::Range<usize> = 2..18;

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// 32-byte body cipher key
///
/// Session keys are the ASCII bytes of a hex digest; the login key is a fixed
/// 32-character string. Both are plain byte keys here.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey([u8; KEY_LEN]);

impl EnvelopeKey {
    /// Wrap raw key bytes
    #[must_use]
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, failing unless it is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ReariseError::config_error(
                format!("envelope key must be {KEY_LEN} bytes, got {}", bytes.len()),
                None,
            )
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey(..)")
    }
}

/// Encrypt `plaintext` into a fresh envelope
#[must_use]
pub fn encode(key: &EnvelopeKey, plaintext: &[u8]) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    rand::thread_rng().fill_bytes(&mut header);
    encode_with_header(key, header, plaintext)
}

/// Encrypt with a caller-supplied header
///
/// Deterministic; used by benches and fixed-vector tests.
#[must_use]
pub fn encode_with_header(key: &EnvelopeKey, header: [u8; HEADER_LEN], plaintext: &[u8]) -> Vec<u8> {
    let iv = aes::Block::clone_from_slice(&header[IV_RANGE]);
    let cipher = Aes256CbcEnc::new(key.as_bytes().into(), &iv);
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    envelope.extend_from_slice(&header);
    envelope.extend_from_slice(&ciphertext);
    envelope
}

/// Decrypt an envelope
///
/// ## Errors
/// Returns [`ReariseError::Decryption`] if the envelope is shorter than its
/// header, the ciphertext is not block aligned, or the padding is invalid.
pub fn decode(key: &EnvelopeKey, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < HEADER_LEN {
        return Err(ReariseError::decryption(format!(
            "envelope is {} bytes, shorter than its {HEADER_LEN}-byte header",
            envelope.len()
        )));
    }

    let iv = aes::Block::clone_from_slice(&envelope[IV_RANGE]);
    let cipher = Aes256CbcDec::new(key.as_bytes().into(), &iv);
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&envelope[HEADER_LEN..])
        .map_err(|_| ReariseError::decryption("ciphertext length or padding mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> EnvelopeKey {
        EnvelopeKey::new([fill; KEY_LEN])
    }

    #[test]
    fn test_round_trip_various_lengths() {
        let key = key(0x41);
        for len in [0usize, 1, 15, 16, 17, 1024] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let envelope = encode(&key, &plaintext);
            assert_eq!(decode(&key, &envelope).unwrap(), plaintext, "length {len}");
        }
    }

    #[test]
    fn test_envelope_size() {
        let envelope = encode(&key(1), b"hello");
        // one padded block after the header
        assert_eq!(envelope.len(), HEADER_LEN + 16);

        let envelope = encode(&key(1), &[0u8; 16]);
        assert_eq!(envelope.len(), HEADER_LEN + 32);
    }

    #[test]
    fn test_headers_are_random() {
        let a = encode(&key(2), b"same");
        let b = encode(&key(2), b"same");
        assert_ne!(a[..HEADER_LEN], b[..HEADER_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_header_is_deterministic() {
        let header = [7u8; HEADER_LEN];
        let a = encode_with_header(&key(3), header, b"payload");
        let b = encode_with_header(&key(3), header, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_filler_bytes_are_not_key_material() {
        let mut envelope = encode(&key(4), b"filler check");
        envelope[0] ^= 0xff;
        envelope[1] ^= 0xff;
        envelope[18] ^= 0xff;
        envelope[19] ^= 0xff;
        assert_eq!(decode(&key(4), &envelope).unwrap(), b"filler check");
    }

    #[test]
    fn test_short_envelope_rejected() {
        let result = decode(&key(5), &[0u8; HEADER_LEN - 1]);
        assert!(matches!(result, Err(ReariseError::Decryption { .. })));
    }

    #[test]
    fn test_misaligned_ciphertext_rejected() {
        let mut envelope = encode(&key(6), b"aligned");
        envelope.push(0);
        assert!(matches!(
            decode(&key(6), &envelope),
            Err(ReariseError::Decryption { .. })
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        // wrong keys occasionally unpad cleanly; the plaintext never matches
        let envelope = encode(&key(7), &[0x55; 64]);
        let decoded = decode(&key(8), &envelope);
        assert!(decoded.map_or(true, |plaintext| plaintext != [0x55; 64]));
    }

    #[test]
    fn test_key_from_slice() {
        assert!(EnvelopeKey::from_slice(&[0u8; 32]).is_ok());
        assert!(EnvelopeKey::from_slice(&[0u8; 16]).is_err());
        assert_eq!(format!("{:?}", key(9)), "EnvelopeKey(..)");
    }
}
