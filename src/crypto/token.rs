//! # Session Token Codec
//!
//! A session token is a 16-byte identity record encrypted under a static
//! deployment-wide AES-128 key (ECB, one block, no padding) and sent as 32
//! lowercase hex characters. The server keeps no session table: a token that
//! decrypts *is* a session.
//!
//! ## Identity Record
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0..4  | `userId`, big-endian `i32` |
//! | 4     | bit 7: fresh flag, bits 0..=6: random |
//! | 5..16 | random filler |
//!
//! ## Key Derivation
//!
//! The per-session key is `hex(HMAC-MD5(hmac_key, record))`, computed over the
//! *unencrypted* record. The 32 ASCII bytes of that hex string, not the 16
//! digest bytes, are the AES-256 envelope key.
//!
//! Tokens carry no integrity or expiry field. Any 32-hex-character string
//! opens to *some* record; wrong keys yield garbage identities rather than
//! errors.

use super::envelope::EnvelopeKey;
use crate::error::{ReariseError, Result};
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use std::fmt;

type HmacMd5 = Hmac<Md5>;

/// Identity record length, equal to the AES block size
pub const RECORD_LEN: usize = 16;

/// Token length in hex characters
pub const TOKEN_HEX_LEN: usize = RECORD_LEN * 2;

const FRESH_FLAG: u8 = 0x80;

/// Unencrypted 16-byte identity record
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityRecord([u8; RECORD_LEN]);

impl IdentityRecord {
    /// Build a record with random filler
    #[must_use]
    pub fn generate(user_id: i32, fresh: bool) -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        rand::thread_rng().fill_bytes(&mut bytes[4..]);
        Self::with_filler(user_id, fresh, bytes)
    }

    /// Build a record from caller-chosen filler bytes
    ///
    /// Bytes 0..4 of `filler` are overwritten by the user id and bit 7 of
    /// byte 4 by the fresh flag.
    #[must_use]
    pub fn with_filler(user_id: i32, fresh: bool, mut filler: [u8; RECORD_LEN]) -> Self {
        filler[..4].copy_from_slice(&user_id.to_be_bytes());
        if fresh {
            filler[4] |= FRESH_FLAG;
        } else {
            filler[4] &= !FRESH_FLAG;
        }
        Self(filler)
    }

    /// Account id
    #[must_use]
    pub fn user_id(&self) -> i32 {
        i32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Whether the account was just created or has not finished its first
    /// download
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.0[4] & FRESH_FLAG != 0
    }

    /// Raw record bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.0
    }
}

impl fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("user_id", &self.user_id())
            .field("fresh", &self.is_fresh())
            .finish_non_exhaustive()
    }
}

/// Result of minting a session
#[derive(Debug, Clone)]
pub struct MintedSession {
    /// Token sent in the session header
    pub session_id: String,
    /// Per-session key in its textual (hex) form, as returned to clients
    pub encryption_key: String,
}

impl MintedSession {
    /// Envelope key derived from the textual key
    #[must_use]
    pub fn envelope_key(&self) -> EnvelopeKey {
        ascii_key(&self.encryption_key)
    }
}

/// Result of opening a token
#[derive(Debug, Clone)]
pub struct OpenedSession {
    /// Account id
    pub user_id: i32,
    /// Fresh flag carried in the record
    pub fresh: bool,
    /// Per-session envelope key
    pub key: EnvelopeKey,
}

/// Mints and opens session tokens
#[derive(Clone)]
pub struct SessionTokenCodec {
    cipher: Aes128,
    mac: HmacMd5,
}

impl SessionTokenCodec {
    /// Create a codec from the token cipher key and the HMAC key
    ///
    /// ## Errors
    /// Fails if `token_key` is not 16 bytes.
    pub fn new(token_key: &[u8], hmac_key: &[u8]) -> Result<Self> {
        let cipher = Aes128::new_from_slice(token_key).map_err(|_| {
            ReariseError::config_error(
                format!("token key must be 16 bytes, got {}", token_key.len()),
                None,
            )
        })?;
        let mac = <HmacMd5 as Mac>::new_from_slice(hmac_key)
            .map_err(|_| ReariseError::config_error("invalid HMAC key", None))?;
        Ok(Self { cipher, mac })
    }

    /// Create a codec from hex-encoded keys
    pub fn from_hex(token_key_hex: &str, hmac_key_hex: &str) -> Result<Self> {
        let token_key = hex::decode(token_key_hex).map_err(|e| {
            ReariseError::config_error("token key is not valid hex", Some(Box::new(e)))
        })?;
        let hmac_key = hex::decode(hmac_key_hex).map_err(|e| {
            ReariseError::config_error("HMAC key is not valid hex", Some(Box::new(e)))
        })?;
        Self::new(&token_key, &hmac_key)
    }

    /// Mint a token for `user_id`
    #[must_use]
    pub fn mint(&self, user_id: i32, fresh: bool) -> MintedSession {
        self.mint_record(&IdentityRecord::generate(user_id, fresh))
    }

    /// Mint a token for an explicit record
    #[must_use]
    pub fn mint_record(&self, record: &IdentityRecord) -> MintedSession {
        let mut block = aes::Block::clone_from_slice(record.as_bytes());
        self.cipher.encrypt_block(&mut block);
        MintedSession {
            session_id: hex::encode(block),
            encryption_key: self.derive_key_hex(record),
        }
    }

    /// Open a token
    ///
    /// ## Errors
    /// Returns [`ReariseError::InvalidToken`] unless the token is exactly 32
    /// lowercase hex characters.
    pub fn open(&self, token: &str) -> Result<OpenedSession> {
        let record = self.open_record(token)?;
        Ok(OpenedSession {
            user_id: record.user_id(),
            fresh: record.is_fresh(),
            key: ascii_key(&self.derive_key_hex(&record)),
        })
    }

    /// Decrypt a token back into its identity record
    pub fn open_record(&self, token: &str) -> Result<IdentityRecord> {
        if !is_well_formed(token) {
            return Err(ReariseError::invalid_token(format!(
                "expected {TOKEN_HEX_LEN} lowercase hex characters, got {} characters",
                token.len()
            )));
        }
        let bytes = hex::decode(token)
            .map_err(|e| ReariseError::invalid_token(format!("token is not hex: {e}")))?;
        let mut block = aes::Block::clone_from_slice(&bytes);
        self.cipher.decrypt_block(&mut block);

        let mut record = [0u8; RECORD_LEN];
        record.copy_from_slice(&block);
        Ok(IdentityRecord(record))
    }

    /// Hex HMAC-MD5 of the raw record
    #[must_use]
    pub fn derive_key_hex(&self, record: &IdentityRecord) -> String {
        let mut mac = self.mac.clone();
        mac.update(record.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for SessionTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenCodec").finish_non_exhaustive()
    }
}

/// Envelope key whose bytes are the ASCII text of a hex digest
///
/// Textual keys shorter or longer than 32 bytes are truncated or zero-padded;
/// well-formed session keys are always exactly 32.
#[must_use]
pub fn ascii_key(text: &str) -> EnvelopeKey {
    let mut bytes = [0u8; super::envelope::KEY_LEN];
    let src = text.as_bytes();
    let len = src.len().min(bytes.len());
    bytes[..len].copy_from_slice(&src[..len]);
    EnvelopeKey::new(bytes)
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_HEX_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_KEY: &str = "000102030405060708090a0b0c0d0e0f";
    const HMAC_KEY: &str = "101112131415161718191a1b1c1d1e1f";

    fn codec() -> SessionTokenCodec {
        SessionTokenCodec::from_hex(TOKEN_KEY, HMAC_KEY).unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let codec = codec();
        for (user_id, fresh) in [(12345, false), (12345, true), (0, false), (-1, true), (i32::MAX, false)] {
            let minted = codec.mint(user_id, fresh);
            assert_eq!(minted.session_id.len(), TOKEN_HEX_LEN);
            assert_eq!(minted.encryption_key.len(), 32);

            let opened = codec.open(&minted.session_id).unwrap();
            assert_eq!(opened.user_id, user_id);
            assert_eq!(opened.fresh, fresh);
            assert_eq!(opened.key, minted.envelope_key());
        }
    }

    #[test]
    fn test_key_is_deterministic_for_same_record() {
        let codec = codec();
        let record = IdentityRecord::with_filler(12345, false, [0xaa; RECORD_LEN]);
        let a = codec.mint_record(&record);
        let b = codec.mint_record(&record);
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.encryption_key, b.encryption_key);
    }

    #[test]
    fn test_filler_makes_tokens_unpredictable() {
        let codec = codec();
        let a = codec.mint(7, false);
        let b = codec.mint(7, false);
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.encryption_key, b.encryption_key);
    }

    #[test]
    fn test_record_layout() {
        let record = IdentityRecord::with_filler(0x0102_0304, true, [0x11; RECORD_LEN]);
        let bytes = record.as_bytes();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(bytes[4], 0x91);
        assert!(bytes[5..].iter().all(|&b| b == 0x11));

        let cleared = IdentityRecord::with_filler(1, false, [0xff; RECORD_LEN]);
        assert_eq!(cleared.as_bytes()[4], 0x7f);
        assert!(!cleared.is_fresh());
    }

    #[test]
    fn test_key_is_ascii_hex_of_digest() {
        let codec = codec();
        let minted = codec.mint(42, false);
        let key = minted.envelope_key();
        assert_eq!(&key.as_bytes()[..], minted.encryption_key.as_bytes());
        assert!(key.as_bytes().iter().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let codec = codec();
        for token in [
            "",
            "abc",
            "0123456789abcdef0123456789abcde",
            "0123456789abcdef0123456789abcdef0",
            "0123456789ABCDEF0123456789ABCDEF",
            "0123456789abcdef0123456789abcdeg",
        ] {
            assert!(
                matches!(codec.open(token), Err(ReariseError::InvalidToken { .. })),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_foreign_token_opens_to_garbage() {
        let minted = codec().mint(12345, false);
        let other = SessionTokenCodec::from_hex("ffffffffffffffffffffffffffffffff", HMAC_KEY).unwrap();
        let opened = other.open(&minted.session_id).unwrap();
        assert_ne!(opened.key, minted.envelope_key());
    }

    #[test]
    fn test_bad_key_lengths() {
        assert!(SessionTokenCodec::new(&[0u8; 15], b"k").is_err());
        assert!(SessionTokenCodec::from_hex("zz", HMAC_KEY).is_err());
    }
}
