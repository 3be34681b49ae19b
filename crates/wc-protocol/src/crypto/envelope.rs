/// Binary envelope codec: ChaCha20-Poly1305 with empty associated data.
///
/// Layouts (base64 on the wire):
///
/// ```text
/// type 0: [0x00][iv:12][ciphertext‖tag:16]
/// type 1: [0x01][sender public key:32][iv:12][ciphertext‖tag:16]
/// ```
///
/// Pure functions, no key lookup. See [`Crypto`](super::Crypto) for the
/// topic-based API.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{
        rand_core::{OsRng, RngCore},
        Aead, KeyInit,
    },
    ChaCha20Poly1305, Nonce,
};

use crate::WalletConnectError;

pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

/// Envelope type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeType {
    /// Symmetric key already shared by both peers.
    #[default]
    Type0,
    /// Carries the sender public key so the receiver can derive the key.
    Type1,
}

impl EnvelopeType {
    pub fn as_byte(self) -> u8 {
        match self {
            EnvelopeType::Type0 => 0,
            EnvelopeType::Type1 => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, WalletConnectError> {
        match byte {
            0 => Ok(EnvelopeType::Type0),
            1 => Ok(EnvelopeType::Type1),
            other => Err(WalletConnectError::UnknownType {
                context: format!("envelope type {other}"),
            }),
        }
    }
}

/// A parsed envelope, not yet decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingParams {
    pub envelope_type: EnvelopeType,
    pub sender_public_key: Option<[u8; KEY_LENGTH]>,
    pub iv: [u8; IV_LENGTH],
    pub sealed: Vec<u8>,
}

/// Encrypt `message` into a base64 envelope.
///
/// A random IV is drawn when `iv` is `None`. Type 1 requires
/// `sender_public_key`.
pub fn encrypt(
    message: &[u8],
    sym_key: &[u8; KEY_LENGTH],
    envelope_type: EnvelopeType,
    iv: Option<[u8; IV_LENGTH]>,
    sender_public_key: Option<&[u8; KEY_LENGTH]>,
) -> Result<String, WalletConnectError> {
    let sender = match (envelope_type, sender_public_key) {
        (EnvelopeType::Type1, None) => {
            return Err(WalletConnectError::missing(
                "sender public key required for type 1 envelope",
            ))
        }
        (EnvelopeType::Type1, Some(pk)) => Some(pk),
        (EnvelopeType::Type0, _) => None,
    };

    let iv = iv.unwrap_or_else(|| {
        let mut bytes = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        bytes
    });

    let cipher = ChaCha20Poly1305::new(sym_key.into());
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), message)
        .map_err(|e| WalletConnectError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(1 + KEY_LENGTH + IV_LENGTH + sealed.len());
    out.push(envelope_type.as_byte());
    if let Some(pk) = sender {
        out.extend_from_slice(pk);
    }
    out.extend_from_slice(&iv);
    out.extend_from_slice(&sealed);
    Ok(STANDARD.encode(out))
}

/// Split a base64 envelope into its parts.
pub fn deserialize(encoded: &str) -> Result<EncodingParams, WalletConnectError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| WalletConnectError::Decode(format!("envelope is not base64: {e}")))?;
    let Some((&type_byte, rest)) = bytes.split_first() else {
        return Err(WalletConnectError::Decode("empty envelope".into()));
    };
    let envelope_type = EnvelopeType::from_byte(type_byte)?;

    let (sender_public_key, rest) = match envelope_type {
        EnvelopeType::Type0 => (None, rest),
        EnvelopeType::Type1 => {
            if rest.len() < KEY_LENGTH {
                return Err(WalletConnectError::Decode(format!(
                    "type 1 envelope too short: {} bytes",
                    bytes.len()
                )));
            }
            let (pk, rest) = rest.split_at(KEY_LENGTH);
            let mut key = [0u8; KEY_LENGTH];
            key.copy_from_slice(pk);
            (Some(key), rest)
        }
    };

    if rest.len() < IV_LENGTH + TAG_LENGTH {
        return Err(WalletConnectError::Decode(format!(
            "envelope too short: {} bytes",
            bytes.len()
        )));
    }
    let (iv_bytes, sealed) = rest.split_at(IV_LENGTH);
    let mut iv = [0u8; IV_LENGTH];
    iv.copy_from_slice(iv_bytes);

    Ok(EncodingParams {
        envelope_type,
        sender_public_key,
        iv,
        sealed: sealed.to_vec(),
    })
}

/// Authenticate and decrypt a base64 envelope. Authentication failure is an error.
pub fn decrypt(sym_key: &[u8; KEY_LENGTH], encoded: &str) -> Result<String, WalletConnectError> {
    let params = deserialize(encoded)?;
    let cipher = ChaCha20Poly1305::new(sym_key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&params.iv), params.sealed.as_slice())
        .map_err(|_| WalletConnectError::Crypto("envelope authentication failed".into()))?;
    String::from_utf8(plaintext)
        .map_err(|e| WalletConnectError::Decode(format!("plaintext is not utf-8: {e}")))
}

/// Parse a 32-byte hex key.
pub fn key_from_hex(hex_key: &str) -> Result<[u8; KEY_LENGTH], WalletConnectError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| WalletConnectError::missing(format!("key is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| WalletConnectError::missing(format!("key length {} != 32", v.len())))
}
