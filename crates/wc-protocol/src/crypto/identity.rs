/// Client identity: did:key encoding and EdDSA-signed JWTs for relay auth.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::WalletConnectError;

const DID_PREFIX: &str = "did:key:";
/// Multibase prefix for base58btc.
const MULTIBASE_BASE58BTC: char = 'z';
/// Multicodec header for an Ed25519 public key.
const MULTICODEC_ED25519_HEADER: [u8; 2] = [0xed, 0x01];

pub const JWT_ALG: &str = "EdDSA";
pub const JWT_TYP: &str = "JWT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for JwtHeader {
    fn default() -> Self {
        Self {
            alg: JWT_ALG.to_string(),
            typ: JWT_TYP.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

/// `did:key:z` + base58btc(0xed 0x01 ‖ public key).
pub fn encode_did(key: &VerifyingKey) -> String {
    let mut bytes = Vec::with_capacity(MULTICODEC_ED25519_HEADER.len() + 32);
    bytes.extend_from_slice(&MULTICODEC_ED25519_HEADER);
    bytes.extend_from_slice(key.as_bytes());
    format!(
        "{DID_PREFIX}{MULTIBASE_BASE58BTC}{}",
        bs58::encode(bytes).into_string()
    )
}

pub fn decode_did(did: &str) -> Result<VerifyingKey, WalletConnectError> {
    let encoded = did
        .strip_prefix(DID_PREFIX)
        .and_then(|rest| rest.strip_prefix(MULTIBASE_BASE58BTC))
        .ok_or_else(|| WalletConnectError::missing(format!("did: {did}")))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| WalletConnectError::missing(format!("did encoding: {e}")))?;
    let key = bytes
        .strip_prefix(&MULTICODEC_ED25519_HEADER[..])
        .ok_or_else(|| WalletConnectError::missing("did is not an ed25519 key"))?;
    let key: [u8; 32] = key
        .try_into()
        .map_err(|_| WalletConnectError::missing("did key length"))?;
    VerifyingKey::from_bytes(&key).map_err(|e| WalletConnectError::Crypto(e.to_string()))
}

/// Sign `claims` as a compact JWT.
pub fn sign_jwt(key: &SigningKey, claims: &JwtClaims) -> Result<String, WalletConnectError> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&JwtHeader::default())?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let data = format!("{header}.{payload}");
    let signature = key.sign(data.as_bytes());
    Ok(format!("{data}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

/// Decode a JWT and check its signature against the issuer DID.
pub fn verify_jwt(jwt: &str) -> Result<JwtClaims, WalletConnectError> {
    let mut parts = jwt.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(WalletConnectError::missing("jwt must have three parts"));
    };

    let decode = |part: &str| {
        URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|e| WalletConnectError::Decode(format!("jwt part: {e}")))
    };
    let parsed_header: JwtHeader = serde_json::from_slice(&decode(header)?)?;
    if parsed_header.alg != JWT_ALG {
        return Err(WalletConnectError::missing(format!("jwt alg {}", parsed_header.alg)));
    }
    let claims: JwtClaims = serde_json::from_slice(&decode(payload)?)?;
    let signature = Signature::from_slice(&decode(signature)?)
        .map_err(|e| WalletConnectError::Crypto(e.to_string()))?;

    let issuer = decode_did(&claims.iss)?;
    issuer
        .verify(format!("{header}.{payload}").as_bytes(), &signature)
        .map_err(|_| WalletConnectError::Crypto("jwt signature verification failed".into()))?;
    Ok(claims)
}
