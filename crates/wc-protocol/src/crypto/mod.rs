/// Key lifecycle, envelope encode/decode and client identity.
///
/// Key agreement is X25519; the shared secret goes through HKDF-SHA256 to a
/// 32-byte ChaCha20-Poly1305 key. Symmetric keys are stored by topic,
/// private keys by their public key (hex).
pub mod envelope;
pub mod identity;
mod keychain;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

pub use envelope::EnvelopeType;
pub use identity::{JwtClaims, JwtHeader};
pub use keychain::KeyChain;

use crate::storage::KeyValueStorage;
use crate::types::{now_secs, ONE_DAY};
use crate::WalletConnectError;

/// Keychain tag of the persisted Ed25519 identity seed.
pub const CLIENT_SEED_TAG: &str = "client_ed25519_seed";

/// Options for [`Crypto::encode`].
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub envelope_type: EnvelopeType,
    /// Own public key (hex); embedded in type 1 envelopes.
    pub sender_public_key: Option<String>,
    /// Peer public key (hex); with the sender key selects the type 1 topic.
    pub receiver_public_key: Option<String>,
}

/// Options for [`Crypto::decode`].
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Own public key (hex), used to derive the key of a type 1 envelope.
    pub receiver_public_key: Option<String>,
}

pub struct Crypto {
    keychain: KeyChain,
    initialized: AtomicBool,
}

impl Crypto {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            keychain: KeyChain::new(storage),
            initialized: AtomicBool::new(false),
        }
    }

    pub async fn init(&self) -> Result<(), WalletConnectError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.keychain.init().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn is_initialized(&self) -> Result<(), WalletConnectError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(WalletConnectError::NotInitialized {
                name: "crypto".into(),
            })
        }
    }

    pub async fn has_keys(&self, tag: &str) -> Result<bool, WalletConnectError> {
        self.is_initialized()?;
        Ok(self.keychain.has(tag).await)
    }

    // ── Key lifecycle ────────────────────────────────────────────────

    /// Create an X25519 key pair and return the public key (hex).
    pub async fn generate_key_pair(&self) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let public_hex = hex::encode(public.as_bytes());
        self.keychain
            .set(&public_hex, hex::encode(secret.to_bytes()))
            .await?;
        Ok(public_hex)
    }

    /// ECDH with the peer, HKDF to a symmetric key, store it and return its topic.
    ///
    /// Both peers arrive at the same key and default topic.
    pub async fn generate_shared_key(
        &self,
        self_public_key: &str,
        peer_public_key: &str,
        override_topic: Option<&str>,
    ) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let private = envelope::key_from_hex(&self.keychain.get(self_public_key).await?)?;
        let peer = envelope::key_from_hex(peer_public_key)?;

        let shared = StaticSecret::from(private).diffie_hellman(&PublicKey::from(peer));
        let sym_key = derive_sym_key(shared.as_bytes())?;
        self.set_sym_key(&hex::encode(sym_key), override_topic).await
    }

    /// Register a symmetric key (hex) under `override_topic` or `sha256(key)`.
    pub async fn set_sym_key(
        &self,
        sym_key: &str,
        override_topic: Option<&str>,
    ) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let bytes = envelope::key_from_hex(sym_key)?;
        let topic = match override_topic {
            Some(topic) => topic.to_string(),
            None => hash_key(&bytes),
        };
        self.keychain.set(&topic, sym_key.to_string()).await?;
        Ok(topic)
    }

    pub async fn delete_key_pair(&self, public_key: &str) -> Result<(), WalletConnectError> {
        self.is_initialized()?;
        self.keychain.delete(public_key).await
    }

    pub async fn delete_sym_key(&self, topic: &str) -> Result<(), WalletConnectError> {
        self.is_initialized()?;
        self.keychain.delete(topic).await
    }

    async fn sym_key(&self, topic: &str) -> Result<[u8; 32], WalletConnectError> {
        let hex_key = self.keychain.get(topic).await?;
        envelope::key_from_hex(&hex_key)
    }

    // ── Envelopes ────────────────────────────────────────────────────

    /// Type 0 encryption with the key registered for `topic`.
    pub async fn encrypt(&self, topic: &str, message: &str) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let key = self.sym_key(topic).await?;
        envelope::encrypt(message.as_bytes(), &key, EnvelopeType::Type0, None, None)
    }

    pub async fn decrypt(&self, topic: &str, encoded: &str) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let key = self.sym_key(topic).await?;
        envelope::decrypt(&key, encoded)
    }

    /// Serialize `payload` and seal it for `topic`.
    ///
    /// Without a key for the topic the JSON is hex-encoded in the clear.
    pub async fn encode<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        opts: EncodeOptions,
    ) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let mut topic = topic.to_string();
        let mut sender = None;
        if opts.envelope_type == EnvelopeType::Type1 {
            let sender_hex = opts
                .sender_public_key
                .as_deref()
                .ok_or_else(|| WalletConnectError::missing("sender public key"))?;
            sender = Some(envelope::key_from_hex(sender_hex)?);
            if let Some(receiver_hex) = opts.receiver_public_key.as_deref() {
                topic = self.generate_shared_key(sender_hex, receiver_hex, None).await?;
            }
        }

        let message = serde_json::to_string(payload)?;
        if !self.keychain.has(&topic).await {
            return Ok(hex::encode(message));
        }
        let key = self.sym_key(&topic).await?;
        envelope::encrypt(message.as_bytes(), &key, opts.envelope_type, None, sender.as_ref())
    }

    /// Open an envelope received on `topic` and parse its JSON.
    ///
    /// Type 1 envelopes carry the sender key; with `receiver_public_key`
    /// the key is re-derived before decrypting. Falls back to hex when
    /// no key is registered for the resolved topic.
    pub async fn decode<T: DeserializeOwned>(
        &self,
        topic: &str,
        encoded: &str,
        opts: DecodeOptions,
    ) -> Result<T, WalletConnectError> {
        self.is_initialized()?;
        let mut topic = topic.to_string();
        if let Some(receiver) = opts.receiver_public_key.as_deref() {
            if let Ok(params) = envelope::deserialize(encoded) {
                if let Some(sender) = params.sender_public_key {
                    topic = self
                        .generate_shared_key(receiver, &hex::encode(sender), None)
                        .await?;
                }
            }
        }

        let message = if self.keychain.has(&topic).await {
            self.decrypt(&topic, encoded).await?
        } else {
            let bytes = hex::decode(encoded)
                .map_err(|e| WalletConnectError::Decode(format!("unencrypted payload: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| WalletConnectError::Decode(format!("unencrypted payload: {e}")))?
        };
        Ok(serde_json::from_str(&message)?)
    }

    // ── Identity ─────────────────────────────────────────────────────

    async fn client_seed(&self) -> Result<[u8; 32], WalletConnectError> {
        if let Ok(seed) = self.keychain.get(CLIENT_SEED_TAG).await {
            return envelope::key_from_hex(&seed);
        }
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        self.keychain.set(CLIENT_SEED_TAG, hex::encode(seed)).await?;
        tracing::info!("created client identity seed");
        Ok(seed)
    }

    /// DID of this installation's identity key.
    pub async fn get_client_id(&self) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let key = SigningKey::from_bytes(&self.client_seed().await?);
        Ok(identity::encode_did(&key.verifying_key()))
    }

    /// Issue a 24h relay auth token for `audience`.
    pub async fn sign_jwt(&self, audience: &str) -> Result<String, WalletConnectError> {
        self.is_initialized()?;
        let key = SigningKey::from_bytes(&self.client_seed().await?);
        let mut sub = [0u8; 32];
        OsRng.fill_bytes(&mut sub);
        let iat = now_secs();
        let claims = JwtClaims {
            iss: identity::encode_did(&key.verifying_key()),
            sub: hex::encode(sub),
            aud: audience.to_string(),
            iat,
            exp: iat + ONE_DAY,
        };
        identity::sign_jwt(&key, &claims)
    }
}

/// HKDF-SHA256 with empty salt and info, expanded to 32 bytes.
fn derive_sym_key(shared_secret: &[u8; 32]) -> Result<[u8; 32], WalletConnectError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(&[], &mut key)
        .map_err(|e| WalletConnectError::Crypto(format!("hkdf expand: {e}")))?;
    Ok(key)
}

/// Default topic of a symmetric key: hex(sha256(key)).
pub fn hash_key(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

/// Content hash used for publish and dedup bookkeeping: hex(sha256(message)).
pub fn hash_message(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

/// Fresh random 32-byte key as hex.
pub fn generate_random_key() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::{json, Value};

    async fn crypto() -> Crypto {
        let crypto = Crypto::new(Arc::new(MemoryStorage::new()));
        crypto.init().await.unwrap();
        crypto
    }

    #[tokio::test]
    async fn operations_require_init() {
        let crypto = Crypto::new(Arc::new(MemoryStorage::new()));
        let err = crypto.generate_key_pair().await.unwrap_err();
        assert!(matches!(err, WalletConnectError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn shared_key_is_symmetric() {
        let alice = crypto().await;
        let bob = crypto().await;
        let a_pk = alice.generate_key_pair().await.unwrap();
        let b_pk = bob.generate_key_pair().await.unwrap();

        let topic_a = alice.generate_shared_key(&a_pk, &b_pk, None).await.unwrap();
        let topic_b = bob.generate_shared_key(&b_pk, &a_pk, None).await.unwrap();
        assert_eq!(topic_a, topic_b);
        assert_eq!(
            alice.keychain.get(&topic_a).await.unwrap(),
            bob.keychain.get(&topic_b).await.unwrap()
        );
        // Default topic is the hash of the key.
        let key = envelope::key_from_hex(&alice.keychain.get(&topic_a).await.unwrap()).unwrap();
        assert_eq!(topic_a, hash_key(&key));
    }

    #[tokio::test]
    async fn set_sym_key_default_and_override_topic() {
        let crypto = crypto().await;
        let key = generate_random_key();
        let topic = crypto.set_sym_key(&key, None).await.unwrap();
        assert_eq!(topic, hash_key(&hex::decode(&key).unwrap()));
        assert_eq!(topic.len(), 64);

        let custom = crypto.set_sym_key(&key, Some("custom")).await.unwrap();
        assert_eq!(custom, "custom");
        assert!(crypto.has_keys("custom").await.unwrap());
    }

    #[tokio::test]
    async fn encrypt_decrypt_by_topic() {
        let crypto = crypto().await;
        let topic = crypto.set_sym_key(&generate_random_key(), None).await.unwrap();
        let sealed = crypto.encrypt(&topic, "hello relay").await.unwrap();
        assert_eq!(crypto.decrypt(&topic, &sealed).await.unwrap(), "hello relay");

        let err = crypto.decrypt("unknown", &sealed).await.unwrap_err();
        assert!(matches!(err, WalletConnectError::NoMatchingKey { .. }));
    }

    #[tokio::test]
    async fn encode_decode_type0_between_peers() {
        let alice = crypto().await;
        let bob = crypto().await;
        let key = generate_random_key();
        let topic = alice.set_sym_key(&key, None).await.unwrap();
        bob.set_sym_key(&key, None).await.unwrap();

        let payload = json!({"id": 1, "jsonrpc": "2.0", "method": "wc_sessionPing", "params": {}});
        let encoded = alice.encode(&topic, &payload, EncodeOptions::default()).await.unwrap();
        assert_ne!(encoded, hex::encode(payload.to_string()));
        let decoded: Value = bob.decode(&topic, &encoded, DecodeOptions::default()).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn encode_decode_type1_derives_topic() {
        let alice = crypto().await;
        let bob = crypto().await;
        let a_pk = alice.generate_key_pair().await.unwrap();
        let b_pk = bob.generate_key_pair().await.unwrap();

        let payload = json!({"hello": "bob"});
        let opts = EncodeOptions {
            envelope_type: EnvelopeType::Type1,
            sender_public_key: Some(a_pk.clone()),
            receiver_public_key: Some(b_pk.clone()),
        };
        let encoded = alice.encode("ignored", &payload, opts).await.unwrap();
        let params = envelope::deserialize(&encoded).unwrap();
        assert_eq!(params.sender_public_key.map(hex::encode), Some(a_pk));

        let decoded: Value = bob
            .decode(
                "ignored",
                &encoded,
                DecodeOptions {
                    receiver_public_key: Some(b_pk),
                },
            )
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn unencrypted_fallback_without_key() {
        let crypto = crypto().await;
        let payload = json!({"discovery": true});
        let encoded = crypto
            .encode("no-key-topic", &payload, EncodeOptions::default())
            .await
            .unwrap();
        assert_eq!(encoded, hex::encode(payload.to_string()));
        let decoded: Value = crypto
            .decode("no-key-topic", &encoded, DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn wrong_key_is_a_hard_error() {
        let alice = crypto().await;
        let mallory = crypto().await;
        let topic = alice.set_sym_key(&generate_random_key(), None).await.unwrap();
        mallory
            .set_sym_key(&generate_random_key(), Some(topic.as_str()))
            .await
            .unwrap();

        let encoded = alice
            .encode(&topic, &json!({"x": 1}), EncodeOptions::default())
            .await
            .unwrap();
        let result: Result<Value, _> = mallory.decode(&topic, &encoded, DecodeOptions::default()).await;
        assert!(matches!(result, Err(WalletConnectError::Crypto(_))));
    }

    #[tokio::test]
    async fn client_id_is_stable_and_persisted() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let first = Crypto::new(storage.clone());
        first.init().await.unwrap();
        let id = first.get_client_id().await.unwrap();
        assert!(id.starts_with("did:key:z6Mk"));
        assert_eq!(first.get_client_id().await.unwrap(), id);

        let second = Crypto::new(storage);
        second.init().await.unwrap();
        assert_eq!(second.get_client_id().await.unwrap(), id);
    }

    #[tokio::test]
    async fn signed_jwt_verifies_with_client_id() {
        let crypto = crypto().await;
        let jwt = crypto.sign_jwt("wss://relay.walletconnect.com").await.unwrap();
        let claims = identity::verify_jwt(&jwt).unwrap();
        assert_eq!(claims.iss, crypto.get_client_id().await.unwrap());
        assert_eq!(claims.aud, "wss://relay.walletconnect.com");
        assert_eq!(claims.exp - claims.iat, ONE_DAY);
        assert_eq!(claims.sub.len(), 64);
    }

    #[tokio::test]
    async fn delete_keys() {
        let crypto = crypto().await;
        let pk = crypto.generate_key_pair().await.unwrap();
        crypto.delete_key_pair(&pk).await.unwrap();
        assert!(!crypto.has_keys(&pk).await.unwrap());

        let topic = crypto.set_sym_key(&generate_random_key(), None).await.unwrap();
        crypto.delete_sym_key(&topic).await.unwrap();
        assert!(!crypto.has_keys(&topic).await.unwrap());
    }
}
