//! Crypto envelope (C2, §4.12): RSA wrap for small control payloads,
//! hybrid AES-GCM + RSA wrap for images carried across chunking.
//!
//! Grounded on `other_examples/.../Group-G-midterm-RSA-Source-Code-leader-main.rs.rs`,
//! an RSA key-transport handshake followed by AES-GCM framing for a
//! near-identical camera-to-leader link. That file uses RSA-OAEP with a
//! 2048-bit key; this core instead uses PKCS#1 v1.5 padding over a
//! 1024-bit key, since §4.12's 117-byte payload ceiling is exactly
//! `128 - 11` (a 1024-bit modulus's PKCS#1 v1.5 overhead) — the preshared
//! keys this protocol was distilled from are sized for that ceiling.

use crate::error::MeshError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

/// Maximum plaintext size the RSA wrap accepts before the caller must
/// downgrade to sending unwrapped (§7's `EnvelopeTooLarge`).
pub const MAX_RSA_PAYLOAD: usize = 117;

const AES_KEY_LEN: usize = 32;
const GCM_NONCE_LEN: usize = 12;

/// One node's RSA key material: its own keypair (to decrypt things
/// addressed to it) plus the public keys of peers it may encrypt for.
/// Keys are preshared and never rotated in-core, per §4.12.
pub struct KeyRing {
    own_private: Option<RsaPrivateKey>,
    peer_public: std::collections::HashMap<crate::address::NodeAddr, RsaPublicKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        KeyRing {
            own_private: None,
            peer_public: std::collections::HashMap::new(),
        }
    }

    pub fn with_own_private_pem(mut self, pem: &str) -> Result<Self, MeshError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| MeshError::ConfigError(format!("invalid RSA private key: {e}")))?;
        self.own_private = Some(key);
        Ok(self)
    }

    pub fn with_peer_public_pem(mut self, peer: crate::address::NodeAddr, pem: &str) -> Result<Self, MeshError> {
        let key = RsaPublicKey::from_public_key_pem(pem).map_err(|e| MeshError::ConfigError(format!("invalid RSA public key for peer {peer}: {e}")))?;
        self.peer_public.insert(peer, key);
        Ok(self)
    }

    fn public_for(&self, peer: crate::address::NodeAddr) -> Option<&RsaPublicKey> {
        self.peer_public.get(&peer)
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}

/// RSA-wraps a small control payload (`H`/`T` bodies) for `peer`. Returns
/// `Err(EnvelopeTooLarge)` when `plaintext` exceeds `MAX_RSA_PAYLOAD`; per
/// §7 the caller is expected to bypass the wrap and send the plaintext
/// unwrapped rather than treat this as fatal.
pub fn rsa_wrap(keys: &KeyRing, peer: crate::address::NodeAddr, plaintext: &[u8]) -> Result<Vec<u8>, MeshError> {
    if plaintext.len() > MAX_RSA_PAYLOAD {
        return Err(MeshError::EnvelopeTooLarge {
            len: plaintext.len(),
            max: MAX_RSA_PAYLOAD,
        });
    }
    let public = keys.public_for(peer).ok_or(MeshError::ConfigError(format!("no RSA public key provisioned for peer {peer}")))?;
    public
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| MeshError::ConfigError(format!("rsa encrypt failed: {e}")))
}

/// Reverses `rsa_wrap` using this node's own private key.
pub fn rsa_unwrap(keys: &KeyRing, ciphertext: &[u8]) -> Result<Vec<u8>, MeshError> {
    let private = keys.own_private.as_ref().ok_or(MeshError::ConfigError("no RSA private key provisioned for this node".into()))?;
    private
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| MeshError::ConfigError(format!("rsa decrypt failed: {e}")))
}

/// Hybrid-wraps an arbitrarily large blob (an image, after chunking takes
/// over): a fresh AES-256-GCM key encrypts the blob; that key is
/// RSA-wrapped and prepended to the ciphertext as
/// `[u16 rsa_len][rsa(key)][nonce(12)][aes_gcm(blob)]`.
pub fn hybrid_wrap(keys: &KeyRing, peer: crate::address::NodeAddr, blob: &[u8]) -> Result<Vec<u8>, MeshError> {
    let public = keys.public_for(peer).ok_or(MeshError::ConfigError(format!("no RSA public key provisioned for peer {peer}")))?;

    let aes_key = Aes256Gcm::generate_key(&mut OsRng);
    let cipher = Aes256Gcm::new(&aes_key);
    let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, blob).map_err(|e| MeshError::ConfigError(format!("aes-gcm encrypt failed: {e}")))?;

    let wrapped_key = public
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, aes_key.as_slice())
        .map_err(|e| MeshError::ConfigError(format!("rsa encrypt of session key failed: {e}")))?;

    let mut out = Vec::with_capacity(2 + wrapped_key.len() + GCM_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&(wrapped_key.len() as u16).to_be_bytes());
    out.extend_from_slice(&wrapped_key);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverses `hybrid_wrap`, recovering the session key with this node's
/// RSA private key and then the blob with AES-GCM. Only the command
/// center is expected to call this, per §4.12.
pub fn hybrid_unwrap(keys: &KeyRing, envelope: &[u8]) -> Result<Vec<u8>, MeshError> {
    if envelope.len() < 2 {
        return Err(MeshError::ConfigError("hybrid envelope shorter than its length prefix".into()));
    }
    let rsa_len = u16::from_be_bytes([envelope[0], envelope[1]]) as usize;
    let rest = &envelope[2..];
    if rest.len() < rsa_len + GCM_NONCE_LEN {
        return Err(MeshError::ConfigError("hybrid envelope truncated before nonce/ciphertext".into()));
    }
    let wrapped_key = &rest[..rsa_len];
    let nonce_bytes = &rest[rsa_len..rsa_len + GCM_NONCE_LEN];
    let ciphertext = &rest[rsa_len + GCM_NONCE_LEN..];

    let private = keys.own_private.as_ref().ok_or(MeshError::ConfigError("no RSA private key provisioned for this node".into()))?;
    let aes_key_bytes = private
        .decrypt(Pkcs1v15Encrypt, wrapped_key)
        .map_err(|e| MeshError::ConfigError(format!("rsa decrypt of session key failed: {e}")))?;
    if aes_key_bytes.len() != AES_KEY_LEN {
        return Err(MeshError::ConfigError("recovered session key has unexpected length".into()));
    }
    let key = Key::<Aes256Gcm>::from_slice(&aes_key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|e| MeshError::ConfigError(format!("aes-gcm decrypt failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    fn keypair_pems() -> (String, String) {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (
            private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            public.to_public_key_pem(LineEnding::LF).unwrap(),
        )
    }

    #[test]
    fn rsa_wrap_round_trips_small_payload() {
        let (priv_pem, pub_pem) = keypair_pems();
        let keys = KeyRing::new().with_own_private_pem(&priv_pem).unwrap().with_peer_public_pem(9, &pub_pem).unwrap();
        let plaintext = b"small control payload";
        let ciphertext = rsa_wrap(&keys, 9, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let recovered = rsa_unwrap(&keys, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn rsa_wrap_rejects_oversized_payload() {
        let (priv_pem, pub_pem) = keypair_pems();
        let keys = KeyRing::new().with_own_private_pem(&priv_pem).unwrap().with_peer_public_pem(9, &pub_pem).unwrap();
        let plaintext = vec![0u8; MAX_RSA_PAYLOAD + 1];
        assert!(matches!(rsa_wrap(&keys, 9, &plaintext), Err(MeshError::EnvelopeTooLarge { .. })));
    }

    #[test]
    fn hybrid_wrap_round_trips_large_blob() {
        let (priv_pem, pub_pem) = keypair_pems();
        let keys = KeyRing::new().with_own_private_pem(&priv_pem).unwrap().with_peer_public_pem(9, &pub_pem).unwrap();
        let blob = vec![42u8; 64 * 1024];
        let envelope = hybrid_wrap(&keys, 9, &blob).unwrap();
        let recovered = hybrid_unwrap(&keys, &envelope).unwrap();
        assert_eq!(recovered, blob);
    }
}
