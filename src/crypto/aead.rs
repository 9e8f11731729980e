//! Session packet cipher (XChaCha20-Poly1305).
//!
//! The pod session negotiates a 16-byte confidentiality key (`ck`). The
//! cipher expands it with HKDF-SHA256 to a 32-byte XChaCha20 key and builds
//! the 24-byte nonce from the session nonce prefix and the transport's
//! nonce sequence:
//!
//! ```text
//! [ nonce prefix (8) | direction (1) | zeros (7) | sequence (8, LE64) ]
//! ```
//!
//! The packet header is the AAD.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{
    CryptoError, MessageCipher, PacketNonce, AEAD_TAG_SIZE, CK_SIZE, NONCE_PREFIX_SIZE,
};

/// Size of the expanded XChaCha20 key.
pub const SESSION_KEY_SIZE: usize = 32;

/// Size of the XChaCha20 nonce.
pub const XNONCE_SIZE: usize = 24;

const CK_EXPAND_INFO: &[u8] = b"pod-session-cipher";

/// Expanded cipher key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Expand a negotiated `ck` into a cipher key.
    pub fn from_ck(ck: &[u8]) -> Result<Self, CryptoError> {
        if ck.len() != CK_SIZE {
            return Err(CryptoError::InvalidKeyMaterial("ck must be 16 bytes"));
        }
        let hk = Hkdf::<Sha256>::new(None, ck);
        let mut key = [0u8; SESSION_KEY_SIZE];
        hk.expand(CK_EXPAND_INFO, &mut key)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(Self { key })
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

/// Build the 24-byte XChaCha20 nonce for one packet.
pub fn construct_nonce(nonce: &PacketNonce) -> [u8; XNONCE_SIZE] {
    let mut out = [0u8; XNONCE_SIZE];
    out[..NONCE_PREFIX_SIZE].copy_from_slice(&nonce.prefix);
    out[NONCE_PREFIX_SIZE] = nonce.direction;
    out[16..24].copy_from_slice(&nonce.sequence.to_le_bytes());
    out
}

/// [`MessageCipher`] backed by XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaCipher;

impl MessageCipher for ChaChaCipher {
    fn encrypt(
        &self,
        key: &[u8],
        nonce: &PacketNonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = SessionKey::from_ck(key)?;
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let xnonce = construct_nonce(nonce);

        cipher
            .encrypt(XNonce::from_slice(&xnonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn decrypt(
        &self,
        key: &[u8],
        nonce: &PacketNonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let key = SessionKey::from_ck(key)?;
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let xnonce = construct_nonce(nonce);

        cipher
            .decrypt(XNonce::from_slice(&xnonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
