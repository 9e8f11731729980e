//! Pairing key agreement and session key derivation.
//!
//! Pairing runs an X25519 exchange and turns the shared secret into a
//! long-term key (LTK). Every later session derives a fresh confidentiality
//! key (`ck`) and challenge response (`res`) from the LTK, the controller's
//! random challenge and the EAP sequence number:
//!
//! ```text
//! DH(controller, pod) ──HKDF(salt = nonces, "pod-ltk")──► LTK (16)
//! LTK ──HKDF(salt = rand ‖ sqn, "ck")──► ck (16)
//! LTK ──HKDF(salt = rand ‖ sqn, "res")─► res (8)
//! ```

use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{
    CryptoError, CK_SIZE, EAP_SQN_SIZE, LTK_SIZE, NONCE_PREFIX_SIZE, PAIRING_NONCE_SIZE,
    PUBLIC_KEY_SIZE,
};

/// Size of the challenge response.
pub const RES_SIZE: usize = 8;

/// Size of the session challenge.
pub const RAND_SIZE: usize = 16;

/// Size of each side's half of the nonce prefix.
pub const IV_SIZE: usize = NONCE_PREFIX_SIZE / 2;

/// Size of a key confirmation value.
pub const CONFIRMATION_SIZE: usize = 16;

const LTK_INFO: &[u8] = b"pod-ltk";
const CK_INFO: &[u8] = b"ck";
const RES_INFO: &[u8] = b"res";

/// An ephemeral X25519 keypair used once during pairing.
///
/// The private key is zeroized on drop.
pub struct PairingKeypair {
    secret: StaticSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl PairingKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Create a keypair from existing private key bytes.
    pub fn from_private(private: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute the DH shared secret with the peer's public key.
    pub fn diffie_hellman(&self, remote_public: &[u8; PUBLIC_KEY_SIZE]) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        *shared.as_bytes()
    }
}

/// Keys for one negotiated session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Confidentiality key.
    pub ck: [u8; CK_SIZE],
    /// Controller IV followed by pod IV.
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

/// Fill a buffer with OS randomness.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

fn expand<const N: usize>(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; N], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; N];
    hk.expand(info, &mut out)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(out)
}

/// Derive the long-term key from the pairing DH output.
///
/// # Arguments
/// * `shared_secret` - X25519 shared secret
/// * `controller_nonce` - Nonce sent by the controller
/// * `pod_nonce` - Nonce sent by the pod
pub fn derive_ltk(
    shared_secret: &[u8; 32],
    controller_nonce: &[u8; PAIRING_NONCE_SIZE],
    pod_nonce: &[u8; PAIRING_NONCE_SIZE],
) -> Result<[u8; LTK_SIZE], CryptoError> {
    let mut salt = [0u8; PAIRING_NONCE_SIZE * 2];
    salt[..PAIRING_NONCE_SIZE].copy_from_slice(controller_nonce);
    salt[PAIRING_NONCE_SIZE..].copy_from_slice(pod_nonce);
    expand(shared_secret, &salt, LTK_INFO)
}

/// Key confirmation value one side sends to prove it holds the LTK.
///
/// `label` distinguishes the controller's confirmation from the pod's.
pub fn confirmation(
    ltk: &[u8; LTK_SIZE],
    label: &[u8],
    transcript: &[u8],
) -> Result<[u8; CONFIRMATION_SIZE], CryptoError> {
    expand(ltk, transcript, label)
}

fn session_salt(rand: &[u8; RAND_SIZE], sqn: &[u8; EAP_SQN_SIZE]) -> [u8; RAND_SIZE + EAP_SQN_SIZE] {
    let mut salt = [0u8; RAND_SIZE + EAP_SQN_SIZE];
    salt[..RAND_SIZE].copy_from_slice(rand);
    salt[RAND_SIZE..].copy_from_slice(sqn);
    salt
}

/// Challenge response the pod must return for `(rand, sqn)`.
pub fn derive_res(
    ltk: &[u8; LTK_SIZE],
    rand: &[u8; RAND_SIZE],
    sqn: &[u8; EAP_SQN_SIZE],
) -> Result<[u8; RES_SIZE], CryptoError> {
    expand(ltk, &session_salt(rand, sqn), RES_INFO)
}

/// Derive the session keys once both IVs are known.
pub fn derive_session_keys(
    ltk: &[u8; LTK_SIZE],
    rand: &[u8; RAND_SIZE],
    sqn: &[u8; EAP_SQN_SIZE],
    controller_iv: &[u8; IV_SIZE],
    pod_iv: &[u8; IV_SIZE],
) -> Result<SessionKeys, CryptoError> {
    let ck = expand(ltk, &session_salt(rand, sqn), CK_INFO)?;
    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    nonce_prefix[..IV_SIZE].copy_from_slice(controller_iv);
    nonce_prefix[IV_SIZE..].copy_from_slice(pod_iv);
    Ok(SessionKeys { ck, nonce_prefix })
}

/// Encode an EAP sequence number as its 6-byte wire form.
pub fn sqn_bytes(eap_seq: u64) -> [u8; EAP_SQN_SIZE] {
    let mut out = [0u8; EAP_SQN_SIZE];
    out.copy_from_slice(&eap_seq.to_be_bytes()[2..]);
    out
}

/// Decode a 6-byte EAP sequence number.
pub fn sqn_from_bytes(bytes: &[u8; EAP_SQN_SIZE]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = PairingKeypair::generate();
        let kp2 = PairingKeypair::generate();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_both_sides_derive_same_ltk() {
        let controller = PairingKeypair::generate();
        let pod = PairingKeypair::generate();
        let cn = [1u8; PAIRING_NONCE_SIZE];
        let pn = [2u8; PAIRING_NONCE_SIZE];

        let a = derive_ltk(&controller.diffie_hellman(pod.public_key()), &cn, &pn).unwrap();
        let b = derive_ltk(&pod.diffie_hellman(controller.public_key()), &cn, &pn).unwrap();
        assert_eq!(a, b);

        let c = derive_ltk(&pod.diffie_hellman(controller.public_key()), &pn, &cn).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_session_keys_depend_on_sqn() {
        let ltk = [9u8; LTK_SIZE];
        let rand = [3u8; RAND_SIZE];
        let a = derive_session_keys(&ltk, &rand, &sqn_bytes(1), &[1; 4], &[2; 4]).unwrap();
        let b = derive_session_keys(&ltk, &rand, &sqn_bytes(2), &[1; 4], &[2; 4]).unwrap();
        assert_ne!(a.ck, b.ck);
        assert_eq!(a.nonce_prefix, [1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_res_differs_from_ck() {
        let ltk = [9u8; LTK_SIZE];
        let rand = [3u8; RAND_SIZE];
        let sqn = sqn_bytes(5);
        let res = derive_res(&ltk, &rand, &sqn).unwrap();
        let keys = derive_session_keys(&ltk, &rand, &sqn, &[0; 4], &[0; 4]).unwrap();
        assert_ne!(&res[..], &keys.ck[..RES_SIZE]);
    }

    #[test]
    fn test_sqn_encoding() {
        assert_eq!(sqn_bytes(0x0102), [0, 0, 0, 0, 1, 2]);
        assert_eq!(sqn_from_bytes(&sqn_bytes(0x0000_1234_5678_9abc)), 0x1234_5678_9abc);
    }
}
