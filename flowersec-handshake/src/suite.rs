use p256::ecdh::EphemeralSecret as P256EphemeralSecret;
use p256::PublicKey as P256PublicKey;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret as X25519EphemeralSecret, PublicKey as X25519PublicKey};

use crate::HandshakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    X25519 = 1,
    P256 = 2,
}

impl Suite {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::X25519),
            2 => Some(Self::P256),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn generate(self) -> EphemeralKeypair {
        match self {
            Self::X25519 => {
                let secret = X25519EphemeralSecret::random_from_rng(OsRng);
                let public = X25519PublicKey::from(&secret);
                EphemeralKeypair::X25519(secret, public)
            }
            Self::P256 => {
                let secret = P256EphemeralSecret::random(&mut OsRng);
                let public = secret.public_key();
                EphemeralKeypair::P256(secret, public)
            }
        }
    }
}

pub enum EphemeralKeypair {
    X25519(X25519EphemeralSecret, X25519PublicKey),
    P256(P256EphemeralSecret, P256PublicKey),
}

impl EphemeralKeypair {
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::X25519(_, public) => public.as_bytes().to_vec(),
            Self::P256(_, public) => public.to_sec1_bytes().to_vec(),
        }
    }

    /// Validates `peer_public` is a well-formed, on-curve point for this
    /// suite and performs ECDH, returning the raw shared secret.
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<[u8; 32], HandshakeError> {
        match self {
            Self::X25519(secret, _) => {
                let bytes: [u8; 32] = peer_public
                    .try_into()
                    .map_err(|_| HandshakeError::HandshakeFailed("bad x25519 public key length"))?;
                let peer = X25519PublicKey::from(bytes);
                Ok(secret.diffie_hellman(&peer).to_bytes())
            }
            Self::P256(secret, _) => {
                let peer = P256PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| HandshakeError::HandshakeFailed("p256 public key not on curve"))?;
                let shared = secret.diffie_hellman(&peer);
                let mut out = [0u8; 32];
                out.copy_from_slice(shared.raw_secret_bytes().as_slice());
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agrees_on_shared_secret() {
        let a = Suite::X25519.generate();
        let b = Suite::X25519.generate();
        let a_pub = a.public_bytes();
        let b_pub = b.public_bytes();
        let secret_a = a.diffie_hellman(&b_pub).unwrap();
        let secret_b = b.diffie_hellman(&a_pub).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn p256_agrees_on_shared_secret() {
        let a = Suite::P256.generate();
        let b = Suite::P256.generate();
        let a_pub = a.public_bytes();
        let b_pub = b.public_bytes();
        let secret_a = a.diffie_hellman(&b_pub).unwrap();
        let secret_b = b.diffie_hellman(&a_pub).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn rejects_off_curve_p256_point() {
        let a = Suite::P256.generate();
        let garbage = vec![4u8; 65];
        assert!(a.diffie_hellman(&garbage).is_err());
    }
}
