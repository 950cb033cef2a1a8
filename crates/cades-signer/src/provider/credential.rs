//! Private keys held by software-store certificates.
//!
//! Keys are derived from the record's seed once, when the store is loaded.

use anyhow::{Context, Result, ensure};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey as EcdsaKey, signature::Signer as _};
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::SignatureEncoding;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

use super::software::KeyAlgorithm;

const RSA_MODULUS_BITS: usize = 2048;

pub(super) enum CertificateKey {
    Rsa {
        signing_key: RsaSigningKey<Sha256>,
        /// SubjectPublicKeyInfo DER.
        public_key: Vec<u8>,
    },
    Secp256k1(EcdsaKey),
}

impl CertificateKey {
    /// Derive the key for `algorithm` from a non-empty seed.
    ///
    /// The seed's SHA-256 digest is either the secp256k1 scalar or the
    /// ChaCha20 seed driving RSA generation.
    pub(super) fn derive(algorithm: KeyAlgorithm, seed: &str) -> Result<Self> {
        ensure!(!seed.trim().is_empty(), "key seed must not be empty");
        let digest = Sha256::digest(seed.as_bytes());

        match algorithm {
            KeyAlgorithm::Secp256k1 => {
                let key = EcdsaKey::from_bytes(&digest)
                    .map_err(|e| anyhow::anyhow!("seed is not a valid secp256k1 scalar: {e}"))?;
                Ok(Self::Secp256k1(key))
            }
            KeyAlgorithm::Rsa => {
                let mut rng = ChaCha20Rng::from_seed(digest.into());
                let private_key = RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS)
                    .context("generating RSA key")?;
                let public_key = private_key
                    .to_public_key()
                    .to_public_key_der()
                    .context("encoding RSA public key")?
                    .into_vec();
                Ok(Self::Rsa {
                    signing_key: RsaSigningKey::new(private_key),
                    public_key,
                })
            }
        }
    }

    /// Name recorded in the signed envelope.
    pub(super) fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa { .. } => "rsa-pkcs1v15-sha256",
            Self::Secp256k1(_) => "secp256k1",
        }
    }

    /// SPKI DER for RSA, compressed SEC1 point for secp256k1.
    pub(super) fn public_key(&self) -> Vec<u8> {
        match self {
            Self::Rsa { public_key, .. } => public_key.clone(),
            Self::Secp256k1(key) => key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
        }
    }

    pub(super) fn sign_content(&self, content: &str) -> Result<Vec<u8>> {
        match self {
            Self::Rsa { signing_key, .. } => {
                let signature = signing_key
                    .try_sign(content.as_bytes())
                    .context("RSA signing")?;
                Ok(signature.to_vec())
            }
            Self::Secp256k1(key) => {
                let signature: EcdsaSignature = key
                    .try_sign(content.as_bytes())
                    .context("secp256k1 signing")?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }
}
