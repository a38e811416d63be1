// Key Material (§4.A): the service's own RSA signing keypair and JWKS
// publication. Process-wide and read-only after startup, the same
// "immutable singleton loaded once" shape as the teacher's JwtService
// encoding keys, generalized from HS256 shared secrets to an RS256 keypair.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyMaterialError {
    #[error("failed to parse RSA private key: {0}")]
    InvalidPrivateKey(String),
    #[error("failed to parse RSA public key: {0}")]
    InvalidPublicKey(String),
    #[error("signing failed: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    pub kty: &'static str,
    pub alg: &'static str,
    #[serde(rename = "use")]
    pub key_use: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Loaded once at startup; an inner `Arc` so `AppState` can clone cheaply.
pub struct KeyMaterial {
    inner: Arc<KeyMaterialInner>,
}

struct KeyMaterialInner {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwks: Jwks,
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl KeyMaterial {
    /// Loads the PEM-encoded private key (optionally pass-phrase protected)
    /// and its public counterpart. Per §4.A, a parse failure or pass-phrase
    /// mismatch is a fatal startup error — callers should `.expect()` this
    /// at boot rather than retry.
    pub fn load(
        private_key_pem: &str,
        public_key_pem: &str,
        kid: &str,
        pass_phrase: Option<&str>,
    ) -> Result<Self, KeyMaterialError> {
        let encoding_key = match pass_phrase {
            Some(phrase) if !phrase.is_empty() => {
                let private_key =
                    RsaPrivateKey::from_pkcs8_encrypted_pem(private_key_pem, phrase.as_bytes())
                        .map_err(|e| KeyMaterialError::InvalidPrivateKey(e.to_string()))?;
                let der = rsa::pkcs8::EncodePrivateKey::to_pkcs8_der(&private_key)
                    .map_err(|e| KeyMaterialError::InvalidPrivateKey(e.to_string()))?;
                EncodingKey::from_rsa_der(der.as_bytes())
            }
            _ => EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                .map_err(|e| KeyMaterialError::InvalidPrivateKey(e.to_string()))?,
        };

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| KeyMaterialError::InvalidPublicKey(e.to_string()))?;

        let public_key = rsa::RsaPublicKey::from_public_key_pem(public_key_pem)
            .or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(public_key_pem))
            .map_err(|e| KeyMaterialError::InvalidPublicKey(e.to_string()))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        let jwks = Jwks {
            keys: vec![Jwk {
                kty: "RSA",
                alg: "RS256",
                key_use: "sig",
                kid: kid.to_string(),
                n,
                e,
            }],
        };

        Ok(Self {
            inner: Arc::new(KeyMaterialInner {
                kid: kid.to_string(),
                encoding_key,
                decoding_key,
                jwks,
            }),
        })
    }

    pub fn kid(&self) -> &str {
        &self.inner.kid
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.inner.decoding_key
    }

    pub fn public_jwks(&self) -> &Jwks {
        &self.inner.jwks
    }

    /// `Sign(claims) -> jwt` of §4.A.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyMaterialError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.inner.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.inner.encoding_key)?)
    }
}
