// Proxy-Cookie Codec (§4.D), grounded in `token/vouch/vouch_helper.py`'s
// `VouchHelper`/`CustomClaimsType` and the gzip-then-base64url wrapping the
// original delegates to `fss_utils.jwt_manager`.

use std::io::{Read, Write};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VouchCookieError {
    #[error("base64 decode failed: {0}")]
    Base64(String),
    #[error("decompression failed: {0}")]
    Gzip(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// `CustomClaimsType` of `vouch_helper.py`. `interpret()` returns the claim
/// names each variant projects out of the upstream IdP claim set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomClaimsType {
    Openid,
    Email,
    Profile,
    CilogonUserInfo,
}

impl CustomClaimsType {
    pub fn interpret(self) -> &'static [&'static str] {
        match self {
            CustomClaimsType::Openid => &["sub", "iss", "aud", "token_id"],
            CustomClaimsType::Email => &["email"],
            CustomClaimsType::Profile => &["given_name", "family_name", "name"],
            CustomClaimsType::CilogonUserInfo => &[
                "idp",
                "idp_name",
                "eppn",
                "eptid",
                "affiliation",
                "ou",
                "oidc",
                "cert_subject_dn",
            ],
        }
    }
}

/// `PTokens` of `vouch_helper.py`: the upstream tokens carried inside the
/// cookie alongside the projected claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PTokens {
    #[serde(rename = "PIdToken")]
    pub id_token: String,
    #[serde(rename = "PRefreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    // Appears on only one code path in the original; accept on decode,
    // emit only when non-empty (§9 design note).
    #[serde(rename = "PAccessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VouchCookiePayload {
    pub username: String,
    pub sites: Vec<String>,
    #[serde(rename = "CustomClaims")]
    pub custom_claims: Map<String, Value>,
    #[serde(flatten)]
    pub tokens: PTokens,
    pub exp: i64,
}

pub struct VouchCodec {
    secret: Vec<u8>,
}

impl VouchCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// §4.D.1: project the configured subset of IdP claims into CustomClaims.
    pub fn project_claims(
        &self,
        selection: &[CustomClaimsType],
        upstream_claims: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut projected = Map::new();
        for claims_type in selection {
            for key in claims_type.interpret() {
                if let Some(value) = upstream_claims.get(*key) {
                    projected.insert((*key).to_string(), value.clone());
                }
            }
        }
        projected
    }

    /// `Encode` of §4.D: sign HS256, gzip, then url-safe base64.
    pub fn encode(&self, payload: &VouchCookiePayload) -> Result<String, VouchCookieError> {
        let header = Header::new(Algorithm::HS256);
        let jwt = jsonwebtoken::encode(&header, payload, &EncodingKey::from_secret(&self.secret))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(jwt.as_bytes())
            .map_err(|e| VouchCookieError::Gzip(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| VouchCookieError::Gzip(e.to_string()))?;

        Ok(URL_SAFE_NO_PAD.encode(compressed))
    }

    /// `Decode` of §4.D. `verify = false` skips signature verification
    /// (used only where the caller has already authenticated the bearer
    /// through another channel).
    pub fn decode(
        &self,
        cookie: &str,
        verify: bool,
    ) -> Result<VouchCookiePayload, VouchCookieError> {
        let compressed = URL_SAFE_NO_PAD
            .decode(cookie)
            .map_err(|e| VouchCookieError::Base64(e.to_string()))?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut jwt = String::new();
        decoder
            .read_to_string(&mut jwt)
            .map_err(|e| VouchCookieError::Gzip(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = verify;
        if !verify {
            validation.insecure_disable_signature_validation();
        }

        let decoded = jsonwebtoken::decode::<VouchCookiePayload>(
            &jwt,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )?;
        Ok(decoded.claims)
    }
}
