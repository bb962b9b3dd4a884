//! HS256 bearer token verification.
//!
//! `verify` never fails with an error: every bad credential path collapses
//! to "no identity". The failure cause (missing / expired / malformed or
//! bad signature) is distinguished for logging only, never for behavior.

use crate::domain::identity::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: String,
    #[serde(default)]
    role: String,
    iat: i64,
    exp: i64,
}

/// Why verification produced no identity. Logging/observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyFailure {
    Missing,
    Expired,
    Malformed,
    BadSignature,
}

/// Verifies bearer credentials against the configured shared secret.
pub struct TokenAuthenticator {
    secret: Vec<u8>,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a credential. `None` in means anonymous out; any invalid,
    /// expired or tampered credential also comes out as `None`.
    pub fn verify(&self, credential: Option<&str>) -> Option<Identity> {
        match self.verify_inner(credential) {
            Ok(identity) => {
                debug!(user_id = %identity.id, "Token verified");
                Some(identity)
            }
            Err(VerifyFailure::Missing) => None,
            Err(VerifyFailure::Expired) => {
                debug!("Token expired");
                None
            }
            Err(cause) => {
                debug!(cause = ?cause, "Invalid token provided");
                None
            }
        }
    }

    fn verify_inner(&self, credential: Option<&str>) -> Result<Identity, VerifyFailure> {
        // Missing credential short-circuits before any signature work.
        let token = credential.ok_or(VerifyFailure::Missing)?;

        let mut segments = token.split('.');
        let (header_b64, claims_b64, sig_b64) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(VerifyFailure::Malformed),
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| VerifyFailure::Malformed)?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| VerifyFailure::Malformed)?;
        if header.alg != "HS256" {
            return Err(VerifyFailure::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| VerifyFailure::Malformed)?;
        let expected = self.signature_for(header_b64, claims_b64);
        // Constant-time comparison; a length mismatch is also unequal.
        if !bool::from(expected.as_slice().ct_eq(signature.as_slice())) {
            return Err(VerifyFailure::BadSignature);
        }

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| VerifyFailure::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| VerifyFailure::Malformed)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(VerifyFailure::Expired);
        }

        Ok(Identity {
            id: claims.id,
            role: claims.role,
            issued_at: claims.iat,
            expires_at: claims.exp,
            raw_credential: token.to_string(),
        })
    }

    fn signature_for(&self, header_b64: &str, claims_b64: &str) -> Vec<u8> {
        // new_from_slice accepts any key length for HMAC.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| HmacSha256::new_from_slice(b"").unwrap());
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Issue a token. The gateway only verifies credentials in production
    /// (the account service issues them); this exists for local tooling
    /// and tests.
    pub fn sign(&self, id: &str, role: &str, ttl: Duration) -> String {
        let now = Utc::now().timestamp();
        let header = Header {
            alg: "HS256".into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            id: id.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };

        // Serializing two plain structs cannot fail.
        let header_b64 =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default());
        let claims_b64 =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = self.signature_for(&header_b64, &claims_b64);
        format!("{header_b64}.{claims_b64}.{}", URL_SAFE_NO_PAD.encode(signature))
    }
}
