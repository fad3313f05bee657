use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::CheckInPolicy;
use crate::error::{AppError, Result};
use crate::models::session::Coordinate;
use crate::models::token::{Child, QrToken};

/// The size of the signing key in bytes.
pub const KEY_SIZE: usize = 32;

fn load_key(key: &[u8]) -> Result<Arc<Zeroizing<[u8; KEY_SIZE]>>> {
    let key: [u8; KEY_SIZE] = key
        .try_into()
        .map_err(|_| AppError::Internal(format!("Signing key must be {} bytes", KEY_SIZE)))?;
    Ok(Arc::new(Zeroizing::new(key)))
}

/// Canonical bytes a signature covers: the token's JSON without its signature.
fn signing_payload(token: &QrToken) -> Result<Vec<u8>> {
    let unsigned = QrToken {
        signature: None,
        ..token.clone()
    };
    sonic_rs::to_vec(&unsigned)
        .map_err(|e| AppError::Internal(format!("Token serialization failed: {}", e)))
}

fn sign(key: &[u8; KEY_SIZE], token: &QrToken) -> Result<String> {
    let payload = signing_payload(token)?;
    Ok(blake3::keyed_hash(key, &payload).to_hex().to_string())
}

/// Issues QR tokens on behalf of a parent.
#[derive(Clone)]
pub struct TokenIssuer {
    key: Option<Arc<Zeroizing<[u8; KEY_SIZE]>>>,
    validity: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(key: Option<&[u8]>, validity: chrono::Duration) -> Result<Self> {
        Ok(Self {
            key: key.map(load_key).transpose()?,
            validity,
        })
    }

    /// Builds a token valid from `now` for the configured window, signed when a key is set.
    pub fn issue(
        &self,
        parent_id: &str,
        parent_name: &str,
        family_code: &str,
        children: Vec<Child>,
        home_location: Coordinate,
        now: DateTime<Utc>,
    ) -> Result<QrToken> {
        if children.is_empty() {
            return Err(AppError::field("children", "at least one child is required"));
        }
        if !home_location.is_valid() {
            return Err(AppError::field("home_location", "coordinates are out of range"));
        }

        let mut token = QrToken {
            token_id: Uuid::new_v4(),
            parent_id: parent_id.to_string(),
            parent_name: parent_name.to_string(),
            family_code: family_code.to_string(),
            children,
            home_location,
            issued_at: now,
            expires_at: now + self.validity,
            signature: None,
        };

        if let Some(key) = &self.key {
            token.signature = Some(sign(key, &token)?);
        }

        tracing::debug!("🎟️ Issued QR token {} for parent {}", token.token_id, parent_id);
        Ok(token)
    }

    /// Encodes a token as the URL-safe base64 payload printed into the QR code.
    pub fn encode(token: &QrToken) -> Result<String> {
        let json = sonic_rs::to_vec(token)
            .map_err(|e| AppError::Internal(format!("Token serialization failed: {}", e)))?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(json))
    }
}

/// Parses and authenticates scanned QR payloads.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Option<Arc<Zeroizing<[u8; KEY_SIZE]>>>,
    policy: CheckInPolicy,
}

impl TokenVerifier {
    pub fn new(key: Option<&[u8]>, policy: CheckInPolicy) -> Result<Self> {
        Ok(Self {
            key: key.map(load_key).transpose()?,
            policy,
        })
    }

    /// Parses a scanned payload into a token.
    ///
    /// Accepts raw JSON or URL-safe base64 of the JSON. Structural problems and
    /// bad signatures are `InvalidToken`; a token past its expiry, or older than
    /// the validity window, is `ExpiredToken`.
    pub fn parse(&self, raw: &str, now: DateTime<Utc>) -> Result<QrToken> {
        let token = decode_payload(raw)?;

        if let Some(key) = &self.key {
            let provided = token
                .signature
                .as_deref()
                .ok_or_else(|| AppError::InvalidToken("token is not signed".to_string()))?;
            let expected = sign(key, &token)?;
            if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
                tracing::warn!(
                    target: "security",
                    "❌ QR token {} failed signature check",
                    token.token_id
                );
                return Err(AppError::InvalidToken("signature mismatch".to_string()));
            }
        }

        if token.children.is_empty() {
            return Err(AppError::InvalidToken("no eligible children".to_string()));
        }
        if !token.home_location.is_valid() {
            return Err(AppError::InvalidToken("invalid home location".to_string()));
        }
        if token.expires_at <= token.issued_at {
            return Err(AppError::InvalidToken(
                "expiry must be after issuance".to_string(),
            ));
        }
        if token.expires_at - token.issued_at > self.policy.token_validity {
            return Err(AppError::InvalidToken(
                "lifetime exceeds the validity window".to_string(),
            ));
        }

        if token.is_expired_at(now) || now - token.issued_at > self.policy.token_validity {
            tracing::debug!("QR token {} expired at {}", token.token_id, token.expires_at);
            return Err(AppError::ExpiredToken);
        }

        Ok(token)
    }
}

fn decode_payload(raw: &str) -> Result<QrToken> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidToken("empty payload".to_string()));
    }

    let json = if raw.starts_with('{') {
        raw.as_bytes().to_vec()
    } else {
        general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('='))
            .map_err(|_| AppError::InvalidToken("payload is neither JSON nor base64".to_string()))?
    };

    sonic_rs::from_slice(&json)
        .map_err(|e| AppError::InvalidToken(format!("malformed payload: {}", e)))
}
