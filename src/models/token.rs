use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::session::Coordinate;

/// A child a token authorizes check-ins for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub full_name: String,
    pub class_name: String,
}

/// A short-lived QR credential issued by a parent.
///
/// Never mutated after issuance. The `signature` is a hex BLAKE3 keyed hash
/// over the token's canonical JSON with the signature left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrToken {
    pub token_id: Uuid,
    pub parent_id: String,
    pub parent_name: String,
    pub family_code: String,
    pub children: Vec<Child>,
    pub home_location: Coordinate,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl QrToken {
    pub fn child(&self, child_id: &str) -> Option<&Child> {
        self.children.iter().find(|c| c.id == child_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
