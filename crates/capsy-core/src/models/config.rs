//! Pillbox configuration aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compartment::{default_rack, Compartment};

/// A patient's pillbox configuration.
///
/// Keyed by `(user_id, patient_id)`. Saves always carry the full
/// 10-compartment array; there is no partial-patch form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PillboxConfig {
    pub user_id: String,
    pub patient_id: String,
    /// Physical device identifier the configuration is bound to.
    pub pillbox_id: String,
    pub compartments: Vec<Compartment>,
    /// Server-assigned last-updated timestamp (RFC 3339).
    #[serde(default)]
    pub updated_at: String,
}

impl PillboxConfig {
    /// A fresh configuration with an empty default rack.
    pub fn new(user_id: String, patient_id: String, pillbox_id: String) -> Self {
        Self {
            user_id,
            patient_id,
            pillbox_id,
            compartments: default_rack(),
            updated_at: String::new(),
        }
    }

    /// Parse the server timestamp, if present and well formed.
    pub fn parsed_updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
