//! Wire schema for the remote configuration channel.
//!
//! Outbound messages are tagged by `type` and carry a `requestId` so that
//! inbound results can be correlated instead of dispatched globally by type.

use serde::{Deserialize, Serialize};

use crate::device::DeviceCommand;
use crate::models::{Compartment, PillboxConfig};

/// Messages sent from the app to the backend/device bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Fetch the stored configuration for a patient.
    #[serde(rename = "get-pillbox-config", rename_all = "camelCase")]
    GetConfig {
        request_id: String,
        user_id: String,
        patient_id: String,
    },
    /// Store a configuration wholesale (always the full compartment array).
    #[serde(rename = "save-pillbox-config", rename_all = "camelCase")]
    SaveConfig {
        request_id: String,
        user_id: String,
        patient_id: String,
        pillbox_id: String,
        compartments: Vec<Compartment>,
    },
    /// Remove the stored configuration for a patient.
    #[serde(rename = "delete-pillbox-config", rename_all = "camelCase")]
    DeleteConfig {
        request_id: String,
        user_id: String,
        patient_id: String,
    },
    /// Link a physical device before its first configuration.
    #[serde(rename = "add-capsy", rename_all = "camelCase")]
    LinkDevice {
        request_id: String,
        capsy_id: String,
    },
    /// Push per-compartment dispensing commands to a linked device.
    #[serde(rename = "capsy-individual", rename_all = "camelCase")]
    PushCommands {
        request_id: String,
        capsy_id: String,
        pastilla: Vec<DeviceCommand>,
    },
}

impl Outbound {
    /// The correlation id carried by every outbound message.
    pub fn request_id(&self) -> &str {
        match self {
            Outbound::GetConfig { request_id, .. }
            | Outbound::SaveConfig { request_id, .. }
            | Outbound::DeleteConfig { request_id, .. }
            | Outbound::LinkDevice { request_id, .. }
            | Outbound::PushCommands { request_id, .. } => request_id,
        }
    }
}

/// Events received from the backend/device bridge.
///
/// `request_id` is optional on the wire; events without one cannot be
/// correlated and are dropped by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "pillbox-config-saved", rename_all = "camelCase")]
    ConfigSaved {
        #[serde(default)]
        request_id: Option<String>,
        success: bool,
        #[serde(default)]
        config: Option<PillboxConfig>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "pillbox-config-loaded", rename_all = "camelCase")]
    ConfigLoaded {
        #[serde(default)]
        request_id: Option<String>,
        success: bool,
        #[serde(default)]
        config: Option<PillboxConfig>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "pillbox-config-deleted", rename_all = "camelCase")]
    ConfigDeleted {
        #[serde(default)]
        request_id: Option<String>,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "capsy-linked", rename_all = "camelCase")]
    DeviceLinked {
        #[serde(default)]
        request_id: Option<String>,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

impl Inbound {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Inbound::ConfigSaved { request_id, .. }
            | Inbound::ConfigLoaded { request_id, .. }
            | Inbound::ConfigDeleted { request_id, .. }
            | Inbound::DeviceLinked { request_id, .. } => request_id.as_deref(),
        }
    }
}
