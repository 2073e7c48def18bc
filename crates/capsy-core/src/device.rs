//! Translation of compartments into pillbox device commands.
//!
//! The device understands three command shapes, derived from a compartment's
//! first time slot:
//! - `scheduled`: daily start time plus repeat interval
//! - `interval`: repeat interval only, starting immediately
//! - `timeout`: degenerate unscheduled case, fires nothing

use serde::{Deserialize, Serialize};

use crate::models::Compartment;

/// Milliseconds per hour; device timeouts are expressed in milliseconds.
pub const HOUR_MS: i64 = 3_600_000;

/// Device command discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Scheduled,
    Interval,
    Timeout,
}

/// One per-compartment dispensing command, as pushed to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    /// Compartment id (1-10).
    pub id: u8,
    /// Units to dispense per activation.
    pub cantidad: u32,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Repeat period in milliseconds; 0 for the unscheduled case.
    pub timeout: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<i64>,
}

/// Derive the device command for one compartment.
pub fn command_for(compartment: &Compartment) -> DeviceCommand {
    let base = DeviceCommand {
        id: compartment.id,
        cantidad: compartment.quantity(),
        kind: CommandKind::Timeout,
        timeout: 0,
        start_time: None,
        interval_ms: None,
    };

    match compartment.first_slot() {
        Some(slot) => {
            let interval_ms = i64::from(slot.interval_hours) * HOUR_MS;
            match &slot.start_time {
                Some(start) => DeviceCommand {
                    kind: CommandKind::Scheduled,
                    timeout: interval_ms,
                    start_time: Some(start.clone()),
                    interval_ms: Some(interval_ms),
                    ..base
                },
                None if slot.interval_hours > 0 => DeviceCommand {
                    kind: CommandKind::Interval,
                    timeout: interval_ms,
                    ..base
                },
                None => base,
            }
        }
        None => base,
    }
}

/// Derive commands for every compartment holding a medication.
pub fn commands_for_rack(compartments: &[Compartment]) -> Vec<DeviceCommand> {
    compartments
        .iter()
        .filter(|c| !c.medication.trim().is_empty())
        .map(command_for)
        .collect()
}
