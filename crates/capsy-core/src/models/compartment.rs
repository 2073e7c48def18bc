//! Pillbox compartment models.

use serde::{Deserialize, Serialize};

/// Number of physical compartments in the pillbox. Fixed by the hardware.
pub const COMPARTMENT_COUNT: usize = 10;

/// Dosage units accepted after the leading quantity (English and Spanish).
const DOSAGE_UNITS: &[&str] = &[
    "pill",
    "pills",
    "pastilla",
    "pastillas",
    "tablet",
    "tablets",
    "tableta",
    "tabletas",
    "capsule",
    "capsules",
    "capsula",
    "capsulas",
    "comprimido",
    "comprimidos",
    "mg",
    "g",
    "gramo",
    "gramos",
    "ml",
    "mcg",
    "gota",
    "gotas",
    "drop",
    "drops",
];

/// A dosing time slot: an optional daily start time plus a repeat interval.
///
/// Slots loaded from a remote configuration may carry an interval without an
/// explicit start time; slots added through the UI always have both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    /// Daily start time in "HH:MM" (24h), if one was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Repeat interval in whole hours. Always positive.
    pub interval_hours: u32,
}

/// A single pillbox compartment.
///
/// Identity is the fixed hardware slot number (1 through
/// [`COMPARTMENT_COUNT`]); it is never reassigned. All other fields mirror
/// what the patient typed on the configuration screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compartment {
    pub id: u8,
    #[serde(default)]
    pub medication: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub stock: String,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
}

/// An editable compartment field together with its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompartmentField {
    Medication(String),
    Dosage(String),
    Stock(String),
}

impl Compartment {
    /// An empty compartment for the given hardware slot.
    pub fn empty(id: u8) -> Self {
        Self {
            id,
            medication: String::new(),
            dosage: String::new(),
            stock: String::new(),
            time_slots: Vec::new(),
        }
    }

    /// Apply a field edit. Returns `true` if the value was accepted.
    ///
    /// Dosage and stock carry an input policy: values that fail it are
    /// silently rejected and the field keeps its previous content.
    pub fn apply(&mut self, field: CompartmentField) -> bool {
        match field {
            CompartmentField::Medication(value) => {
                self.medication = value;
                true
            }
            CompartmentField::Dosage(value) => {
                if is_valid_dosage(&value) {
                    self.dosage = value;
                    true
                } else {
                    false
                }
            }
            CompartmentField::Stock(value) => {
                if value.chars().all(|c| c.is_ascii_digit()) {
                    self.stock = value;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Quantity to dispense, extracted from the leading digits of the dosage
    /// text ("2 pills" → 2). Defaults to 1 when no digits are present.
    pub fn quantity(&self) -> u32 {
        dosage_quantity(&self.dosage)
    }

    /// The first configured time slot, which drives the device command.
    pub fn first_slot(&self) -> Option<&TimeSlot> {
        self.time_slots.first()
    }

    /// Whether the compartment is in its default empty shape.
    pub fn is_empty(&self) -> bool {
        self.medication.is_empty()
            && self.dosage.is_empty()
            && self.stock.is_empty()
            && self.time_slots.is_empty()
    }
}

/// The full default rack: empty compartments with ids 1..=10.
pub fn default_rack() -> Vec<Compartment> {
    (1..=COMPARTMENT_COUNT as u8).map(Compartment::empty).collect()
}

/// Leading-digit quantity extraction, defaulting to 1.
pub fn dosage_quantity(dosage: &str) -> u32 {
    let digits: String = dosage
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(1)
}

/// Dosage policy: empty (clears the field), pure digits, or
/// `<digits><space><unit>` with a known unit.
pub fn is_valid_dosage(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    match text.split_once(' ') {
        Some((amount, unit)) => {
            !amount.is_empty()
                && amount.chars().all(|c| c.is_ascii_digit())
                && DOSAGE_UNITS.contains(&unit.to_lowercase().as_str())
        }
        None => false,
    }
}

/// Validate a daily start time: "HH:MM" with 00-23 hours and 00-59 minutes.
pub fn is_valid_start_time(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return false;
    }
    let digits_ok = text
        .char_indices()
        .all(|(i, c)| i == 2 || c.is_ascii_digit());
    if !digits_ok {
        return false;
    }
    let hours: u32 = text[..2].parse().unwrap_or(99);
    let minutes: u32 = text[3..].parse().unwrap_or(99);
    hours <= 23 && minutes <= 59
}
