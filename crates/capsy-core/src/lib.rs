//! Capsy Core Library
//!
//! Core of the smart-pillbox flow in the medication-reminder app: the
//! compartment model, medication validation/autocomplete, the remote
//! configuration channel, and device command translation.
//!
//! # Architecture
//!
//! ```text
//! Patient selected ──▶ load request ──▶ Remote Configuration Channel
//!         │                                      │
//!         ▼                                      ▼
//!   local cache probe                  async result events
//!    hit │    │ miss                   (correlated by requestId)
//!        ▼    ▼
//!   populate  pre-fill from prescriptions
//!        │
//!  user edits compartments ──▶ 1s debounce ──▶ wholesale save
//!        │
//!  explicit send ──▶ link handshake (new device) ──▶ per-compartment
//!                                                    device commands
//! ```
//!
//! # Modules
//!
//! - [`models`]: Domain types (Compartment, PillboxConfig, Patient)
//! - [`db`]: SQLite on-device store (directory, roster, config cache)
//! - [`reference`]: Medication validation and autocomplete
//! - [`channel`]: Wire schema and request correlation
//! - [`device`]: Compartment → device command translation
//! - [`session`]: Configuration session (load flow, auto-save, push)

pub mod channel;
pub mod db;
pub mod device;
pub mod models;
pub mod reference;
pub mod session;

// Re-export commonly used types
pub use channel::{ChannelError, Correlator, Inbound, Outbound, Pending, Transport};
pub use db::Database;
pub use device::{command_for, commands_for_rack, CommandKind, DeviceCommand};
pub use models::{
    default_rack, dosage_quantity, Compartment, CompartmentField, Patient, PillboxConfig,
    TimeSlot, COMPARTMENT_COUNT,
};
pub use reference::{MedicationEntry, MedicationSource, ReferenceIndex, Suggestions};
pub use session::{
    Capabilities, LoadState, Notice, PrescriptionSource, Session, SessionError,
    SessionSnapshot, SlotPolicy, ValidationError,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CapsyError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for CapsyError {
    fn from(e: db::DbError) -> Self {
        CapsyError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for CapsyError {
    fn from(e: serde_json::Error) -> Self {
        CapsyError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for CapsyError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CapsyError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create the on-device store at the given path.
#[uniffi::export]
pub fn open_store(path: String) -> Result<Arc<CapsyStore>, CapsyError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(CapsyStore {
        db: Arc::new(Mutex::new(db)),
    }))
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_store_in_memory() -> Result<Arc<CapsyStore>, CapsyError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(CapsyStore {
        db: Arc::new(Mutex::new(db)),
    }))
}

/// Quantity derived from dosage text ("2 pills" → 2, default 1).
#[uniffi::export]
pub fn dosage_quantity_of(dosage: String) -> u32 {
    dosage_quantity(&dosage)
}

/// Translate a configuration's populated compartments into device commands.
#[uniffi::export]
pub fn device_commands(config: FfiPillboxConfig) -> Vec<FfiDeviceCommand> {
    let config: PillboxConfig = config.into();
    commands_for_rack(&config.compartments)
        .into_iter()
        .map(Into::into)
        .collect()
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe store wrapper for FFI.
#[derive(uniffi::Object)]
pub struct CapsyStore {
    db: Arc<Mutex<Database>>,
}

impl CapsyStore {
    /// Shared handle to the underlying database, for wiring the session's
    /// store-backed capabilities on the Rust side.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }
}

#[uniffi::export]
impl CapsyStore {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Insert or update a patient.
    pub fn upsert_patient(&self, patient: FfiPatient) -> Result<(), CapsyError> {
        let db = self.db.lock()?;
        db.upsert_patient(&patient.into())?;
        Ok(())
    }

    /// Get a patient by id.
    pub fn get_patient(&self, id: String) -> Result<Option<FfiPatient>, CapsyError> {
        let db = self.db.lock()?;
        let patient = db.get_patient(&id)?;
        Ok(patient.map(|p| p.into()))
    }

    /// List all patients.
    pub fn list_patients(&self) -> Result<Vec<FfiPatient>, CapsyError> {
        let db = self.db.lock()?;
        let patients = db.list_patients()?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    /// Delete a patient and their prescribed medications.
    pub fn delete_patient(&self, id: String) -> Result<bool, CapsyError> {
        let db = self.db.lock()?;
        Ok(db.delete_patient(&id)?)
    }

    /// Replace a patient's prescribed-medication list.
    pub fn set_patient_medications(
        &self,
        patient_id: String,
        names: Vec<String>,
    ) -> Result<(), CapsyError> {
        let mut db = self.db.lock()?;
        db.set_patient_medications(&patient_id, &names)?;
        Ok(())
    }

    /// A patient's prescribed medications.
    pub fn patient_medications(&self, patient_id: String) -> Result<Vec<String>, CapsyError> {
        let db = self.db.lock()?;
        Ok(db.patient_medications(&patient_id)?)
    }

    // =========================================================================
    // Medication Directory Operations
    // =========================================================================

    /// Replace the medication directory with a fresh snapshot.
    pub fn replace_directory(
        &self,
        entries: Vec<FfiMedicationEntry>,
    ) -> Result<(), CapsyError> {
        let entries: Vec<MedicationEntry> = entries.into_iter().map(Into::into).collect();
        let mut db = self.db.lock()?;
        db.replace_directory(&entries)?;
        Ok(())
    }

    /// Substring search over either language field.
    pub fn search_directory(
        &self,
        query: String,
        limit: u32,
    ) -> Result<Vec<FfiMedicationEntry>, CapsyError> {
        let db = self.db.lock()?;
        let entries = db.search_directory(&query, limit as usize)?;
        Ok(entries.into_iter().map(|e| e.into()).collect())
    }

    /// Exact case-insensitive membership test (fails open on an empty
    /// directory).
    pub fn is_valid_medication(&self, name: String) -> Result<bool, CapsyError> {
        let db = self.db.lock()?;
        Ok(db.is_listed_medication(&name)?)
    }

    // =========================================================================
    // Configuration Cache Operations
    // =========================================================================

    /// Overwrite the cached configuration for a patient.
    pub fn put_cached_config(&self, config: FfiPillboxConfig) -> Result<(), CapsyError> {
        let db = self.db.lock()?;
        db.upsert_cached_config(&config.into())?;
        Ok(())
    }

    /// Get the cached configuration for a patient.
    pub fn get_cached_config(
        &self,
        user_id: String,
        patient_id: String,
    ) -> Result<Option<FfiPillboxConfig>, CapsyError> {
        let db = self.db.lock()?;
        let config = db.get_cached_config(&user_id, &patient_id)?;
        Ok(config.map(|c| c.into()))
    }

    /// List all cached configurations for a user.
    pub fn list_cached_configs(
        &self,
        user_id: String,
    ) -> Result<Vec<FfiPillboxConfig>, CapsyError> {
        let db = self.db.lock()?;
        let configs = db.list_cached_configs(&user_id)?;
        Ok(configs.into_iter().map(|c| c.into()).collect())
    }

    /// Remove the cached configuration for a patient.
    pub fn delete_cached_config(
        &self,
        user_id: String,
        patient_id: String,
    ) -> Result<bool, CapsyError> {
        let db = self.db.lock()?;
        Ok(db.delete_cached_config(&user_id, &patient_id)?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            name: patient.name,
            role: patient.role,
        }
    }
}

impl From<FfiPatient> for Patient {
    fn from(patient: FfiPatient) -> Self {
        Patient {
            id: patient.id,
            name: patient.name,
            role: patient.role,
        }
    }
}

/// FFI-safe medication directory entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicationEntry {
    pub name: String,
    pub name_es: String,
}

impl From<MedicationEntry> for FfiMedicationEntry {
    fn from(entry: MedicationEntry) -> Self {
        Self {
            name: entry.name,
            name_es: entry.name_es,
        }
    }
}

impl From<FfiMedicationEntry> for MedicationEntry {
    fn from(entry: FfiMedicationEntry) -> Self {
        MedicationEntry {
            name: entry.name,
            name_es: entry.name_es,
        }
    }
}

/// FFI-safe time slot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTimeSlot {
    pub start_time: Option<String>,
    pub interval_hours: u32,
}

impl From<TimeSlot> for FfiTimeSlot {
    fn from(slot: TimeSlot) -> Self {
        Self {
            start_time: slot.start_time,
            interval_hours: slot.interval_hours,
        }
    }
}

impl From<FfiTimeSlot> for TimeSlot {
    fn from(slot: FfiTimeSlot) -> Self {
        TimeSlot {
            start_time: slot.start_time,
            interval_hours: slot.interval_hours,
        }
    }
}

/// FFI-safe compartment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCompartment {
    pub id: u8,
    pub medication: String,
    pub dosage: String,
    pub stock: String,
    pub time_slots: Vec<FfiTimeSlot>,
}

impl From<Compartment> for FfiCompartment {
    fn from(compartment: Compartment) -> Self {
        Self {
            id: compartment.id,
            medication: compartment.medication,
            dosage: compartment.dosage,
            stock: compartment.stock,
            time_slots: compartment.time_slots.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<FfiCompartment> for Compartment {
    fn from(compartment: FfiCompartment) -> Self {
        Compartment {
            id: compartment.id,
            medication: compartment.medication,
            dosage: compartment.dosage,
            stock: compartment.stock,
            time_slots: compartment.time_slots.into_iter().map(Into::into).collect(),
        }
    }
}

/// FFI-safe pillbox configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPillboxConfig {
    pub user_id: String,
    pub patient_id: String,
    pub pillbox_id: String,
    pub compartments: Vec<FfiCompartment>,
    pub updated_at: String,
}

impl From<PillboxConfig> for FfiPillboxConfig {
    fn from(config: PillboxConfig) -> Self {
        Self {
            user_id: config.user_id,
            patient_id: config.patient_id,
            pillbox_id: config.pillbox_id,
            compartments: config.compartments.into_iter().map(Into::into).collect(),
            updated_at: config.updated_at,
        }
    }
}

impl From<FfiPillboxConfig> for PillboxConfig {
    fn from(config: FfiPillboxConfig) -> Self {
        PillboxConfig {
            user_id: config.user_id,
            patient_id: config.patient_id,
            pillbox_id: config.pillbox_id,
            compartments: config.compartments.into_iter().map(Into::into).collect(),
            updated_at: config.updated_at,
        }
    }
}

/// FFI-safe device command.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDeviceCommand {
    pub id: u8,
    pub cantidad: u32,
    pub kind: String,
    pub timeout: i64,
    pub start_time: Option<String>,
    pub interval_ms: Option<i64>,
}

impl From<DeviceCommand> for FfiDeviceCommand {
    fn from(command: DeviceCommand) -> Self {
        let kind = match command.kind {
            CommandKind::Scheduled => "scheduled",
            CommandKind::Interval => "interval",
            CommandKind::Timeout => "timeout",
        };
        Self {
            id: command.id,
            cantidad: command.cantidad,
            kind: kind.to_string(),
            timeout: command.timeout,
            start_time: command.start_time,
            interval_ms: command.interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_roundtrip_over_ffi_surface() {
        let store = open_store_in_memory().unwrap();

        store
            .upsert_patient(FfiPatient {
                id: "p1".into(),
                name: "Ana".into(),
                role: "patient".into(),
            })
            .unwrap();
        assert_eq!(store.list_patients().unwrap().len(), 1);

        store
            .replace_directory(vec![FfiMedicationEntry {
                name: "Paracetamol".into(),
                name_es: "Paracetamol".into(),
            }])
            .unwrap();
        assert!(store.is_valid_medication("paracetamol".into()).unwrap());
        assert!(!store.is_valid_medication("unknown".into()).unwrap());

        let mut config = PillboxConfig::new("u1".into(), "p1".into(), "PB-1".into());
        config.compartments[0].medication = "Paracetamol".into();
        store.put_cached_config(config.clone().into()).unwrap();

        let cached = store
            .get_cached_config("u1".into(), "p1".into())
            .unwrap()
            .unwrap();
        assert_eq!(cached.pillbox_id, "PB-1");
        assert_eq!(cached.compartments.len(), 10);

        assert!(store
            .delete_cached_config("u1".into(), "p1".into())
            .unwrap());

        // The shared database handle wires the store-backed capabilities
        store
            .set_patient_medications("p1".into(), vec!["Paracetamol".into()])
            .unwrap();
        let source = db::StorePrescriptionSource::new(store.database());
        let meds = session::PrescriptionSource::prescribed_for(&source, "p1").unwrap();
        assert_eq!(meds, vec!["Paracetamol"]);
    }

    #[test]
    fn test_device_commands_export() {
        let mut config = PillboxConfig::new("u1".into(), "p1".into(), "PB-1".into());
        config.compartments[0].medication = "Paracetamol".into();
        config.compartments[0].dosage = "2 pills".into();
        config.compartments[0].time_slots.push(TimeSlot {
            start_time: Some("08:00".into()),
            interval_hours: 8,
        });

        let commands = device_commands(config.into());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, "scheduled");
        assert_eq!(commands[0].timeout, 28_800_000);
        assert_eq!(dosage_quantity_of("2 pills".into()), 2);
    }
}
