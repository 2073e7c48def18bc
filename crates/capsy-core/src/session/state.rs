//! Pure state for the pillbox configuration session.
//!
//! Extracted from the runtime shell so the load flow, cache reconciliation,
//! and save/push planning unit-test without a transport or timers. All
//! methods are synchronous; outbound messages are returned to the caller,
//! which decides how (and whether) to send them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::channel::{Correlator, Inbound, Outbound, Pending};
use crate::device::commands_for_rack;
use crate::models::{
    default_rack, is_valid_start_time, Compartment, CompartmentField, Patient, PillboxConfig,
    TimeSlot, COMPARTMENT_COUNT,
};

/// Synchronous validation errors. The operation is aborted with no state
/// mutation when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),

    #[error("interval must be at least one hour")]
    NonPositiveInterval,

    #[error("compartment {0} already has the maximum number of time slots")]
    SlotLimitReached(u8),

    #[error("unknown compartment id: {0}")]
    UnknownCompartment(u8),

    #[error("no patient selected")]
    NoPatientSelected,

    #[error("no pillbox id set")]
    MissingPillboxId,

    #[error("medication not recognized: {0}")]
    UnknownMedication(String),
}

/// Where the load flow for the selected patient currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No patient selected yet.
    Idle,
    /// Patient selected, cache probe in progress, form disabled.
    Loading,
    /// Populated from the local cache.
    Loaded,
    /// No cached configuration; form pre-filled from prescriptions.
    NoConfig,
    /// An error cleared the form; the user must retry.
    Reset,
}

/// Remote lifecycle of a cached configuration.
///
/// Confirmed deletion is represented by removing the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    /// Mirrors what the remote side last reported.
    Live,
    /// A delete was sent; awaiting the result event.
    PendingDelete,
    /// The remote delete failed; the entry is still live remotely.
    DeleteFailed,
}

/// A locally cached configuration and its remote lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedConfig {
    pub config: PillboxConfig,
    pub updated_at: Option<DateTime<Utc>>,
    pub remote: RemoteState,
}

/// Transient user-facing notifications produced by asynchronous results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SaveFailed { patient_id: String, error: String },
    DeleteConfirmed { patient_id: String },
    DeleteFailed { patient_id: String, error: String },
    ConnectionLost,
    LinkTimedOut { pillbox_id: String },
}

/// Time-slot policy. The single-slot restriction is a policy knob, not a
/// model invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub max_slots_per_compartment: usize,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            max_slots_per_compartment: 1,
        }
    }
}

/// Outbound messages planned for a device push.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PushPlan {
    /// Link message to send (and await) first, when the device is new for
    /// this patient.
    pub link: Option<Outbound>,
    pub push: Outbound,
}

pub(crate) struct SessionState {
    user_id: String,
    policy: SlotPolicy,
    selected_patient: Option<Patient>,
    pillbox_id: String,
    compartments: Vec<Compartment>,
    /// Per-compartment medication validity; empty medications count valid.
    medication_ok: Vec<bool>,
    show_pillbox_id_input: bool,
    load_state: LoadState,
    cache: HashMap<String, CachedConfig>,
    correlator: Correlator,
    notices: Vec<Notice>,
}

impl SessionState {
    pub fn new(user_id: String, policy: SlotPolicy) -> Self {
        Self {
            user_id,
            policy,
            selected_patient: None,
            pillbox_id: String::new(),
            compartments: default_rack(),
            medication_ok: vec![true; COMPARTMENT_COUNT],
            show_pillbox_id_input: false,
            load_state: LoadState::Idle,
            cache: HashMap::new(),
            correlator: Correlator::new(),
            notices: Vec::new(),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn selected_patient(&self) -> Option<&Patient> {
        self.selected_patient.as_ref()
    }

    pub fn pillbox_id(&self) -> &str {
        &self.pillbox_id
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    pub fn medication_ok(&self) -> &[bool] {
        &self.medication_ok
    }

    pub fn show_pillbox_id_input(&self) -> bool {
        self.show_pillbox_id_input
    }

    pub fn cached(&self, patient_id: &str) -> Option<&CachedConfig> {
        self.cache.get(patient_id)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    // ── Patient switch flow ────────────────────────────────────────────

    /// Begin the load flow for a newly selected patient.
    ///
    /// Transitions to `Loading`, emits the load request, and synchronously
    /// resolves against the cache: a hit populates the form immediately
    /// (`Loaded`), a miss clears it and exposes the device-id input
    /// (`NoConfig`). Returns the load message and whether the cache hit.
    pub fn begin_patient_switch(&mut self, patient: Patient) -> (Outbound, bool) {
        self.load_state = LoadState::Loading;
        let patient_id = patient.id.clone();
        self.selected_patient = Some(patient);

        let request_id = self.correlator.register(Pending::Load {
            patient_id: patient_id.clone(),
        });
        let load = Outbound::GetConfig {
            request_id,
            user_id: self.user_id.clone(),
            patient_id: patient_id.clone(),
        };

        let cached = self
            .cache
            .get(&patient_id)
            .filter(|entry| entry.remote != RemoteState::PendingDelete);
        let hit = match cached {
            Some(entry) => {
                self.pillbox_id = entry.config.pillbox_id.clone();
                self.compartments = normalize_rack(entry.config.compartments.clone());
                self.show_pillbox_id_input = false;
                self.load_state = LoadState::Loaded;
                true
            }
            None => {
                self.pillbox_id.clear();
                self.compartments = default_rack();
                self.show_pillbox_id_input = true;
                self.load_state = LoadState::NoConfig;
                false
            }
        };
        self.medication_ok = vec![true; COMPARTMENT_COUNT];

        (load, hit)
    }

    /// Pre-fill medication names into an unconfigured rack. Dosage, stock,
    /// and time slots stay blank.
    pub fn apply_prefill(&mut self, names: &[String]) {
        if self.load_state != LoadState::NoConfig {
            return;
        }
        for (compartment, name) in self.compartments.iter_mut().zip(names) {
            compartment.medication = name.clone();
        }
    }

    /// Clear the form after a flow error and surface a connectivity notice.
    pub fn reset(&mut self) {
        self.compartments = default_rack();
        self.medication_ok = vec![true; COMPARTMENT_COUNT];
        self.pillbox_id.clear();
        self.show_pillbox_id_input = false;
        self.load_state = LoadState::Reset;
        self.notices.push(Notice::ConnectionLost);
    }

    // ── Compartment edits ──────────────────────────────────────────────

    /// Replace one field of one compartment, by identity match.
    ///
    /// Returns `true` if the value passed the field's input policy and was
    /// applied. The rack is never reordered or resized.
    pub fn update_compartment(
        &mut self,
        id: u8,
        field: CompartmentField,
    ) -> Result<bool, ValidationError> {
        let compartment = self
            .compartments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ValidationError::UnknownCompartment(id))?;
        Ok(compartment.apply(field))
    }

    /// Re-run medication validation over the whole rack.
    pub fn refresh_validation(&mut self, is_valid: &dyn Fn(&str) -> bool) {
        for (index, compartment) in self.compartments.iter().enumerate() {
            let name = compartment.medication.trim();
            self.medication_ok[index] = name.is_empty() || is_valid(name);
        }
    }

    pub fn set_pillbox_id(&mut self, pillbox_id: String) {
        self.pillbox_id = pillbox_id;
    }

    /// Append a time slot, subject to format, interval, and slot policy.
    pub fn add_time_slot(
        &mut self,
        id: u8,
        start_time: &str,
        interval_hours: u32,
    ) -> Result<(), ValidationError> {
        if !is_valid_start_time(start_time) {
            return Err(ValidationError::InvalidTimeFormat(start_time.to_string()));
        }
        if interval_hours == 0 {
            return Err(ValidationError::NonPositiveInterval);
        }
        let max_slots = self.policy.max_slots_per_compartment;
        let compartment = self
            .compartments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ValidationError::UnknownCompartment(id))?;
        if compartment.time_slots.len() >= max_slots {
            return Err(ValidationError::SlotLimitReached(id));
        }
        compartment.time_slots.push(TimeSlot {
            start_time: Some(start_time.to_string()),
            interval_hours,
        });
        Ok(())
    }

    /// Remove a time slot by positional index. Out-of-range indices no-op.
    pub fn remove_time_slot(&mut self, id: u8, index: usize) -> Result<bool, ValidationError> {
        let compartment = self
            .compartments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ValidationError::UnknownCompartment(id))?;
        if index >= compartment.time_slots.len() {
            return Ok(false);
        }
        compartment.time_slots.remove(index);
        Ok(true)
    }

    // ── Saving ─────────────────────────────────────────────────────────

    /// Whether the current state qualifies for an automatic save.
    pub fn autosave_eligible(&self) -> bool {
        self.selected_patient.is_some()
            && !self.pillbox_id.is_empty()
            && self
                .compartments
                .iter()
                .any(|c| !c.medication.trim().is_empty())
    }

    /// Build the full-configuration save message, if eligible.
    pub fn build_autosave(&mut self) -> Option<Outbound> {
        if !self.autosave_eligible() {
            return None;
        }
        let patient_id = self.selected_patient.as_ref()?.id.clone();
        let request_id = self.correlator.register(Pending::Save {
            patient_id: patient_id.clone(),
        });
        Some(Outbound::SaveConfig {
            request_id,
            user_id: self.user_id.clone(),
            patient_id,
            pillbox_id: self.pillbox_id.clone(),
            compartments: self.compartments.clone(),
        })
    }

    // ── Deleting ───────────────────────────────────────────────────────

    /// Begin deleting the selected patient's remote configuration.
    ///
    /// The cached entry (if any) moves to `PendingDelete`; it is removed
    /// only when the remote confirms, and restored on failure.
    pub fn begin_delete(&mut self) -> Result<Outbound, ValidationError> {
        let patient_id = self
            .selected_patient
            .as_ref()
            .ok_or(ValidationError::NoPatientSelected)?
            .id
            .clone();
        if let Some(entry) = self.cache.get_mut(&patient_id) {
            entry.remote = RemoteState::PendingDelete;
        }
        let request_id = self.correlator.register(Pending::Delete {
            patient_id: patient_id.clone(),
        });
        Ok(Outbound::DeleteConfig {
            request_id,
            user_id: self.user_id.clone(),
            patient_id,
        })
    }

    /// Undo a delete whose message never made it onto the channel.
    pub fn cancel_delete(&mut self, request_id: &str) {
        if let Some(Pending::Delete { patient_id }) = self.correlator.take(request_id) {
            if let Some(entry) = self.cache.get_mut(&patient_id) {
                entry.remote = RemoteState::Live;
            }
        }
    }

    // ── Device push ────────────────────────────────────────────────────

    /// Plan a push of the current rack to the device.
    ///
    /// Validates the form (patient, device id, medication names) and
    /// decides whether a link message must precede the command push: it
    /// must whenever no live cached configuration binds this patient to
    /// this device id.
    pub fn plan_push(
        &mut self,
        is_valid: &dyn Fn(&str) -> bool,
    ) -> Result<PushPlan, ValidationError> {
        let patient_id = self
            .selected_patient
            .as_ref()
            .ok_or(ValidationError::NoPatientSelected)?
            .id
            .clone();
        if self.pillbox_id.is_empty() {
            return Err(ValidationError::MissingPillboxId);
        }
        for compartment in &self.compartments {
            let name = compartment.medication.trim();
            if !name.is_empty() && !is_valid(name) {
                return Err(ValidationError::UnknownMedication(name.to_string()));
            }
        }

        let linked = self
            .cache
            .get(&patient_id)
            .map(|entry| {
                entry.remote != RemoteState::PendingDelete
                    && entry.config.pillbox_id == self.pillbox_id
            })
            .unwrap_or(false);

        let link = if linked {
            None
        } else {
            let request_id = self.correlator.register(Pending::Link {
                pillbox_id: self.pillbox_id.clone(),
            });
            Some(Outbound::LinkDevice {
                request_id,
                capsy_id: self.pillbox_id.clone(),
            })
        };

        let commands = commands_for_rack(&self.compartments);
        let push = Outbound::PushCommands {
            request_id: uuid::Uuid::new_v4().to_string(),
            capsy_id: self.pillbox_id.clone(),
            pastilla: commands,
        };

        Ok(PushPlan { link, push })
    }

    /// Record that the channel timed out waiting for a link acknowledgement.
    pub fn note_link_timeout(&mut self) {
        self.notices.push(Notice::LinkTimedOut {
            pillbox_id: self.pillbox_id.clone(),
        });
    }

    /// Consume the pending entry for a correlation id, if any.
    pub fn take_pending(&mut self, request_id: &str) -> Option<Pending> {
        self.correlator.take(request_id)
    }

    // ── Inbound events ─────────────────────────────────────────────────

    /// Apply an inbound channel event.
    ///
    /// Events are matched through the pending-request map; events without a
    /// known correlation id are logged and dropped.
    pub fn on_event(&mut self, event: Inbound) {
        let Some(request_id) = event.request_id().map(str::to_string) else {
            tracing::warn!("dropping inbound event without request id");
            return;
        };
        let Some(pending) = self.correlator.take(&request_id) else {
            tracing::warn!(request_id = %request_id, "dropping uncorrelated inbound event");
            return;
        };

        match (event, pending) {
            (
                Inbound::ConfigSaved {
                    success,
                    config,
                    error,
                    ..
                },
                Pending::Save { patient_id },
            ) => {
                if success {
                    if let Some(config) = config {
                        tracing::info!(patient_id = %config.patient_id, "configuration saved");
                        self.upsert_cache(config);
                    }
                } else {
                    let error = error.unwrap_or_else(|| "save failed".to_string());
                    tracing::warn!(patient_id = %patient_id, error = %error, "remote save failed");
                    // Saves are send-and-forget: nothing was pre-applied,
                    // so there is nothing to roll back.
                    self.notices.push(Notice::SaveFailed { patient_id, error });
                }
            }
            (
                Inbound::ConfigLoaded {
                    success, config, ..
                },
                Pending::Load { patient_id },
            ) => match config {
                Some(config) if success => {
                    tracing::info!(patient_id = %config.patient_id, "configuration loaded");
                    self.upsert_cache(config);
                }
                _ => {
                    tracing::debug!(patient_id = %patient_id, "no remote configuration");
                }
            },
            (
                Inbound::ConfigDeleted { success, error, .. },
                Pending::Delete { patient_id },
            ) => {
                if success {
                    self.cache.remove(&patient_id);
                    self.notices
                        .push(Notice::DeleteConfirmed { patient_id });
                } else {
                    if let Some(entry) = self.cache.get_mut(&patient_id) {
                        entry.remote = RemoteState::DeleteFailed;
                    }
                    let error = error.unwrap_or_else(|| "delete failed".to_string());
                    tracing::warn!(patient_id = %patient_id, error = %error, "remote delete failed");
                    self.notices.push(Notice::DeleteFailed { patient_id, error });
                }
            }
            (Inbound::DeviceLinked { success, .. }, Pending::Link { pillbox_id }) => {
                // Normally consumed by the awaiting push flow; reaching this
                // point means the acknowledgement arrived after its waiter
                // gave up.
                tracing::debug!(pillbox_id = %pillbox_id, success, "late link acknowledgement");
            }
            (event, pending) => {
                tracing::warn!(?pending, ?event, "event kind does not match pending request");
            }
        }
    }

    fn upsert_cache(&mut self, config: PillboxConfig) {
        let updated_at = config.parsed_updated_at();
        self.cache.insert(
            config.patient_id.clone(),
            CachedConfig {
                config,
                updated_at,
                remote: RemoteState::Live,
            },
        );
    }
}

/// Rebuild a well-formed rack from remote data: exactly ten compartments,
/// ids 1..=10, extraneous entries dropped.
fn normalize_rack(compartments: Vec<Compartment>) -> Vec<Compartment> {
    let mut rack = default_rack();
    for compartment in compartments {
        let id = compartment.id;
        if (1..=COMPARTMENT_COUNT as u8).contains(&id) {
            rack[id as usize - 1] = compartment;
        }
    }
    rack
}
