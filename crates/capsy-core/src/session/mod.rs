//! Pillbox configuration session.
//!
//! [`Session`] is the runtime shell around the pure session state: it owns
//! the injected capabilities, the debounced auto-save task, and the event
//! pump, and it drives the link handshake when pushing to a device.
//!
//! All capabilities are optional. A missing capability degrades the
//! operations that need it to inert no-ops with a typed error instead of
//! failing the whole screen.

mod state;

pub use state::{
    CachedConfig, LoadState, Notice, RemoteState, SlotPolicy, ValidationError,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, Inbound, Outbound, Transport};
use crate::models::{Compartment, CompartmentField, Patient};
use crate::reference::{ReferenceIndex, SourceError, Suggestions};
use state::SessionState;

/// Quiescence window before an auto-save fires.
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Bounded wait for the device link acknowledgement.
pub const LINK_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Lookup(#[from] SourceError),

    #[error("device link rejected: {0}")]
    LinkRejected(String),

    #[error("timed out waiting for device link acknowledgement")]
    LinkTimeout,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Opaque provider of a patient's prescribed medications, used to pre-fill
/// an unconfigured rack.
pub trait PrescriptionSource: Send + Sync {
    fn prescribed_for(&self, patient_id: &str) -> Result<Vec<String>, SourceError>;
}

/// Capabilities injected at construction. Each is independently optional.
#[derive(Default)]
pub struct Capabilities {
    pub transport: Option<Arc<dyn Transport>>,
    pub prescriptions: Option<Arc<dyn PrescriptionSource>>,
    pub reference: Option<Arc<ReferenceIndex>>,
}

/// Read-only view of the screen state for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub load_state: LoadState,
    pub selected_patient: Option<Patient>,
    pub pillbox_id: String,
    pub show_pillbox_id_input: bool,
    pub compartments: Vec<Compartment>,
    pub medication_ok: Vec<bool>,
}

/// The pillbox configuration session.
///
/// Methods are synchronous and cheap except [`Session::push_to_device`],
/// which awaits the link handshake. Must live inside a tokio runtime (the
/// auto-save and event-pump tasks are spawned on it).
pub struct Session {
    state: Mutex<SessionState>,
    transport: Option<Arc<dyn Transport>>,
    prescriptions: Option<Arc<dyn PrescriptionSource>>,
    reference: Option<Arc<ReferenceIndex>>,
    autosave_task: Mutex<Option<JoinHandle<()>>>,
    link_waiters: Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, capabilities: Capabilities) -> Arc<Self> {
        Self::with_policy(user_id, capabilities, SlotPolicy::default())
    }

    pub fn with_policy(
        user_id: impl Into<String>,
        capabilities: Capabilities,
        policy: SlotPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState::new(user_id.into(), policy)),
            transport: capabilities.transport,
            prescriptions: capabilities.prescriptions,
            reference: capabilities.reference,
            autosave_task: Mutex::new(None),
            link_waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the pump that feeds inbound channel events into the session.
    pub fn pump_events(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<Inbound>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.apply_event(event);
            }
            tracing::debug!("event channel closed, pump stopping");
        })
    }

    // ── Patient switch ─────────────────────────────────────────────────

    /// Select a patient: send the load request and resolve the form from
    /// the local cache, falling back to prescription pre-fill.
    ///
    /// Any error along the way resets the form and surfaces a connectivity
    /// notice.
    pub fn select_patient(self: &Arc<Self>, patient: Patient) -> SessionResult<()> {
        let patient_id = patient.id.clone();
        let (load, cache_hit) = self.state().begin_patient_switch(patient);
        tracing::info!(patient_id = %patient_id, cache_hit, "patient selected");

        if let Err(e) = self.try_send(&load) {
            self.state().reset();
            return Err(e.into());
        }

        if !cache_hit {
            match &self.prescriptions {
                Some(source) => match source.prescribed_for(&patient_id) {
                    Ok(names) => self.state().apply_prefill(&names),
                    Err(e) => {
                        tracing::warn!(patient_id = %patient_id, error = %e, "prescription lookup failed");
                        self.state().reset();
                        return Err(e.into());
                    }
                },
                None => {
                    tracing::debug!("prescription capability unavailable, skipping pre-fill")
                }
            }
        }

        self.refresh_validation();
        self.poke_autosave();
        Ok(())
    }

    // ── Form edits ─────────────────────────────────────────────────────

    /// Replace one field of one compartment. Returns whether the value was
    /// accepted by the field's input policy.
    pub fn update_compartment(
        self: &Arc<Self>,
        id: u8,
        field: CompartmentField,
    ) -> SessionResult<bool> {
        let is_medication = matches!(field, CompartmentField::Medication(_));
        let applied = self.state().update_compartment(id, field)?;
        if applied {
            if is_medication {
                self.refresh_validation();
            }
            self.poke_autosave();
        }
        Ok(applied)
    }

    pub fn set_pillbox_id(self: &Arc<Self>, pillbox_id: impl Into<String>) {
        self.state().set_pillbox_id(pillbox_id.into());
        self.poke_autosave();
    }

    pub fn add_time_slot(
        self: &Arc<Self>,
        id: u8,
        start_time: &str,
        interval_hours: u32,
    ) -> SessionResult<()> {
        self.state().add_time_slot(id, start_time, interval_hours)?;
        self.poke_autosave();
        Ok(())
    }

    pub fn remove_time_slot(self: &Arc<Self>, id: u8, index: usize) -> SessionResult<bool> {
        let removed = self.state().remove_time_slot(id, index)?;
        if removed {
            self.poke_autosave();
        }
        Ok(removed)
    }

    /// Autocomplete medication names. Without a reference capability this
    /// finds nothing.
    pub fn filter_medications(&self, term: &str) -> Suggestions {
        match &self.reference {
            Some(reference) => reference.filter(term),
            None => Suggestions::Ready(Vec::new()),
        }
    }

    // ── Remote operations ──────────────────────────────────────────────

    /// Delete the selected patient's remote configuration.
    ///
    /// The cached entry is marked pending and reconciled when the result
    /// event arrives; it is never dropped optimistically.
    pub fn delete_config(&self) -> SessionResult<()> {
        let message = self.state().begin_delete()?;
        if let Err(e) = self.try_send(&message) {
            self.state().cancel_delete(message.request_id());
            return Err(e.into());
        }
        Ok(())
    }

    /// Push the current rack to the device as dispensing commands.
    ///
    /// A device id with no live cached configuration for the selected
    /// patient is linked first, awaiting the correlated acknowledgement
    /// (bounded by [`LINK_ACK_TIMEOUT`]) before the commands go out.
    pub async fn push_to_device(self: &Arc<Self>) -> SessionResult<()> {
        let transport = self
            .transport
            .clone()
            .ok_or(ChannelError::Unavailable("transport"))?;

        let plan = {
            let mut state = self.state();
            let is_valid = self.validator();
            state.plan_push(&is_valid)?
        };

        if let Some(link) = plan.link {
            let request_id = link.request_id().to_string();
            let (ack_tx, ack_rx) = oneshot::channel();
            self.link_waiters()
                .insert(request_id.clone(), ack_tx);

            if let Err(e) = transport.send(&link) {
                self.link_waiters().remove(&request_id);
                self.state().take_pending(&request_id);
                return Err(e.into());
            }
            tracing::info!(request_id = %request_id, "link sent, awaiting acknowledgement");

            match tokio::time::timeout(LINK_ACK_TIMEOUT, ack_rx).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!(request_id = %request_id, "device linked");
                }
                Ok(Ok(Err(error))) => {
                    return Err(SessionError::LinkRejected(error));
                }
                Ok(Err(_)) | Err(_) => {
                    self.link_waiters().remove(&request_id);
                    let mut state = self.state();
                    state.take_pending(&request_id);
                    state.note_link_timeout();
                    return Err(SessionError::LinkTimeout);
                }
            }
        }

        transport.send(&plan.push)?;
        tracing::info!("device commands pushed");
        Ok(())
    }

    // ── Observation ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            load_state: state.load_state(),
            selected_patient: state.selected_patient().cloned(),
            pillbox_id: state.pillbox_id().to_string(),
            show_pillbox_id_input: state.show_pillbox_id_input(),
            compartments: state.compartments().to_vec(),
            medication_ok: state.medication_ok().to_vec(),
        }
    }

    /// Drain accumulated transient notifications.
    pub fn take_notices(&self) -> Vec<Notice> {
        self.state().take_notices()
    }

    pub fn cached_config(&self, patient_id: &str) -> Option<CachedConfig> {
        self.state().cached(patient_id).cloned()
    }

    // ── Internals ──────────────────────────────────────────────────────

    /// Apply one inbound channel event.
    fn apply_event(&self, event: Inbound) {
        if let Inbound::DeviceLinked {
            request_id: Some(request_id),
            success,
            error,
        } = &event
        {
            if let Some(waiter) = self.link_waiters().remove(request_id) {
                self.state().take_pending(request_id);
                let outcome = if *success {
                    Ok(())
                } else {
                    Err(error.clone().unwrap_or_else(|| "link rejected".to_string()))
                };
                let _ = waiter.send(outcome);
                return;
            }
        }
        self.state().on_event(event);
    }

    /// Restart the debounce timer; after one quiet second the current
    /// configuration is saved wholesale.
    fn poke_autosave(self: &Arc<Self>) {
        let mut slot = self
            .autosave_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
        let session = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(SAVE_DEBOUNCE).await;
            session.flush_autosave();
        }));
    }

    fn flush_autosave(&self) {
        let Some(message) = self.state().build_autosave() else {
            return;
        };
        match self.try_send(&message) {
            Ok(()) => tracing::info!("auto-saved pillbox configuration"),
            Err(ChannelError::Unavailable(_)) => {
                // No transport: the debouncer degrades to a no-op.
                tracing::debug!("auto-save skipped, transport unavailable");
            }
            Err(e) => {
                tracing::warn!(error = %e, "auto-save send failed");
                if let Outbound::SaveConfig { patient_id, .. } = message {
                    self.state().push_notice(Notice::SaveFailed {
                        patient_id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Validation closure over the reference capability; without one,
    /// any non-empty name passes (fail-open).
    fn validator(&self) -> impl Fn(&str) -> bool + '_ {
        move |name: &str| match &self.reference {
            Some(reference) => reference.is_valid(name),
            None => !name.trim().is_empty(),
        }
    }

    fn refresh_validation(&self) {
        let is_valid = self.validator();
        self.state().refresh_validation(&is_valid);
    }

    fn try_send(&self, message: &Outbound) -> Result<(), ChannelError> {
        match &self.transport {
            Some(transport) => transport.send(message),
            None => Err(ChannelError::Unavailable("transport")),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_waiters(
        &self,
    ) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Result<(), String>>>> {
        self.link_waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelResult;
    use crate::reference::MedicationEntry;
    use tokio::time::Instant;

    /// Transport that records every message with its (paused-clock) send time.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Outbound, Instant)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(Outbound, Instant)> {
            self.sent.lock().unwrap().clone()
        }

        fn saves(&self) -> Vec<(Outbound, Instant)> {
            self.sent()
                .into_iter()
                .filter(|(m, _)| matches!(m, Outbound::SaveConfig { .. }))
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, message: &Outbound) -> ChannelResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((message.clone(), Instant::now()));
            Ok(())
        }
    }

    fn session_with(
        transport: Arc<RecordingTransport>,
        prescriptions: Option<Arc<dyn PrescriptionSource>>,
    ) -> Arc<Session> {
        Session::new(
            "u1",
            Capabilities {
                transport: Some(transport),
                prescriptions,
                reference: Some(Arc::new(ReferenceIndex::preloaded(vec![
                    MedicationEntry::new("Paracetamol", "Paracetamol"),
                    MedicationEntry::new("Ibuprofen", "Ibuprofeno"),
                ]))),
            },
        )
    }

    fn patient(id: &str) -> Patient {
        Patient::new(id, format!("Patient {id}"), "patient")
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_sends_one_save_after_quiescence() {
        let transport = Arc::new(RecordingTransport::default());
        let session = session_with(transport.clone(), None);

        session.select_patient(patient("p1")).unwrap();
        session.set_pillbox_id("PB-1");

        // A burst of edits inside the debounce window
        session
            .update_compartment(1, CompartmentField::Medication("Paracetamol".into()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        session
            .update_compartment(1, CompartmentField::Dosage("2 pills".into()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let last_change = Instant::now();
        session.add_time_slot(1, "08:00", 12).unwrap();

        // Let the timer run out well past the window
        tokio::time::sleep(Duration::from_secs(3)).await;

        let saves = transport.saves();
        assert_eq!(saves.len(), 1, "burst must coalesce into one save");
        let (message, sent_at) = &saves[0];
        assert!(
            sent_at.duration_since(last_change) >= SAVE_DEBOUNCE,
            "save fired before the window elapsed"
        );
        match message {
            Outbound::SaveConfig { compartments, .. } => {
                assert_eq!(compartments.len(), 10);
                assert_eq!(compartments[0].medication, "Paracetamol");
            }
            other => panic!("expected save, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_autosave_without_device_id() {
        let transport = Arc::new(RecordingTransport::default());
        let session = session_with(transport.clone(), None);

        session.select_patient(patient("p1")).unwrap();
        session
            .update_compartment(1, CompartmentField::Medication("Paracetamol".into()))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(transport.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn push_waits_for_link_acknowledgement() {
        let transport = Arc::new(RecordingTransport::default());
        let session = session_with(transport.clone(), None);

        session.select_patient(patient("p1")).unwrap();
        session.set_pillbox_id("PB-1");
        session
            .update_compartment(1, CompartmentField::Medication("Paracetamol".into()))
            .unwrap();

        let pusher = Arc::clone(&session);
        let push = tokio::spawn(async move { pusher.push_to_device().await });

        // Let the push task send the link message
        tokio::time::sleep(Duration::from_millis(10)).await;
        let link_id = transport
            .sent()
            .iter()
            .find_map(|(m, _)| match m {
                Outbound::LinkDevice { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .expect("link message should be sent first");

        // No commands may go out before the acknowledgement
        assert!(
            !transport
                .sent()
                .iter()
                .any(|(m, _)| matches!(m, Outbound::PushCommands { .. })),
            "commands must wait for the link acknowledgement"
        );

        session.apply_event(Inbound::DeviceLinked {
            request_id: Some(link_id),
            success: true,
            error: None,
        });

        push.await.unwrap().unwrap();
        let commands = transport
            .sent()
            .into_iter()
            .find_map(|(m, _)| match m {
                Outbound::PushCommands { pastilla, .. } => Some(pastilla),
                _ => None,
            })
            .expect("commands should follow the acknowledgement");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_times_out_without_acknowledgement() {
        let transport = Arc::new(RecordingTransport::default());
        let session = session_with(transport.clone(), None);

        session.select_patient(patient("p1")).unwrap();
        session.set_pillbox_id("PB-1");
        session
            .update_compartment(1, CompartmentField::Medication("Paracetamol".into()))
            .unwrap();

        let result = session.push_to_device().await;
        assert!(matches!(result, Err(SessionError::LinkTimeout)));
        assert!(
            !transport
                .sent()
                .iter()
                .any(|(m, _)| matches!(m, Outbound::PushCommands { .. })),
            "no commands after a link timeout"
        );
        assert!(session
            .take_notices()
            .contains(&Notice::LinkTimedOut {
                pillbox_id: "PB-1".into()
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn push_rejected_without_transport() {
        let session = Session::new("u1", Capabilities::default());
        session.select_patient(patient("p1")).ok();

        let result = session.push_to_device().await;
        assert!(matches!(
            result,
            Err(SessionError::Channel(ChannelError::Unavailable(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_transport_resets_on_select() {
        let session = Session::new("u1", Capabilities::default());

        let result = session.select_patient(patient("p1"));
        assert!(result.is_err());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.load_state, LoadState::Reset);
        assert!(session.take_notices().contains(&Notice::ConnectionLost));
    }

    #[tokio::test(start_paused = true)]
    async fn prefill_from_prescriptions_on_cache_miss() {
        struct Fixed;
        impl PrescriptionSource for Fixed {
            fn prescribed_for(&self, _patient_id: &str) -> Result<Vec<String>, SourceError> {
                Ok(vec!["Ibuprofen".into(), "Paracetamol".into()])
            }
        }

        let transport = Arc::new(RecordingTransport::default());
        let session = session_with(transport, Some(Arc::new(Fixed)));

        session.select_patient(patient("p2")).unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.load_state, LoadState::NoConfig);
        assert!(snapshot.show_pillbox_id_input);
        assert_eq!(snapshot.compartments[0].medication, "Ibuprofen");
        assert_eq!(snapshot.compartments[1].medication, "Paracetamol");
        assert!(snapshot.compartments[0].dosage.is_empty());
    }
}
