//! Remote configuration channel.
//!
//! The channel is a one-way `send` primitive with no delivery guarantee;
//! results arrive later as [`Inbound`] events. The [`Correlator`] pairs
//! those events with the requests that caused them.

mod message;

pub use message::*;

use std::collections::HashMap;

use thiserror::Error;

/// Channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The capability backing this operation was not provided.
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("channel closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Outbound half of the channel.
///
/// Implementations are fire-and-forget: a successful `send` means the
/// message was handed to the transport, nothing more.
pub trait Transport: Send + Sync {
    fn send(&self, message: &Outbound) -> ChannelResult<()>;
}

/// What an outstanding request was for, keyed by its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    Save { patient_id: String },
    Load { patient_id: String },
    Delete { patient_id: String },
    Link { pillbox_id: String },
}

/// Pending-request map: correlation ids handed out for outbound messages,
/// consumed when the matching inbound event arrives.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, Pending>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and hand back its fresh correlation id.
    pub fn register(&mut self, pending: Pending) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.pending.insert(id.clone(), pending);
        id
    }

    /// Consume the pending entry for an inbound event, if it is known.
    pub fn take(&mut self, request_id: &str) -> Option<Pending> {
        self.pending.remove(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let mut correlator = Correlator::new();
        let id = correlator.register(Pending::Save {
            patient_id: "p1".into(),
        });
        assert_eq!(correlator.len(), 1);

        let pending = correlator.take(&id).unwrap();
        assert_eq!(
            pending,
            Pending::Save {
                patient_id: "p1".into()
            }
        );
        assert!(correlator.is_empty());

        // A second take for the same id finds nothing
        assert!(correlator.take(&id).is_none());
    }

    #[test]
    fn test_unknown_id_is_none() {
        let mut correlator = Correlator::new();
        assert!(correlator.take("nope").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut correlator = Correlator::new();
        let a = correlator.register(Pending::Link {
            pillbox_id: "PB-1".into(),
        });
        let b = correlator.register(Pending::Link {
            pillbox_id: "PB-1".into(),
        });
        assert_ne!(a, b);
    }
}
