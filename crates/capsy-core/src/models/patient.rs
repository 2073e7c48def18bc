//! Patient models.

use serde::{Deserialize, Serialize};

/// A patient as seen by the pillbox flow.
///
/// Owned by the user-management subsystem; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    /// Relationship of the account to this patient (e.g. "patient",
    /// "caregiver").
    pub role: String,
}

impl Patient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_wire_shape() {
        let patient = Patient::new("p1", "Ana", "caregiver");
        let json = serde_json::to_value(&patient).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["name"], "Ana");
        assert_eq!(json["role"], "caregiver");
    }
}
