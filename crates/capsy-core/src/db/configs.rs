//! Pillbox configuration cache database operations.
//!
//! The cache is a local mirror of remote state: configurations are stored
//! wholesale (full compartment array as a JSON column) and overwritten on
//! every save, matching the remote overwrite semantics.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::{Compartment, PillboxConfig};

impl Database {
    /// Insert or overwrite the cached configuration for a patient.
    pub fn upsert_cached_config(&self, config: &PillboxConfig) -> DbResult<()> {
        let compartments_json = serde_json::to_string(&config.compartments)?;

        self.conn.execute(
            r#"
            INSERT INTO pillbox_configs (user_id, patient_id, pillbox_id, compartments, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, patient_id) DO UPDATE SET
                pillbox_id = excluded.pillbox_id,
                compartments = excluded.compartments,
                updated_at = excluded.updated_at
            "#,
            params![
                config.user_id,
                config.patient_id,
                config.pillbox_id,
                compartments_json,
                config.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get the cached configuration for a patient.
    pub fn get_cached_config(
        &self,
        user_id: &str,
        patient_id: &str,
    ) -> DbResult<Option<PillboxConfig>> {
        self.conn
            .query_row(
                r#"
                SELECT user_id, patient_id, pillbox_id, compartments, updated_at
                FROM pillbox_configs
                WHERE user_id = ?1 AND patient_id = ?2
                "#,
                params![user_id, patient_id],
                |row| {
                    Ok(ConfigRow {
                        user_id: row.get(0)?,
                        patient_id: row.get(1)?,
                        pillbox_id: row.get(2)?,
                        compartments: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all cached configurations for a user.
    pub fn list_cached_configs(&self, user_id: &str) -> DbResult<Vec<PillboxConfig>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, patient_id, pillbox_id, compartments, updated_at
            FROM pillbox_configs
            WHERE user_id = ?
            ORDER BY patient_id
            "#,
        )?;

        let rows = stmt.query_map([user_id], |row| {
            Ok(ConfigRow {
                user_id: row.get(0)?,
                patient_id: row.get(1)?,
                pillbox_id: row.get(2)?,
                compartments: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?.try_into()?);
        }
        Ok(configs)
    }

    /// Remove the cached configuration for a patient.
    pub fn delete_cached_config(&self, user_id: &str, patient_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM pillbox_configs WHERE user_id = ?1 AND patient_id = ?2",
            params![user_id, patient_id],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Raw row before the JSON compartments column is decoded.
struct ConfigRow {
    user_id: String,
    patient_id: String,
    pillbox_id: String,
    compartments: String,
    updated_at: String,
}

impl TryFrom<ConfigRow> for PillboxConfig {
    type Error = super::DbError;

    fn try_from(row: ConfigRow) -> DbResult<PillboxConfig> {
        let compartments: Vec<Compartment> = serde_json::from_str(&row.compartments)?;
        Ok(PillboxConfig {
            user_id: row.user_id,
            patient_id: row.patient_id,
            pillbox_id: row.pillbox_id,
            compartments,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompartmentField, TimeSlot};

    fn sample_config() -> PillboxConfig {
        let mut config = PillboxConfig::new("u1".into(), "p1".into(), "PB-1".into());
        config.compartments[0].apply(CompartmentField::Medication("Paracetamol".into()));
        config.compartments[0].apply(CompartmentField::Dosage("2 pills".into()));
        config.compartments[0].time_slots.push(TimeSlot {
            start_time: Some("08:00".into()),
            interval_hours: 12,
        });
        config.updated_at = "2024-03-01T10:00:00Z".into();
        config
    }

    #[test]
    fn test_upsert_and_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let config = sample_config();
        db.upsert_cached_config(&config).unwrap();

        let cached = db.get_cached_config("u1", "p1").unwrap().unwrap();
        assert_eq!(cached, config);
        assert_eq!(cached.compartments.len(), 10);
    }

    #[test]
    fn test_upsert_overwrites_wholesale() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cached_config(&sample_config()).unwrap();

        let mut replacement = PillboxConfig::new("u1".into(), "p1".into(), "PB-2".into());
        replacement.updated_at = "2024-03-02T10:00:00Z".into();
        db.upsert_cached_config(&replacement).unwrap();

        let cached = db.get_cached_config("u1", "p1").unwrap().unwrap();
        assert_eq!(cached.pillbox_id, "PB-2");
        assert!(cached.compartments[0].is_empty());
    }

    #[test]
    fn test_keyed_by_user_and_patient() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cached_config(&sample_config()).unwrap();

        assert!(db.get_cached_config("u2", "p1").unwrap().is_none());
        assert!(db.get_cached_config("u1", "p2").unwrap().is_none());

        let listed = db.list_cached_configs("u1").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(db.list_cached_configs("u2").unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cached_config(&sample_config()).unwrap();

        assert!(db.delete_cached_config("u1", "p1").unwrap());
        assert!(!db.delete_cached_config("u1", "p1").unwrap());
        assert!(db.get_cached_config("u1", "p1").unwrap().is_none());
    }
}
