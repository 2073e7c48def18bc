//! Patient roster database operations.

use std::sync::{Arc, Mutex};

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::Patient;
use crate::reference::SourceError;
use crate::session::PrescriptionSource;

impl Database {
    /// Insert or update a patient.
    pub fn upsert_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO patients (id, name, role)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                updated_at = datetime('now')
            "#,
            params![patient.id, patient.name, patient.role],
        )?;
        Ok(())
    }

    /// Get a patient by id.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                "SELECT id, name, role FROM patients WHERE id = ?",
                [id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        role: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all patients, ordered by name.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, role FROM patients ORDER BY name")?;

        let rows = stmt.query_map([], |row| {
            Ok(Patient {
                id: row.get(0)?,
                name: row.get(1)?,
                role: row.get(2)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Delete a patient (prescribed medications cascade).
    pub fn delete_patient(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM patients WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Replace the prescribed-medication list for a patient.
    pub fn set_patient_medications(&mut self, patient_id: &str, names: &[String]) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM patient_medications WHERE patient_id = ?",
            [patient_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO patient_medications (patient_id, name) VALUES (?1, ?2)",
            )?;
            for name in names {
                stmt.execute(params![patient_id, name])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Prescribed medications for a patient, insertion-stable by name.
    pub fn patient_medications(&self, patient_id: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM patient_medications WHERE patient_id = ? ORDER BY name",
        )?;

        let rows = stmt.query_map([patient_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// [`PrescriptionSource`] backed by the on-device store.
pub struct StorePrescriptionSource {
    db: Arc<Mutex<Database>>,
}

impl StorePrescriptionSource {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

impl PrescriptionSource for StorePrescriptionSource {
    fn prescribed_for(&self, patient_id: &str) -> Result<Vec<String>, SourceError> {
        let db = self
            .db
            .lock()
            .map_err(|e| SourceError::Lookup(format!("store lock poisoned: {e}")))?;
        db.patient_medications(patient_id)
            .map_err(|e| SourceError::Lookup(e.to_string()))
    }
}
