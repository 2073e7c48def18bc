//! Medication directory database operations.

use std::sync::{Arc, Mutex};

use rusqlite::params;

use super::{Database, DbResult};
use crate::reference::{MedicationEntry, MedicationSource, SourceError};

impl Database {
    /// Replace the entire medication directory with a fresh snapshot.
    pub fn replace_directory(&mut self, entries: &[MedicationEntry]) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM medication_directory", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO medication_directory (name, name_es) VALUES (?1, ?2)",
            )?;
            for entry in entries {
                stmt.execute(params![entry.name, entry.name_es])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All directory entries, ordered by name.
    pub fn list_directory(&self) -> DbResult<Vec<MedicationEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, name_es FROM medication_directory ORDER BY name")?;

        let rows = stmt.query_map([], |row| {
            Ok(MedicationEntry {
                name: row.get(0)?,
                name_es: row.get(1)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Substring search over either language field.
    pub fn search_directory(&self, query: &str, limit: usize) -> DbResult<Vec<MedicationEntry>> {
        let pattern = format!("%{}%", query);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, name_es
            FROM medication_directory
            WHERE name LIKE ?1 COLLATE NOCASE OR name_es LIKE ?1 COLLATE NOCASE
            ORDER BY name
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![pattern, limit as i64], |row| {
            Ok(MedicationEntry {
                name: row.get(0)?,
                name_es: row.get(1)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Exact case-insensitive membership test against either field.
    ///
    /// Fails open when the directory is empty, mirroring the in-memory
    /// reference index.
    pub fn is_listed_medication(&self, name: &str) -> DbResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        let total: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM medication_directory", [], |row| {
                    row.get(0)
                })?;
        if total == 0 {
            return Ok(true);
        }

        let hits: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM medication_directory
            WHERE name = ?1 COLLATE NOCASE OR name_es = ?1 COLLATE NOCASE
            "#,
            [name],
            |row| row.get(0),
        )?;
        Ok(hits > 0)
    }
}

/// [`MedicationSource`] backed by the on-device store.
pub struct StoreMedicationSource {
    db: Arc<Mutex<Database>>,
}

impl StoreMedicationSource {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

impl MedicationSource for StoreMedicationSource {
    fn fetch_all(&self) -> Result<Vec<MedicationEntry>, SourceError> {
        let db = self
            .db
            .lock()
            .map_err(|e| SourceError::Lookup(format!("store lock poisoned: {e}")))?;
        db.list_directory()
            .map_err(|e| SourceError::Lookup(e.to_string()))
    }
}
