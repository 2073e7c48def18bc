//! SQLite schema definition.

/// Complete database schema for the capsy on-device store.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Medication Directory (reference list for validation/autocomplete)
-- ============================================================================

CREATE TABLE IF NOT EXISTS medication_directory (
    name TEXT NOT NULL,
    name_es TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (name, name_es)
);

CREATE INDEX IF NOT EXISTS idx_directory_name ON medication_directory(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_directory_name_es ON medication_directory(name_es COLLATE NOCASE);

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name);

-- Prescribed medications per patient (used to pre-fill an unconfigured rack)
CREATE TABLE IF NOT EXISTS patient_medications (
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    PRIMARY KEY (patient_id, name)
);

-- ============================================================================
-- Pillbox Configuration Cache (local mirror of remote state)
-- ============================================================================

CREATE TABLE IF NOT EXISTS pillbox_configs (
    user_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    pillbox_id TEXT NOT NULL,
    compartments TEXT NOT NULL DEFAULT '[]',      -- JSON array of compartments
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, patient_id)
);
"#;
