//! Optional remote mirror of the ledger.
//!
//! The mirror exposes two resources, `medications` and `intake_history`,
//! through a create/read/append interface. It is an export target only:
//! appends are at-least-once and nothing is reconciled with the local
//! ledger.
//!
//! [`JsonlMirror`] keeps each resource as a JSON Lines file in a directory
//! with file locking, so several processes can share one mirror.

use crate::{Error, LedgerState, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

const MEDICATIONS_FILE: &str = "medications.jsonl";
const INTAKE_FILE: &str = "intake_history.jsonl";
const LOCK_FILE: &str = "mirror.lock";

/// Fields supplied when creating a medication record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMedication {
    pub name: String,
    pub total_pills: u32,
    pub pills_remaining: u32,
    pub daily_dose: u32,
    pub start_date: NaiveDate,
}

impl From<&LedgerState> for NewMedication {
    fn from(state: &LedgerState) -> Self {
        NewMedication {
            name: state.name().to_string(),
            total_pills: state.total_pills(),
            pills_remaining: state.pills_remaining(),
            daily_dose: state.daily_dose(),
            start_date: state.start_date(),
        }
    }
}

/// A stored `medications` record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicationRecord {
    pub id: Uuid,
    pub name: String,
    pub total_pills: u32,
    pub pills_remaining: u32,
    pub daily_dose: u32,
    pub start_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// A stored `intake_history` record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntakeRecord {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub count: u32,
    pub taken_at: DateTime<Utc>,
}

/// Create/read/append access to a mirror.
///
/// Ids and timestamps are assigned by the mirror.
pub trait RemoteMirror {
    fn create_medication(&mut self, medication: NewMedication) -> Result<MedicationRecord>;

    fn medication(&self, id: Uuid) -> Result<Option<MedicationRecord>>;

    fn append_intake(&mut self, medication_id: Uuid, count: u32) -> Result<IntakeRecord>;

    /// Intake records of one medication, newest first.
    fn intake_history(&self, medication_id: Uuid) -> Result<Vec<IntakeRecord>>;

    /// Delete a medication and its intake records. Returns the number of
    /// records removed.
    fn delete_medication(&mut self, id: Uuid) -> Result<usize>;
}

// ============================================================================
// JSON Lines mirror
// ============================================================================

/// Directory-backed mirror with one JSON Lines file per resource.
pub struct JsonlMirror {
    dir: PathBuf,
}

impl JsonlMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn medications_path(&self) -> PathBuf {
        self.dir.join(MEDICATIONS_FILE)
    }

    fn intake_path(&self) -> PathBuf {
        self.dir.join(INTAKE_FILE)
    }

    /// Take the directory-wide lock, shared for readers and exclusive for
    /// writers. Released when the returned file is dropped.
    fn lock(&self, exclusive: bool) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;

        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(file)
    }

    fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Replace `path` with `lines`, one per line.
    fn rewrite(&self, path: &Path, lines: &[String]) -> Result<()> {
        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            for line in lines {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Split the raw lines of a JSON Lines file into the ones to keep and a
/// count of those whose `field` equals `id`.
///
/// Lines that do not parse, or parse as records this version does not know,
/// are kept verbatim.
fn partition_lines(path: &Path, field: &str, id: Uuid) -> Result<(Vec<String>, usize)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let id = id.to_string();
    let reader = BufReader::new(File::open(path)?);
    let mut kept = Vec::new();
    let mut removed = 0;

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let matches = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|value| value.get(field).and_then(|v| v.as_str()).map(|v| v == id))
            .unwrap_or(false);
        if matches {
            removed += 1;
        } else {
            kept.push(line);
        }
    }

    Ok((kept, removed))
}

/// Read all records from a JSON Lines file, skipping malformed lines.
fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Skipping malformed record in {:?} at line {}: {}",
                    path,
                    line_num + 1,
                    e
                );
            }
        }
    }

    Ok(records)
}

impl RemoteMirror for JsonlMirror {
    fn create_medication(&mut self, medication: NewMedication) -> Result<MedicationRecord> {
        if medication.name.trim().is_empty() {
            return Err(Error::Mirror("medication name must not be empty".into()));
        }

        let _lock = self.lock(true)?;
        let record = MedicationRecord {
            id: Uuid::new_v4(),
            name: medication.name,
            total_pills: medication.total_pills,
            pills_remaining: medication.pills_remaining,
            daily_dose: medication.daily_dose,
            start_date: medication.start_date,
            created_at: Utc::now(),
        };
        Self::append_line(&self.medications_path(), &record)?;

        tracing::debug!("Created mirror medication {}", record.id);
        Ok(record)
    }

    fn medication(&self, id: Uuid) -> Result<Option<MedicationRecord>> {
        let _lock = self.lock(false)?;
        let records: Vec<MedicationRecord> = read_records(&self.medications_path())?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    fn append_intake(&mut self, medication_id: Uuid, count: u32) -> Result<IntakeRecord> {
        if count == 0 {
            return Err(Error::Mirror("intake count must be at least 1".into()));
        }

        let _lock = self.lock(true)?;
        let medications: Vec<MedicationRecord> = read_records(&self.medications_path())?;
        if !medications.iter().any(|m| m.id == medication_id) {
            return Err(Error::Mirror(format!(
                "unknown medication {}",
                medication_id
            )));
        }

        let record = IntakeRecord {
            id: Uuid::new_v4(),
            medication_id,
            count,
            taken_at: Utc::now(),
        };
        Self::append_line(&self.intake_path(), &record)?;

        tracing::debug!("Appended mirror intake {} for {}", record.id, medication_id);
        Ok(record)
    }

    fn intake_history(&self, medication_id: Uuid) -> Result<Vec<IntakeRecord>> {
        let _lock = self.lock(false)?;
        let mut records: Vec<IntakeRecord> = read_records(&self.intake_path())?;
        records.retain(|r| r.medication_id == medication_id);
        // Stable sort keeps append order for equal timestamps; reverse it
        records.reverse();
        records.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        Ok(records)
    }

    fn delete_medication(&mut self, id: Uuid) -> Result<usize> {
        let _lock = self.lock(true)?;

        let (kept_intakes, removed_intakes) =
            partition_lines(&self.intake_path(), "medication_id", id)?;
        let (kept_medications, removed_medications) =
            partition_lines(&self.medications_path(), "id", id)?;

        let removed = removed_intakes + removed_medications;
        if removed == 0 {
            return Ok(0);
        }

        if removed_intakes > 0 {
            self.rewrite(&self.intake_path(), &kept_intakes)?;
        }
        if removed_medications > 0 {
            self.rewrite(&self.medications_path(), &kept_medications)?;
        }

        tracing::debug!("Deleted mirror medication {} ({} records)", id, removed);
        Ok(removed)
    }
}

// ============================================================================
// Ledger export and connectivity check
// ============================================================================

/// Result of pushing the ledger to a mirror
#[derive(Clone, Debug)]
pub struct PushReport {
    pub medication: MedicationRecord,
    pub intakes: Vec<IntakeRecord>,
}

/// Export the ledger: one medication record plus one intake record per
/// history entry.
///
/// Pushing the same ledger twice creates a second medication.
pub fn push_ledger<M: RemoteMirror>(mirror: &mut M, ledger: &LedgerState) -> Result<PushReport> {
    let medication = mirror.create_medication(NewMedication::from(ledger))?;

    let mut intakes = Vec::with_capacity(ledger.intake_history().len());
    for entry in ledger.intake_history() {
        intakes.push(mirror.append_intake(medication.id, entry.count)?);
    }

    tracing::info!(
        "Pushed ledger to mirror as {} with {} intake records",
        medication.id,
        intakes.len()
    );
    Ok(PushReport {
        medication,
        intakes,
    })
}

/// Outcome of a connectivity check
#[derive(Clone, Debug)]
pub struct ConnectivityReport {
    pub medication: MedicationRecord,
    pub intake: IntakeRecord,
    pub records_cleaned: usize,
}

/// Exercise every mirror operation with throwaway data and clean up.
pub fn check_connectivity<M: RemoteMirror>(
    mirror: &mut M,
    today: NaiveDate,
) -> Result<ConnectivityReport> {
    let medication = mirror.create_medication(NewMedication {
        name: "Test Medication".into(),
        total_pills: 30,
        pills_remaining: 30,
        daily_dose: 1,
        start_date: today,
    })?;

    let outcome = verify_roundtrip(mirror, &medication);

    // Clean up even when verification failed
    let records_cleaned = mirror.delete_medication(medication.id)?;
    let intake = outcome?;

    Ok(ConnectivityReport {
        medication,
        intake,
        records_cleaned,
    })
}

fn verify_roundtrip<M: RemoteMirror>(
    mirror: &mut M,
    medication: &MedicationRecord,
) -> Result<IntakeRecord> {
    let intake = mirror.append_intake(medication.id, 1)?;

    match mirror.medication(medication.id)? {
        Some(found) if found == *medication => {}
        _ => {
            return Err(Error::Mirror(format!(
                "medication {} not readable after create",
                medication.id
            )))
        }
    }

    let history = mirror.intake_history(medication.id)?;
    if !history.contains(&intake) {
        return Err(Error::Mirror(format!(
            "intake {} not readable after append",
            intake.id
        )));
    }

    Ok(intake)
}
