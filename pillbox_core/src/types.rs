//! Core domain types for the Pillbox ledger.
//!
//! This module defines the data the ledger owns:
//! - Medication configuration (name, container size, dose, start date)
//! - Intake history entries
//! - The persisted ledger state document

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Schema version written into every persisted ledger document.
pub const SCHEMA_VERSION: u32 = 1;

/// Name given to a freshly created ledger.
pub const DEFAULT_NAME: &str = "My Medication";

/// Container size of a freshly created ledger.
pub const DEFAULT_TOTAL_PILLS: u32 = 30;

/// Daily dose of a freshly created ledger.
pub const DEFAULT_DAILY_DOSE: u32 = 1;

// ============================================================================
// Configuration
// ============================================================================

/// Validated medication settings.
///
/// Built through [`MedicationConfig::new`], which is the input boundary for
/// settings: once a value of this type exists, its fields satisfy the
/// ledger's invariants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationConfig {
    name: String,
    total_pills: u32,
    daily_dose: u32,
    start_date: NaiveDate,
}

impl MedicationConfig {
    /// Validate raw settings input.
    ///
    /// The name is trimmed; an empty or whitespace-only name, a zero
    /// container size or a zero daily dose are rejected.
    pub fn new(
        name: impl Into<String>,
        total_pills: u32,
        daily_dose: u32,
        start_date: NaiveDate,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let config = Self {
            name,
            total_pills,
            daily_dose,
            start_date,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_pills(&self) -> u32 {
        self.total_pills
    }

    pub fn daily_dose(&self) -> u32 {
        self.daily_dose
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("medication name must not be empty".into()));
        }
        if self.total_pills == 0 {
            return Err(Error::Validation("total pills must be at least 1".into()));
        }
        if self.daily_dose == 0 {
            return Err(Error::Validation("daily dose must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Intake history
// ============================================================================

/// Pills taken on one calendar date.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntakeEntry {
    pub date: NaiveDate,
    pub count: u32,
}

// ============================================================================
// Ledger state
// ============================================================================

/// The complete ledger document: configuration, remaining pills and history.
///
/// Fields are private so that the only way to change them is through the
/// operations in [`crate::ledger`], which keep `pills_remaining` within
/// `[0, total_pills]` and the history at one entry per date.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    #[serde(default = "legacy_schema_version")]
    pub(crate) schema_version: u32,

    #[serde(default)]
    pub(crate) revision: u64,

    #[serde(flatten)]
    pub(crate) config: MedicationConfig,

    pub(crate) pills_remaining: u32,

    #[serde(default)]
    pub(crate) intake_history: Vec<IntakeEntry>,
}

// Documents written before versioning carry no schemaVersion field.
fn legacy_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl LedgerState {
    /// Ledger created on first use: default medication, full container.
    pub fn new(today: NaiveDate) -> Self {
        let config = MedicationConfig {
            name: DEFAULT_NAME.into(),
            total_pills: DEFAULT_TOTAL_PILLS,
            daily_dose: DEFAULT_DAILY_DOSE,
            start_date: today,
        };
        Self::with_config(config)
    }

    /// Ledger for the given medication with a full container and no history.
    pub fn with_config(config: MedicationConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision: 0,
            pills_remaining: config.total_pills,
            config,
            intake_history: Vec::new(),
        }
    }

    pub fn config(&self) -> &MedicationConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn total_pills(&self) -> u32 {
        self.config.total_pills()
    }

    pub fn daily_dose(&self) -> u32 {
        self.config.daily_dose()
    }

    pub fn start_date(&self) -> NaiveDate {
        self.config.start_date()
    }

    pub fn pills_remaining(&self) -> u32 {
        self.pills_remaining
    }

    pub fn intake_history(&self) -> &[IntakeEntry] {
        &self.intake_history
    }

    /// Store revision this state was loaded at (0 if never saved).
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Replace the whole document with an imported one, keeping the store
    /// revision so the next save overwrites what is stored.
    pub fn replace_with(&mut self, imported: LedgerState) {
        let revision = self.revision;
        *self = imported;
        self.revision = revision;
        self.schema_version = SCHEMA_VERSION;
    }

    /// Check every invariant of a ledger document.
    ///
    /// Used when a document comes from outside the ledger operations
    /// (persisted files, imports).
    pub fn validate(&self) -> Result<()> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(Error::Validation(format!(
                "unsupported schema version {} (newest known is {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }

        self.config.validate()?;

        if self.pills_remaining > self.config.total_pills {
            return Err(Error::Validation(format!(
                "pills remaining ({}) exceeds total pills ({})",
                self.pills_remaining, self.config.total_pills
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.intake_history {
            if entry.count == 0 {
                return Err(Error::Validation(format!(
                    "intake entry for {} has a zero count",
                    entry.date
                )));
            }
            if !seen.insert(entry.date) {
                return Err(Error::Validation(format!(
                    "duplicate intake entry for {}",
                    entry.date
                )));
            }
        }

        Ok(())
    }
}

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("invalid date '{}': {}", input, e)))
}

/// Today's date on the local calendar.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_ledger() {
        let state = LedgerState::new(date(2024, 3, 1));
        assert_eq!(state.name(), "My Medication");
        assert_eq!(state.total_pills(), 30);
        assert_eq!(state.pills_remaining(), 30);
        assert_eq!(state.daily_dose(), 1);
        assert_eq!(state.start_date(), date(2024, 3, 1));
        assert!(state.intake_history().is_empty());
        assert_eq!(state.schema_version(), SCHEMA_VERSION);
    }

    #[test]
    fn test_config_rejects_bad_input() {
        let start = date(2024, 3, 1);
        assert!(matches!(
            MedicationConfig::new("   ", 30, 1, start),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            MedicationConfig::new("Aspirin", 0, 1, start),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            MedicationConfig::new("Aspirin", 30, 0, start),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_config_trims_name() {
        let config = MedicationConfig::new("  Aspirin ", 30, 1, date(2024, 3, 1)).unwrap();
        assert_eq!(config.name(), "Aspirin");
    }

    #[test]
    fn test_persisted_layout_uses_camel_case() {
        let state = LedgerState::new(date(2024, 3, 1));
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["name"], "My Medication");
        assert_eq!(value["totalPills"], 30);
        assert_eq!(value["pillsRemaining"], 30);
        assert_eq!(value["dailyDose"], 1);
        assert_eq!(value["startDate"], "2024-03-01");
        assert!(value["intakeHistory"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_validate_catches_broken_documents() {
        let json = r#"{
            "name": "Aspirin", "totalPills": 10, "pillsRemaining": 12,
            "dailyDose": 1, "startDate": "2024-03-01", "intakeHistory": []
        }"#;
        let state: LedgerState = serde_json::from_str(json).unwrap();
        assert!(state.validate().is_err());

        let json = r#"{
            "name": "Aspirin", "totalPills": 10, "pillsRemaining": 8,
            "dailyDose": 1, "startDate": "2024-03-01",
            "intakeHistory": [{"date": "2024-03-02", "count": 1},
                              {"date": "2024-03-02", "count": 1}]
        }"#;
        let state: LedgerState = serde_json::from_str(json).unwrap();
        assert!(state.validate().is_err());

        let json = r#"{
            "schemaVersion": 7,
            "name": "Aspirin", "totalPills": 10, "pillsRemaining": 8,
            "dailyDose": 1, "startDate": "2024-03-01", "intakeHistory": []
        }"#;
        let state: LedgerState = serde_json::from_str(json).unwrap();
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-02-29").unwrap(), date(2024, 2, 29));
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("tomorrow").is_err());
    }
}
