//! Ledger operations: settings, intake, refill and derived figures.
//!
//! All operations are synchronous and take the current date from the
//! caller; nothing here reads the clock or touches storage.

use crate::{Error, IntakeEntry, LedgerState, MedicationConfig, Result};
use chrono::NaiveDate;

/// Aggregate figures over the recorded intake history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntakeStats {
    /// Total pills recorded across all entries
    pub total: u64,
    /// Number of distinct days with a recorded intake
    pub days: usize,
    /// Average pills per recorded day (0 when nothing is recorded)
    pub average: f64,
}

impl LedgerState {
    /// Replace the medication settings.
    ///
    /// Changing the container size assumes a fresh container: the remaining
    /// count is reset to the new total rather than scaled. Any other change
    /// leaves the remaining count alone.
    pub fn update_settings(&mut self, config: MedicationConfig) {
        let capacity_changed = config.total_pills() != self.config.total_pills();
        self.config = config;

        if capacity_changed {
            self.pills_remaining = self.config.total_pills();
            tracing::debug!(
                "Container size changed, remaining reset to {}",
                self.pills_remaining
            );
        }
    }

    /// Record `count` pills taken on `today`.
    ///
    /// Fails without touching the ledger if `count` is zero or larger than
    /// the remaining inventory. Intakes on a date that already has an entry
    /// are added to that entry in place.
    pub fn record_intake(&mut self, count: u32, today: NaiveDate) -> Result<()> {
        if count == 0 {
            return Err(Error::Validation("intake count must be at least 1".into()));
        }
        if count > self.pills_remaining {
            return Err(Error::InsufficientInventory {
                requested: count,
                remaining: self.pills_remaining,
            });
        }

        match self.intake_history.iter_mut().find(|e| e.date == today) {
            Some(entry) => {
                entry.count = entry.count.checked_add(count).ok_or_else(|| {
                    Error::Validation(format!("intake count for {} is out of range", today))
                })?;
            }
            None => self.intake_history.push(IntakeEntry { date: today, count }),
        }

        self.pills_remaining -= count;

        tracing::debug!(
            "Recorded intake of {} on {}, {} remaining",
            count,
            today,
            self.pills_remaining
        );
        Ok(())
    }

    /// Refill: full container, empty history.
    pub fn reset_medicine(&mut self) {
        self.pills_remaining = self.config.total_pills();
        self.intake_history.clear();
        tracing::debug!("Medicine reset to {} pills", self.pills_remaining);
    }

    /// Whole days of supply left at the configured dose.
    pub fn days_remaining(&self) -> u32 {
        // daily_dose >= 1 is guaranteed by MedicationConfig
        self.pills_remaining / self.config.daily_dose().max(1)
    }

    /// Date on which the supply runs out, counting from `reference`.
    pub fn run_out_date(&self, reference: NaiveDate) -> NaiveDate {
        reference
            .checked_add_days(chrono::Days::new(u64::from(self.days_remaining())))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Remaining pills as a percentage of a full container.
    pub fn percent_remaining(&self) -> f64 {
        f64::from(self.pills_remaining) / f64::from(self.config.total_pills().max(1)) * 100.0
    }

    pub fn intake_stats(&self) -> IntakeStats {
        let total: u64 = self
            .intake_history
            .iter()
            .map(|e| u64::from(e.count))
            .sum();
        let days = self.intake_history.len();
        let average = if days == 0 {
            0.0
        } else {
            total as f64 / days as f64
        };

        IntakeStats {
            total,
            days,
            average,
        }
    }
}
