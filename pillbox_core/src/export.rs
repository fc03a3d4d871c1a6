//! CSV export of the intake history and of forecasts.
//!
//! Each export replaces the target file; the data is flushed and synced to
//! disk before returning.

use crate::{ForecastPoint, IntakeEntry, LedgerState, Result};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Serialize)]
struct IntakeRow {
    date: String,
    count: u32,
}

impl From<&IntakeEntry> for IntakeRow {
    fn from(entry: &IntakeEntry) -> Self {
        IntakeRow {
            date: entry.date.to_string(),
            count: entry.count,
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastRow {
    date: String,
    remaining: u32,
}

fn write_rows<R: Serialize>(path: &Path, rows: impl IntoIterator<Item = R>) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(File::create(path)?);

    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    Ok(count)
}

/// Write the intake history as `date,count` rows.
pub fn export_intake_history(ledger: &LedgerState, path: &Path) -> Result<usize> {
    let count = write_rows(path, ledger.intake_history().iter().map(IntakeRow::from))?;
    tracing::info!("Exported {} intake entries to {:?}", count, path);
    Ok(count)
}

/// Write forecast points as `date,remaining` rows.
pub fn export_forecast(
    points: impl IntoIterator<Item = ForecastPoint>,
    path: &Path,
) -> Result<usize> {
    let count = write_rows(
        path,
        points.into_iter().map(|p| ForecastRow {
            date: p.date.to_string(),
            remaining: p.remaining,
        }),
    )?;
    tracing::info!("Exported {} forecast days to {:?}", count, path);
    Ok(count)
}
