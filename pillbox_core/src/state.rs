//! Ledger persistence with file locking.
//!
//! The ledger is stored as a single JSON document. Saving is a
//! compare-and-swap on the document's revision so that two processes
//! racing on the same file cannot silently overwrite each other.

use crate::{Error, LedgerState, Result};
use chrono::NaiveDate;
use fs2::FileExt;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Load/save interface for the ledger document.
pub trait StateStore {
    /// Load the stored ledger, or `None` if nothing has been stored yet.
    fn load(&self) -> Result<Option<LedgerState>>;

    /// Store `state`, bumping its revision.
    ///
    /// Fails with [`Error::Conflict`] if the stored revision is not the one
    /// `state` was loaded at.
    fn save(&mut self, state: &mut LedgerState) -> Result<()>;

    /// Load the stored ledger or create a default one for `today`.
    fn load_or_init(&self, today: NaiveDate) -> Result<LedgerState> {
        Ok(self.load()?.unwrap_or_else(|| LedgerState::new(today)))
    }
}

/// Parse a ledger document, accepting the legacy browser-storage envelope.
///
/// Both a bare state object and `{ "state": {...}, "version": n }` are
/// accepted. The result is validated.
pub fn parse_ledger(contents: &str) -> Result<LedgerState> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Bare(LedgerState),
        Envelope { state: LedgerState },
    }

    let mut state = match serde_json::from_str::<Document>(contents) {
        Ok(Document::Bare(state)) | Ok(Document::Envelope { state }) => state,
        Err(_) => {
            // Re-parse as a bare document to surface a useful error
            serde_json::from_str::<LedgerState>(contents)?
        }
    };

    state.validate()?;
    state.schema_version = crate::SCHEMA_VERSION;
    Ok(state)
}

// ============================================================================
// JSON file store
// ============================================================================

// Quarantined copies kept beside the ledger before giving up.
const MAX_QUARANTINED: u32 = 1000;

/// Ledger stored in one JSON file, replaced atomically on save.
pub struct JsonFileStore {
    path: PathBuf,
}

#[derive(Deserialize)]
struct RevisionHeader {
    #[serde(default)]
    revision: u64,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file that serializes writers.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Move the current file aside as `<file>.corrupt`, or
    /// `<file>.corrupt.<n>` if earlier quarantined files exist.
    ///
    /// Used when a document cannot be loaded so a fresh ledger can be
    /// started without destroying the broken one. Earlier quarantined
    /// files are never replaced.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let target = self.quarantine_target()?;

        std::fs::rename(&self.path, &target)
            .map_err(|e| Error::persistence(&self.path, e))?;
        tracing::warn!("Moved unreadable ledger {:?} to {:?}", self.path, target);
        Ok(target)
    }

    fn quarantine_target(&self) -> Result<PathBuf> {
        let mut base = self.path.as_os_str().to_owned();
        base.push(".corrupt");

        let first = PathBuf::from(&base);
        if !first.exists() {
            return Ok(first);
        }

        for n in 1..=MAX_QUARANTINED {
            let mut name = base.clone();
            name.push(format!(".{}", n));
            let candidate = PathBuf::from(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(Error::persistence(
            &self.path,
            format!("{} quarantined ledgers already exist", MAX_QUARANTINED + 1),
        ))
    }

    fn read_locked(&self) -> std::io::Result<String> {
        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let result = std::io::BufReader::new(&file).read_to_string(&mut contents);
        let _ = file.unlock();
        result.map(|_| contents)
    }

    fn stored_revision(&self) -> Result<u64> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };

        serde_json::from_str::<RevisionHeader>(&contents)
            .map(|header| header.revision)
            .map_err(|e| Error::persistence(&self.path, e))
    }

    fn write_atomic(&self, state: &LedgerState) -> std::result::Result<(), String> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| "ledger path has no parent directory".to_string())?;

        let temp = NamedTempFile::new_in(parent).map_err(|e| e.to_string())?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
            writer
                .write_all(contents.as_bytes())
                .map_err(|e| e.to_string())?;
            writer.flush().map_err(|e| e.to_string())?;
        }
        temp.as_file().sync_all().map_err(|e| e.to_string())?;

        temp.persist(&self.path).map_err(|e| e.error.to_string())?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerState>> {
        if !self.path.exists() {
            tracing::info!("No ledger file at {:?}", self.path);
            return Ok(None);
        }

        let contents = self
            .read_locked()
            .map_err(|e| Error::persistence(&self.path, e))?;

        let state = parse_ledger(&contents).map_err(|e| Error::persistence(&self.path, e))?;
        tracing::debug!(
            "Loaded ledger from {:?} at revision {}",
            self.path,
            state.revision
        );
        Ok(Some(state))
    }

    fn save(&mut self, state: &mut LedgerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }

        let lock_path = self.lock_path();
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::persistence(&lock_path, e))?;
        lock.lock_exclusive()
            .map_err(|e| Error::persistence(&lock_path, e))?;

        let found = self.stored_revision()?;
        if found != state.revision {
            let _ = lock.unlock();
            return Err(Error::Conflict {
                expected: state.revision,
                found,
            });
        }

        let mut next = state.clone();
        next.revision = found + 1;
        next.schema_version = crate::SCHEMA_VERSION;

        let written = self.write_atomic(&next);
        let _ = lock.unlock();
        written.map_err(|reason| Error::persistence(&self.path, reason))?;

        *state = next;
        tracing::debug!(
            "Saved ledger to {:?} at revision {}",
            self.path,
            state.revision
        );
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store that keeps the ledger in memory, with the same revision rules as
/// [`JsonFileStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    stored: Option<LedgerState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerState>> {
        Ok(self.stored.clone())
    }

    fn save(&mut self, state: &mut LedgerState) -> Result<()> {
        let found = self.stored.as_ref().map_or(0, |s| s.revision);
        if found != state.revision {
            return Err(Error::Conflict {
                expected: state.revision,
                found,
            });
        }
        state.revision = found + 1;
        self.stored = Some(state.clone());
        Ok(())
    }
}
