#![forbid(unsafe_code)]

//! Core domain model and business logic for the Pillbox medication tracker.
//!
//! This crate provides:
//! - Domain types (medication settings, intake history, ledger state)
//! - Ledger operations (settings, intake, refill)
//! - Forecasting and refill policies
//! - Persistence (locked JSON store, remote mirror, CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod ledger;
pub mod forecast;
pub mod state;
pub mod mirror;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use ledger::IntakeStats;
pub use forecast::{Forecast, ForecastPoint, RefillPolicy, SupplyOutlook};
pub use state::{parse_ledger, JsonFileStore, MemoryStore, StateStore};
pub use mirror::{check_connectivity, push_ledger, JsonlMirror, RemoteMirror};
