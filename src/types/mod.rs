//! Public types exposed by the `docbatch` crate.

pub mod options;
pub mod progress;
pub mod record;

pub use options::{EngineOptions, EngineOptionsBuilder, SlowdownDrill, SyncPolicy};
pub use progress::{BatchStats, ProgressReport, Rates, Totals, format_hms};
pub use record::{BatchMark, DocumentRecord, IdKey, InputDocument};
