pub mod registry;
pub mod scheduler;
pub mod worker;

pub use worker::{CollectOptions, Outcome, RunSummary, StationReport};
