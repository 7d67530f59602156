//! Core engine: predict → store → resolve, one round at a time.

pub mod events;
pub mod ledger;
pub mod predictor;
pub mod scheduler;

pub use events::{BroadcastSink, EventSink, RoundEvent};
pub use ledger::{ReputationLedger, Standing};
pub use predictor::PredictionEngine;
pub use scheduler::{round_for, RoundScheduler, RoundWindow, SchedulerSettings, TickReport};
