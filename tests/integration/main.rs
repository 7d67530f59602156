//! End-to-end tests over the real SQLite store, price feed and scheduler.

mod lifecycle;
mod scripted_source;
