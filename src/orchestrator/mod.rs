//! Run lifecycle orchestration.
//!
//! [`RunOrchestrator`] owns the session and drives one run at a time through
//! trigger, status polling and log collection. The poller and the aggregator are
//! its workers; presentation layers only see published snapshots.

mod aggregator;
mod controller;
mod poller;
mod session;

pub use controller::RunOrchestrator;
