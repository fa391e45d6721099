//! Common utilities for pcsc-hotplug
//!
//! This crate provides shared functionality between the hotplug engine and
//! the daemon: error handling, logging setup, the channel bridge between the
//! Tokio runtime and the blocking watcher thread, and (with the `test-utils`
//! feature) test doubles for the collaborator traits.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{
    RescanTrigger, TriggerReason, WatcherBridge, WatcherCommand, WatcherEvent, WatcherWorker,
    create_watcher_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
