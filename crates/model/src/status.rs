//! Watcher lifecycle state and status reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the hotplug watcher
///
/// `Idle -> Scanning -> Idle` is the normal cycle. A catalog or matcher error
/// goes `Scanning -> Failed -> Idle` with the snapshot untouched. `Stopped`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    #[default]
    Idle,
    Scanning,
    Failed,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Idle => "idle",
            WatcherState::Scanning => "scanning",
            WatcherState::Failed => "failed",
            WatcherState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Point-in-time summary of the watcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub state: WatcherState,
    /// Rescans completed successfully
    pub scans: u64,
    /// Rescans aborted by a catalog or matcher error
    pub failures: u64,
    /// Devices in the current snapshot
    pub devices: usize,
    /// Reason of the most recent failed rescan
    pub last_error: Option<String>,
}
