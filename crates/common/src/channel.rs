//! Async channel bridge between Tokio runtime and the watcher thread
//!
//! The watcher runs every rescan on one blocking thread. Event sources and
//! the async side reach it only through the command channel created here,
//! which is what keeps rescans strictly serial.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use model::{BusKind, HotplugSink, WatcherStatus};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Why a rescan was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Synthetic rescan performed once at startup
    Startup,
    /// A device appeared on the given bus
    Appeared(BusKind),
    /// A device disappeared from the given bus
    Disappeared(BusKind),
    /// Explicit request from the embedding application
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Startup => write!(f, "startup"),
            TriggerReason::Appeared(bus) => write!(f, "{} device appeared", bus),
            TriggerReason::Disappeared(bus) => write!(f, "{} device disappeared", bus),
            TriggerReason::Manual => write!(f, "manual request"),
        }
    }
}

/// Commands from the runtime (or event sources) to the watcher thread
#[derive(Debug)]
pub enum WatcherCommand {
    /// Run a full rescan
    Rescan {
        /// What caused the request (logged only, never inspected)
        reason: TriggerReason,
    },

    /// Report the current watcher status
    Status {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<WatcherStatus>,
    },

    /// Stop accepting triggers and exit once the current scan is done
    Shutdown,
}

/// Events from the watcher thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A rescan completed and the snapshot was replaced
    ScanCompleted {
        /// Readers added during this rescan
        added: usize,
        /// Readers removed during this rescan
        removed: usize,
        /// Notifications the registry rejected
        rejected: usize,
        /// Devices in the new snapshot
        devices: usize,
    },

    /// A rescan was aborted; the previous snapshot is kept
    ScanFailed {
        reason: String,
    },

    /// The watcher thread exited
    Stopped,
}

/// Coalescing rescan trigger handed to event sources
///
/// At most one rescan request is queued at any time. Triggers that arrive
/// while a request is already queued fold into it; the watcher clears the
/// pending flag when it starts the queued scan, so a trigger during a scan
/// always yields exactly one follow-up scan.
#[derive(Clone)]
pub struct RescanTrigger {
    cmd_tx: Sender<WatcherCommand>,
    pending: Arc<AtomicBool>,
}

impl RescanTrigger {
    /// Request a rescan
    ///
    /// Returns `true` if a new rescan was queued, `false` if the request was
    /// coalesced into one already pending or the watcher has stopped.
    pub fn request(&self, reason: TriggerReason) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            trace!("Rescan already pending, coalescing trigger ({})", reason);
            return false;
        }

        match self.cmd_tx.try_send(WatcherCommand::Rescan { reason }) {
            Ok(()) => {
                debug!("Rescan queued ({})", reason);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.pending.store(false, Ordering::Release);
                warn!("Watcher command queue full, dropping trigger ({})", reason);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.store(false, Ordering::Release);
                debug!("Watcher stopped, ignoring trigger ({})", reason);
                false
            }
        }
    }

    /// Whether a rescan request is queued and not yet started
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl HotplugSink for RescanTrigger {
    fn device_appeared(&self, bus: BusKind) {
        self.request(TriggerReason::Appeared(bus));
    }

    fn device_disappeared(&self, bus: BusKind) {
        self.request(TriggerReason::Disappeared(bus));
    }
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct WatcherBridge {
    cmd_tx: Sender<WatcherCommand>,
    event_rx: Receiver<WatcherEvent>,
    trigger: RescanTrigger,
}

impl WatcherBridge {
    /// Send a command to the watcher thread
    pub async fn send_command(&self, cmd: WatcherCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the watcher thread
    pub async fn recv_event(&self) -> crate::Result<WatcherEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Query the watcher status
    ///
    /// The reply is produced after every command queued before this one,
    /// including pending rescans.
    pub async fn status(&self) -> crate::Result<WatcherStatus> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send_command(WatcherCommand::Status { response: tx })
            .await?;
        rx.await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Query the watcher status from a non-async thread
    pub fn status_blocking(&self) -> crate::Result<WatcherStatus> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.cmd_tx
            .send_blocking(WatcherCommand::Status { response: tx })
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        rx.blocking_recv()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the watcher thread to stop
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(WatcherCommand::Shutdown).await
    }

    /// Ask the watcher thread to stop from a non-async thread
    pub fn shutdown_blocking(&self) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(WatcherCommand::Shutdown)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Coalescing trigger sharing this bridge's command queue
    pub fn trigger(&self) -> RescanTrigger {
        self.trigger.clone()
    }
}

/// Handle for the watcher thread (blocking)
pub struct WatcherWorker {
    cmd_rx: Receiver<WatcherCommand>,
    event_tx: Sender<WatcherEvent>,
    pending: Arc<AtomicBool>,
}

impl WatcherWorker {
    /// Receive a command from the runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<WatcherCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<WatcherCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Mark the queued rescan as started so new triggers queue a follow-up
    pub fn begin_rescan(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Publish an event without blocking
    ///
    /// Events are informational; if no consumer keeps up they are dropped.
    pub fn send_event(&self, event: WatcherEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Refuse any further commands; queued ones can still be drained
    pub fn close(&self) {
        self.cmd_rx.close();
    }
}

/// Create the channel bridge between Tokio and the watcher thread
///
/// Returns (WatcherBridge for Tokio, WatcherWorker for the watcher thread)
pub fn create_watcher_bridge() -> (WatcherBridge, WatcherWorker) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_CAPACITY);
    let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
    let pending = Arc::new(AtomicBool::new(false));

    let trigger = RescanTrigger {
        cmd_tx: cmd_tx.clone(),
        pending: pending.clone(),
    };

    (
        WatcherBridge {
            cmd_tx,
            event_rx,
            trigger,
        },
        WatcherWorker {
            cmd_rx,
            event_tx,
            pending,
        },
    )
}
