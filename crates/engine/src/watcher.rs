//! Hotplug watcher
//!
//! Dedicated thread that owns the [`Scanner`] and runs every rescan serially.
//! Event sources and the embedding application only ever enqueue triggers
//! through the command channel from `common::channel`; rescans never overlap.

use crate::scanner::{ScanOutcome, Scanner};
use crate::snapshot::{DeviceSnapshot, SnapshotReader};
use common::{
    RescanTrigger, TriggerReason, WatcherBridge, WatcherCommand, WatcherEvent, WatcherWorker,
    create_watcher_bridge,
};
use model::{
    DEFAULT_BASE_PORT, DEFAULT_DRIVERS_DIR, DescriptorProvider, DeviceEnumerator, EventSource,
    HotplugSink, ReaderRegistry, WatcherState, WatcherStatus,
};
use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Process-wide watcher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Directory handed to the descriptor provider on every rescan
    pub drivers_dir: PathBuf,
    /// Offset added to a device address to form its reader port
    pub base_port: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            drivers_dir: PathBuf::from(DEFAULT_DRIVERS_DIR),
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

/// Collaborators the watcher takes ownership of
pub struct WatcherParts {
    pub provider: Box<dyn DescriptorProvider>,
    pub enumerators: Vec<Box<dyn DeviceEnumerator>>,
    pub event_sources: Vec<Box<dyn EventSource>>,
    pub registry: Box<dyn ReaderRegistry>,
}

fn lock(status: &Mutex<WatcherStatus>) -> MutexGuard<'_, WatcherStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watcher thread state
pub struct Watcher {
    scanner: Scanner,
    sources: Vec<Box<dyn EventSource>>,
    worker: WatcherWorker,
    trigger: RescanTrigger,
    status: Arc<Mutex<WatcherStatus>>,
}

impl Watcher {
    /// Start the watcher thread
    ///
    /// The startup rescan is queued before the thread runs, so it is always
    /// the first command the watcher handles.
    pub fn spawn(config: WatcherConfig, parts: WatcherParts) -> common::Result<WatcherHandle> {
        let (bridge, worker) = create_watcher_bridge();
        let scanner = Scanner::new(
            &config,
            parts.provider,
            parts.enumerators,
            parts.registry,
        );
        let reader = scanner.reader();
        let status = Arc::new(Mutex::new(WatcherStatus::default()));
        let trigger = bridge.trigger();

        trigger.request(TriggerReason::Startup);

        let watcher = Watcher {
            scanner,
            sources: parts.event_sources,
            worker,
            trigger,
            status: status.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("hotplug-watcher".to_string())
            .spawn(move || watcher.run())?;

        Ok(WatcherHandle {
            bridge,
            reader,
            status,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        info!(
            "Hotplug watcher started ({} event sources)",
            self.sources.len()
        );
        self.subscribe_sources();

        loop {
            match self.worker.recv_command() {
                Ok(WatcherCommand::Rescan { reason }) => self.handle_rescan(reason),
                Ok(WatcherCommand::Status { response }) => {
                    let _ = response.send(lock(&self.status).clone());
                }
                Ok(WatcherCommand::Shutdown) => {
                    info!("Hotplug watcher shutting down");
                    break;
                }
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.worker.close();
        for source in &mut self.sources {
            source.unsubscribe();
        }
        lock(&self.status).state = WatcherState::Stopped;
        self.worker.send_event(WatcherEvent::Stopped);

        info!("Hotplug watcher stopped");
    }

    fn subscribe_sources(&mut self) {
        let sink: Arc<dyn HotplugSink> = Arc::new(self.trigger.clone());

        for source in &mut self.sources {
            let bus = source.bus();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                source.subscribe(sink.clone())
            }));

            match result {
                Ok(Ok(())) => info!("Subscribed to {} hotplug notifications", bus),
                Ok(Err(e)) => warn!("No hotplug notifications for {}: {}", bus, e),
                Err(panic) => error!(
                    "Panic subscribing to {} hotplug notifications: {}",
                    bus,
                    panic_message(panic.as_ref())
                ),
            }
        }
    }

    fn handle_rescan(&mut self, reason: TriggerReason) {
        self.worker.begin_rescan();
        lock(&self.status).state = WatcherState::Scanning;
        debug!("Rescan started ({})", reason);

        // A panicking collaborator must not take the watcher thread down
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.scanner.rescan()
        }));

        match result {
            Ok(Ok(outcome)) => self.scan_completed(outcome),
            Ok(Err(e)) => self.scan_failed(e.to_string()),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Panic during rescan: {}", reason);
                self.scan_failed(format!("rescan panicked: {}", reason));
            }
        }
    }

    fn scan_completed(&mut self, outcome: ScanOutcome) {
        let report = outcome.report;
        {
            let mut status = lock(&self.status);
            status.state = WatcherState::Idle;
            status.scans += 1;
            status.devices = outcome.devices;
        }

        if report.added + report.removed + report.rejected > 0 {
            info!(
                "Rescan complete: {} added, {} removed, {} rejected, {} devices",
                report.added, report.removed, report.rejected, outcome.devices
            );
        } else {
            debug!("Rescan complete: no changes, {} devices", outcome.devices);
        }

        self.worker.send_event(WatcherEvent::ScanCompleted {
            added: report.added,
            removed: report.removed,
            rejected: report.rejected,
            devices: outcome.devices,
        });
    }

    fn scan_failed(&mut self, reason: String) {
        warn!("Rescan failed, keeping previous devices: {}", reason);
        {
            let mut status = lock(&self.status);
            status.state = WatcherState::Failed;
            status.failures += 1;
            status.last_error = Some(reason.clone());
        }

        self.worker.send_event(WatcherEvent::ScanFailed { reason });

        // No retry timer: the next trigger starts over
        lock(&self.status).state = WatcherState::Idle;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Control handle for a running watcher
///
/// Dropping the handle shuts the watcher down and joins its thread.
pub struct WatcherHandle {
    bridge: WatcherBridge,
    reader: SnapshotReader,
    status: Arc<Mutex<WatcherStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Request a rescan; coalesces with one already queued
    pub fn trigger(&self) -> bool {
        self.bridge.trigger().request(TriggerReason::Manual)
    }

    /// Trigger handle for code that should not own the watcher
    pub fn rescan_trigger(&self) -> RescanTrigger {
        self.bridge.trigger()
    }

    /// Async side of the command channel
    pub fn bridge(&self) -> WatcherBridge {
        self.bridge.clone()
    }

    /// The live snapshot
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.reader.current()
    }

    pub fn snapshot_reader(&self) -> SnapshotReader {
        self.reader.clone()
    }

    /// Latest status without waiting for queued work
    pub fn status(&self) -> WatcherStatus {
        lock(&self.status).clone()
    }

    /// Status as seen after every command queued so far has been handled
    ///
    /// Blocks the calling thread; do not call from async code.
    pub fn status_blocking(&self) -> common::Result<WatcherStatus> {
        self.bridge.status_blocking()
    }

    /// Stop the watcher and wait for its thread to exit
    ///
    /// Blocks the calling thread; do not call from async code.
    pub fn shutdown(mut self) -> common::Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> common::Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        // Fails only when the thread is already gone
        if let Err(e) = self.bridge.shutdown_blocking() {
            debug!("Watcher already stopped: {}", e);
        }

        thread
            .join()
            .map_err(|_| common::Error::Watcher("watcher thread panicked".to_string()))
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop watcher: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ManualSource;
    use common::test_utils::{
        DEFAULT_TEST_TIMEOUT, MockEnumerator, RecordingRegistry, StaticProvider, raw_descriptor,
    };
    use model::{BusKind, DeviceEnumerator, RawDevice};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct PanickingEnumerator;

    impl DeviceEnumerator for PanickingEnumerator {
        fn bus(&self) -> BusKind {
            BusKind::Usb
        }

        fn list_present_devices(&self) -> Result<Vec<RawDevice>, model::EnumerationError> {
            panic!("bus driver exploded")
        }
    }

    struct PanickingSource {
        unsubscribed: Arc<AtomicBool>,
    }

    impl EventSource for PanickingSource {
        fn bus(&self) -> BusKind {
            BusKind::Usb
        }

        fn subscribe(
            &mut self,
            _sink: Arc<dyn HotplugSink>,
        ) -> Result<(), model::EventSourceError> {
            panic!("Can't init Global usb context")
        }

        fn unsubscribe(&mut self) {
            self.unsubscribed.store(true, Ordering::SeqCst);
        }
    }

    fn parts(
        enumerators: Vec<Box<dyn DeviceEnumerator>>,
        sources: Vec<Box<dyn EventSource>>,
        registry: &RecordingRegistry,
    ) -> WatcherParts {
        WatcherParts {
            provider: Box::new(StaticProvider::new(vec![raw_descriptor(
                0x04e6, 0x5116, "ReaderX", "/a",
            )])),
            enumerators,
            event_sources: sources,
            registry: Box::new(registry.clone()),
        }
    }

    #[test]
    fn test_startup_rescan_runs_first() {
        let usb = MockEnumerator::new(BusKind::Usb);
        usb.plug(RawDevice::new(0x04e6, 0x5116, 1));
        let registry = RecordingRegistry::new();

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(usb.clone())], vec![], &registry),
        )
        .unwrap();

        let status = handle.status_blocking().unwrap();
        assert_eq!(status.state, WatcherState::Idle);
        assert_eq!(status.scans, 1);
        assert_eq!(status.devices, 1);
        assert_eq!(handle.snapshot().len(), 1);
        assert_eq!(registry.calls().len(), 1);

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_manual_source_triggers_rescan() {
        let usb = MockEnumerator::new(BusKind::Usb);
        let registry = RecordingRegistry::new();
        let source = ManualSource::new(BusKind::Usb);
        let fire = source.handle();

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(usb.clone())], vec![Box::new(source)], &registry),
        )
        .unwrap();
        handle.status_blocking().unwrap();
        assert!(registry.calls().is_empty());

        usb.plug(RawDevice::new(0x04e6, 0x5116, 3));
        assert!(fire.appeared());

        assert!(common::test_utils::wait_until(DEFAULT_TEST_TIMEOUT, || {
            handle.snapshot().len() == 1
        }));
        handle.shutdown().unwrap();
        assert!(!fire.is_subscribed());
    }

    #[test]
    fn test_panicking_source_does_not_stop_watcher() {
        let pccard = MockEnumerator::new(BusKind::PcCard);
        pccard.plug(RawDevice::new(0x04e6, 0x5116, 0));
        let registry = RecordingRegistry::new();
        let unsubscribed = Arc::new(AtomicBool::new(false));
        let source = PanickingSource {
            unsubscribed: unsubscribed.clone(),
        };

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(pccard)], vec![Box::new(source)], &registry),
        )
        .unwrap();

        let status = handle.status_blocking().unwrap();
        assert_eq!(status.scans, 1);
        assert_eq!(handle.snapshot().len(), 1);

        handle.shutdown().unwrap();
        assert!(unsubscribed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_scan_returns_to_idle() {
        let usb = MockEnumerator::new(BusKind::Usb);
        usb.set_failing(true);
        let registry = RecordingRegistry::new();

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(usb.clone())], vec![], &registry),
        )
        .unwrap();

        let status = handle.status_blocking().unwrap();
        assert_eq!(status.state, WatcherState::Idle);
        assert_eq!(status.failures, 1);
        assert!(status.last_error.is_some());

        // Recovers on the next trigger
        usb.set_failing(false);
        handle.trigger();
        let status = handle.status_blocking().unwrap();
        assert_eq!(status.scans, 1);
        assert_eq!(status.failures, 1);
    }

    #[test]
    fn test_panic_during_scan_is_a_failure() {
        let registry = RecordingRegistry::new();

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(PanickingEnumerator)], vec![], &registry),
        )
        .unwrap();

        let status = handle.status_blocking().unwrap();
        assert_eq!(status.failures, 1);
        assert!(
            status
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("bus driver exploded"))
        );
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_events_reported() {
        let usb = MockEnumerator::new(BusKind::Usb);
        usb.plug(RawDevice::new(0x04e6, 0x5116, 1));
        let registry = RecordingRegistry::new();

        let handle = Watcher::spawn(
            WatcherConfig::default(),
            parts(vec![Box::new(usb)], vec![], &registry),
        )
        .unwrap();
        let bridge = handle.bridge();
        handle.shutdown().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(
                bridge.recv_event().await.unwrap(),
                WatcherEvent::ScanCompleted {
                    added: 1,
                    removed: 0,
                    rejected: 0,
                    devices: 1,
                }
            );
            assert_eq!(bridge.recv_event().await.unwrap(), WatcherEvent::Stopped);
        });
    }

    #[test]
    fn test_shutdown_marks_stopped_and_refuses_triggers() {
        let registry = RecordingRegistry::new();
        let handle = Watcher::spawn(WatcherConfig::default(), parts(vec![], vec![], &registry))
            .unwrap();
        let trigger = handle.rescan_trigger();
        let status = handle.status.clone();

        handle.shutdown().unwrap();

        assert_eq!(lock(&status).state, WatcherState::Stopped);
        assert!(!trigger.request(TriggerReason::Manual));
    }
}
