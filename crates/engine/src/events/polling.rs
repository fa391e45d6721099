//! Polling event source for buses without a notification API
//!
//! A `<bus>-poll` thread lists the bus every interval and reports an attach
//! or detach whenever the set of present devices changes.

use model::{BusKind, DeviceEnumerator, EventSource, EventSourceError, HotplugSink, RawDevice};
use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

type SharedEnumerator = Arc<Mutex<Box<dyn DeviceEnumerator>>>;

struct Poller {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Fingerprints an enumerator's device list on a fixed interval
pub struct PollingSource {
    bus: BusKind,
    interval: Duration,
    enumerator: SharedEnumerator,
    poller: Option<Poller>,
}

impl PollingSource {
    pub fn new(enumerator: Box<dyn DeviceEnumerator>, interval: Duration) -> Self {
        Self {
            bus: enumerator.bus(),
            interval,
            enumerator: Arc::new(Mutex::new(enumerator)),
            poller: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

fn list(enumerator: &SharedEnumerator) -> Option<HashSet<RawDevice>> {
    let enumerator = enumerator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match enumerator.list_present_devices() {
        Ok(devices) => Some(devices.into_iter().collect()),
        Err(e) => {
            warn!("Polling {} devices failed: {}", enumerator.bus(), e);
            None
        }
    }
}

fn poll_loop(
    bus: BusKind,
    interval: Duration,
    enumerator: SharedEnumerator,
    sink: Arc<dyn HotplugSink>,
    stop_rx: mpsc::Receiver<()>,
) {
    debug!("{} poller started ({:?} interval)", bus, interval);
    let mut known = list(&enumerator).unwrap_or_default();

    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        // Failed polls leave the last known set in place
        let Some(present) = list(&enumerator) else {
            continue;
        };

        let appeared = present.difference(&known).count();
        let disappeared = known.difference(&present).count();
        trace!(
            "{} poll: {} present, {} appeared, {} disappeared",
            bus,
            present.len(),
            appeared,
            disappeared
        );

        if appeared > 0 {
            sink.device_appeared(bus);
        }
        if disappeared > 0 {
            sink.device_disappeared(bus);
        }
        known = present;
    }

    debug!("{} poller stopped", bus);
}

impl EventSource for PollingSource {
    fn bus(&self) -> BusKind {
        self.bus
    }

    fn subscribe(&mut self, sink: Arc<dyn HotplugSink>) -> Result<(), EventSourceError> {
        if self.poller.is_some() {
            return Err(EventSourceError::AlreadySubscribed(self.bus));
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let bus = self.bus;
        let interval = self.interval;
        let enumerator = self.enumerator.clone();

        let thread = std::thread::Builder::new()
            .name(format!("{}-poll", bus.to_string().to_lowercase()))
            .spawn(move || poll_loop(bus, interval, enumerator, sink, stop_rx))
            .map_err(|e| EventSourceError::Subscribe {
                bus,
                reason: e.to_string(),
            })?;

        self.poller = Some(Poller { stop_tx, thread });
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(poller) = self.poller.take() {
            let _ = poller.stop_tx.send(());
            if poller.thread.join().is_err() {
                warn!("{} poller panicked", self.bus);
            }
        }
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::CountingSink;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockEnumerator, wait_until};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_poller_reports_changes() {
        let bus = MockEnumerator::new(BusKind::PcCard);
        let mut source = PollingSource::new(Box::new(bus.clone()), Duration::from_millis(10));
        let sink = Arc::new(CountingSink::default());

        source.subscribe(sink.clone()).unwrap();
        assert!(matches!(
            source.subscribe(sink.clone()),
            Err(EventSourceError::AlreadySubscribed(BusKind::PcCard))
        ));

        // Baseline listing must run before the device shows up
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || bus.calls() >= 1));
        bus.plug(RawDevice::new(0x0104, 0x0001, 0));
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            sink.appeared.load(Ordering::SeqCst) == 1
        }));

        bus.unplug(0);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            sink.disappeared.load(Ordering::SeqCst) == 1
        }));

        source.unsubscribe();
        source.unsubscribe();
    }

    #[test]
    fn test_poll_failure_is_ignored() {
        let bus = MockEnumerator::new(BusKind::PcCard);
        bus.plug(RawDevice::new(0x0104, 0x0001, 0));
        let mut source = PollingSource::new(Box::new(bus.clone()), Duration::from_millis(10));
        let sink = Arc::new(CountingSink::default());

        source.subscribe(sink.clone()).unwrap();
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || bus.calls() >= 1));

        bus.set_failing(true);
        let failing_from = bus.calls();
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || bus.calls() >= failing_from + 3));
        source.unsubscribe();

        assert_eq!(sink.appeared.load(Ordering::SeqCst), 0);
        assert_eq!(sink.disappeared.load(Ordering::SeqCst), 0);
    }
}
