//! Hotplug event sources
//!
//! Sources only enqueue rescan triggers through the sink they were given;
//! they never run the pipeline themselves.

mod polling;
mod usb;

pub use polling::PollingSource;
pub use usb::UsbHotplugSource;

use model::{BusKind, EventSource, EventSourceError, HotplugSink};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedSink = Arc<Mutex<Option<Arc<dyn HotplugSink>>>>;

fn lock(sink: &SharedSink) -> MutexGuard<'_, Option<Arc<dyn HotplugSink>>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event source fired by hand through a [`ManualSourceHandle`]
///
/// Lets an embedding application (or a test) feed attach/detach
/// notifications from its own platform hooks.
pub struct ManualSource {
    bus: BusKind,
    sink: SharedSink,
}

impl ManualSource {
    pub fn new(bus: BusKind) -> Self {
        Self {
            bus,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> ManualSourceHandle {
        ManualSourceHandle {
            bus: self.bus,
            sink: self.sink.clone(),
        }
    }
}

impl EventSource for ManualSource {
    fn bus(&self) -> BusKind {
        self.bus
    }

    fn subscribe(&mut self, sink: Arc<dyn HotplugSink>) -> Result<(), EventSourceError> {
        let mut slot = lock(&self.sink);
        if slot.is_some() {
            return Err(EventSourceError::AlreadySubscribed(self.bus));
        }
        *slot = Some(sink);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        lock(&self.sink).take();
    }
}

/// Fires notifications into a [`ManualSource`]
#[derive(Clone)]
pub struct ManualSourceHandle {
    bus: BusKind,
    sink: SharedSink,
}

impl ManualSourceHandle {
    /// Report an attach; returns `false` when nobody is subscribed
    pub fn appeared(&self) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => {
                sink.device_appeared(self.bus);
                true
            }
            None => false,
        }
    }

    /// Report a detach; returns `false` when nobody is subscribed
    pub fn disappeared(&self) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => {
                sink.device_disappeared(self.bus);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.sink).is_some()
    }
}
