//! USB hotplug notifications through libusb
//!
//! Registration happens on a dedicated `usb-events` thread, which then pumps
//! `handle_events` so libusb can invoke the callback.

use model::{BusKind, EventSource, EventSourceError, HotplugSink};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Forwards libusb arrivals and departures to the sink without payload
struct HotplugForwarder {
    sink: Arc<dyn HotplugSink>,
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.sink.device_appeared(BusKind::Usb);
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.sink.device_disappeared(BusKind::Usb);
    }
}

struct EventThread {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// USB attach/detach notifications
#[derive(Default)]
pub struct UsbHotplugSource {
    events: Option<EventThread>,
}

impl UsbHotplugSource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn event_loop(
    sink: Arc<dyn HotplugSink>,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), EventSourceError>>,
) {
    // libusb failing to start means no USB notifications on this host
    let context = match Context::new() {
        Ok(context) => context,
        Err(e) => {
            debug!("Failed to create USB context: {}", e);
            let _ = ready.send(Err(EventSourceError::Unsupported(BusKind::Usb)));
            return;
        }
    };

    let registration: Registration<Context> = match HotplugBuilder::new()
        .enumerate(false)
        .register(&context, Box::new(HotplugForwarder { sink }))
    {
        Ok(registration) => registration,
        Err(rusb::Error::NotSupported) => {
            let _ = ready.send(Err(EventSourceError::Unsupported(BusKind::Usb)));
            return;
        }
        Err(e) => {
            let _ = ready.send(Err(EventSourceError::Subscribe {
                bus: BusKind::Usb,
                reason: format!("hotplug registration failed: {}", e),
            }));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while running.load(Ordering::Acquire) {
        match context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_TIMEOUT);
            }
        }
    }

    drop(registration);
    debug!("USB event thread stopped");
}

impl EventSource for UsbHotplugSource {
    fn bus(&self) -> BusKind {
        BusKind::Usb
    }

    fn subscribe(&mut self, sink: Arc<dyn HotplugSink>) -> Result<(), EventSourceError> {
        if self.events.is_some() {
            return Err(EventSourceError::AlreadySubscribed(BusKind::Usb));
        }

        let subscribe_error = |reason: String| EventSourceError::Subscribe {
            bus: BusKind::Usb,
            reason,
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_running = running.clone();

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || event_loop(sink, thread_running, ready_tx))
            .map_err(|e| subscribe_error(e.to_string()))?;

        let registered = ready_rx.recv().unwrap_or_else(|_| {
            Err(subscribe_error(
                "USB event thread exited during registration".to_string(),
            ))
        });

        match registered {
            Ok(()) => {
                info!("USB hot-plug callbacks registered");
                self.events = Some(EventThread { running, thread });
                Ok(())
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(events) = self.events.take() {
            events.running.store(false, Ordering::Release);
            if events.thread.join().is_err() {
                warn!("USB event thread panicked");
            }
        }
    }
}

impl Drop for UsbHotplugSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::CountingSink;

    #[test]
    fn test_subscribe_without_usb_access() {
        let mut source = UsbHotplugSource::new();
        let sink = Arc::new(CountingSink::default());

        // Hosts without libusb hotplug or USB permissions refuse the
        // subscription; either way unsubscribe must be safe to repeat
        match source.subscribe(sink.clone()) {
            Ok(()) => {
                assert!(matches!(
                    source.subscribe(sink),
                    Err(EventSourceError::AlreadySubscribed(BusKind::Usb))
                ));
            }
            Err(e) => {
                assert!(matches!(
                    e,
                    EventSourceError::Unsupported(BusKind::Usb)
                        | EventSourceError::Subscribe { bus: BusKind::Usb, .. }
                ));
                assert!(source.events.is_none());
            }
        }

        source.unsubscribe();
        source.unsubscribe();
    }
}
