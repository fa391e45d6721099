//! Test utilities for pcsc-hotplug
//!
//! Provides in-memory implementations of the collaborator traits and helper
//! functions for testing across crates.
//!
//! Compiled only for tests and with the `test-utils` feature.

use model::{
    BusKind, DescriptorProvider, DeviceEnumerator, EnumerationError, PortId, ProviderError,
    RawDescriptor, RawDevice, ReaderRegistry, RegistryError,
};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a raw descriptor with hex-formatted identity fields
pub fn raw_descriptor(vendor_id: u32, product_id: u32, name: &str, library: &str) -> RawDescriptor {
    RawDescriptor {
        vendor_id: Some(format!("{:#06x}", vendor_id)),
        product_id: Some(format!("{:#06x}", product_id)),
        friendly_name: Some(name.to_string()),
        library_path: library.to_string(),
    }
}

/// Descriptor provider serving a fixed, replaceable list
#[derive(Clone)]
pub struct StaticProvider {
    entries: Arc<Mutex<Result<Vec<RawDescriptor>, String>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn new(entries: Vec<RawDescriptor>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Ok(entries))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the served entries
    pub fn set_entries(&self, entries: Vec<RawDescriptor>) {
        *lock(&self.entries) = Ok(entries);
    }

    /// Make every following listing fail as an unreadable source
    pub fn fail_with(&self, reason: &str) {
        *lock(&self.entries) = Err(reason.to_string());
    }

    /// Number of times the provider was queried
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DescriptorProvider for StaticProvider {
    fn list_descriptors(&self, path: &Path) -> Result<Vec<RawDescriptor>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries)
            .clone()
            .map_err(|reason| ProviderError::Unreadable {
                path: path.display().to_string(),
                reason,
            })
    }
}

#[derive(Default)]
struct MockBusState {
    devices: Vec<RawDevice>,
    failing: bool,
}

/// Shared-state bus enumerator for tests
///
/// Clones share the same device list, so a test keeps one clone to plug and
/// unplug devices while the engine owns another. The enumerator also records
/// how many listings ran concurrently.
#[derive(Clone)]
pub struct MockEnumerator {
    bus: BusKind,
    state: Arc<Mutex<MockBusState>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl MockEnumerator {
    pub fn new(bus: BusKind) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(MockBusState::default())),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep this long inside every listing
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_devices(&self, devices: Vec<RawDevice>) {
        lock(&self.state).devices = devices;
    }

    pub fn plug(&self, device: RawDevice) {
        lock(&self.state).devices.push(device);
    }

    /// Remove every device at `address`
    pub fn unplug(&self, address: u32) {
        lock(&self.state).devices.retain(|d| d.address != address);
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Number of listings performed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of listings observed running at the same time
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn bus(&self) -> BusKind {
        self.bus
    }

    fn list_present_devices(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = {
            let state = lock(&self.state);
            if state.failing {
                Err(EnumerationError::ListFailed {
                    bus: self.bus,
                    reason: "simulated bus failure".to_string(),
                })
            } else {
                Ok(state.devices.clone())
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A notification received by [`RecordingRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Add {
        name: String,
        port: PortId,
        library: String,
    },
    Remove {
        name: String,
        port: PortId,
    },
}

/// Reader registry that records every call
#[derive(Clone, Default)]
pub struct RecordingRegistry {
    calls: Arc<Mutex<Vec<RegistryCall>>>,
    rejected_ports: Arc<Mutex<HashSet<PortId>>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<RegistryCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Reject (but still record) every notification for `port`
    pub fn reject_port(&self, port: PortId) {
        lock(&self.rejected_ports).insert(port);
    }

    /// Readers currently registered, obtained by replaying the accepted calls
    pub fn registered(&self) -> BTreeMap<PortId, String> {
        let rejected = lock(&self.rejected_ports).clone();
        let mut live = BTreeMap::new();
        for call in lock(&self.calls).iter() {
            match call {
                RegistryCall::Add { port, .. } | RegistryCall::Remove { port, .. }
                    if rejected.contains(port) => {}
                RegistryCall::Add { name, port, .. } => {
                    live.insert(*port, name.clone());
                }
                RegistryCall::Remove { port, .. } => {
                    live.remove(port);
                }
            }
        }
        live
    }

    fn is_rejected(&self, port: PortId) -> bool {
        lock(&self.rejected_ports).contains(&port)
    }
}

impl ReaderRegistry for RecordingRegistry {
    fn add_reader(
        &mut self,
        friendly_name: &str,
        port: PortId,
        library_path: &str,
    ) -> Result<(), RegistryError> {
        lock(&self.calls).push(RegistryCall::Add {
            name: friendly_name.to_string(),
            port,
            library: library_path.to_string(),
        });
        if self.is_rejected(port) {
            return Err(RegistryError::Rejected(format!("port {} rejected", port)));
        }
        Ok(())
    }

    fn remove_reader(&mut self, friendly_name: &str, port: PortId) -> Result<(), RegistryError> {
        lock(&self.calls).push(RegistryCall::Remove {
            name: friendly_name.to_string(),
            port,
        });
        if self.is_rejected(port) {
            return Err(RegistryError::Rejected(format!("port {} rejected", port)));
        }
        Ok(())
    }
}

/// Wrap a future with a timeout
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was met.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
