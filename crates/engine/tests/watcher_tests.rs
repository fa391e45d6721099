//! Integration tests for the hotplug watcher
//!
//! - Overlapping triggers from many threads never run scans concurrently
//! - The final snapshot matches the devices present at the end
//! - No reader is registered twice
//! - Async status and events through the bridge
//! - Hosts without a usable libusb still get their startup rescan

use common::WatcherEvent;
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockEnumerator, RecordingRegistry, RegistryCall, StaticProvider,
    raw_descriptor, with_timeout,
};
use engine::events::{ManualSource, UsbHotplugSource};
use engine::{Watcher, WatcherConfig, WatcherParts};
use model::{BusKind, PortId, RawDevice, WatcherState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const READERS: u32 = 8;

fn provider() -> StaticProvider {
    StaticProvider::new(
        (0..READERS)
            .map(|i| raw_descriptor(0x04e6, 0x5100 + i, &format!("Reader {}", i), "/lib"))
            .collect(),
    )
}

#[test]
fn overlapping_triggers_serialize_scans() {
    let usb = MockEnumerator::new(BusKind::Usb).with_delay(Duration::from_millis(5));
    let registry = RecordingRegistry::new();
    let source = ManualSource::new(BusKind::Usb);
    let fire = source.handle();

    let handle = Watcher::spawn(
        WatcherConfig::default(),
        WatcherParts {
            provider: Box::new(provider()),
            enumerators: vec![Box::new(usb.clone())],
            event_sources: vec![Box::new(source)],
            registry: Box::new(registry.clone()),
        },
    )
    .unwrap();
    handle.status_blocking().unwrap();

    let handle = Arc::new(handle);
    let threads: Vec<_> = (0..READERS)
        .map(|i| {
            let usb = usb.clone();
            let fire = fire.clone();
            let handle = handle.clone();
            std::thread::spawn(move || {
                for round in 0..10 {
                    usb.plug(RawDevice::new(0x04e6, 0x5100 + i, i + 1));
                    fire.appeared();
                    if round % 3 == 0 {
                        handle.trigger();
                    }
                    // Odd readers end up unplugged
                    if i % 2 == 1 {
                        usb.unplug(i + 1);
                        fire.disappeared();
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // One last scan that starts after every plug/unplug is done
    handle.trigger();
    let status = handle.status_blocking().unwrap();

    assert_eq!(usb.max_concurrent(), 1);
    assert_eq!(status.state, WatcherState::Idle);
    assert_eq!(status.failures, 0);

    let expected: HashSet<u32> = (0..READERS).filter(|i| i % 2 == 0).map(|i| i + 1).collect();
    let snapshot = handle.snapshot();
    let present: HashSet<u32> = snapshot.iter().map(|r| r.address).collect();
    assert_eq!(present, expected);

    // Replaying the calls never sees a double add or a remove of an absent reader
    let mut live = HashSet::new();
    for call in registry.calls() {
        match call {
            RegistryCall::Add { port, .. } => assert!(live.insert(port), "double add on {}", port),
            RegistryCall::Remove { port, .. } => assert!(live.remove(&port), "stray remove on {}", port),
        }
    }
    let expected_ports: HashSet<PortId> = expected
        .iter()
        .map(|address| PortId::from_address(0x200000, *address))
        .collect();
    assert_eq!(live, expected_ports);

    match Arc::try_unwrap(handle) {
        Ok(handle) => handle.shutdown().unwrap(),
        Err(_) => panic!("watcher handle still shared"),
    }
}

#[test]
fn bursts_coalesce_into_few_scans() {
    let usb = MockEnumerator::new(BusKind::Usb).with_delay(Duration::from_millis(20));
    let registry = RecordingRegistry::new();

    let handle = Watcher::spawn(
        WatcherConfig::default(),
        WatcherParts {
            provider: Box::new(provider()),
            enumerators: vec![Box::new(usb.clone())],
            event_sources: vec![],
            registry: Box::new(registry),
        },
    )
    .unwrap();

    for _ in 0..100 {
        handle.trigger();
    }
    let status = handle.status_blocking().unwrap();

    // Startup plus at most one follow-up per in-flight scan
    assert!(status.scans >= 1);
    assert!(status.scans <= 3, "ran {} scans", status.scans);
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn async_bridge_reports_status_and_events() {
    let usb = MockEnumerator::new(BusKind::Usb);
    usb.plug(RawDevice::new(0x04e6, 0x5100, 1));
    let registry = RecordingRegistry::new();

    let handle = Watcher::spawn(
        WatcherConfig::default(),
        WatcherParts {
            provider: Box::new(provider()),
            enumerators: vec![Box::new(usb.clone())],
            event_sources: vec![],
            registry: Box::new(registry),
        },
    )
    .unwrap();
    let bridge = handle.bridge();

    let status = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.status())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.devices, 1);

    let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, WatcherEvent::ScanCompleted { added: 1, .. }));

    usb.set_failing(true);
    bridge.trigger().request(common::TriggerReason::Manual);
    let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, WatcherEvent::ScanFailed { .. }));

    bridge.shutdown().await.unwrap();
    let event = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, WatcherEvent::Stopped);

    // The thread is already gone; joining it must not block the runtime long
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn startup_rescan_runs_with_usb_notifications_unavailable() {
    let pccard = MockEnumerator::new(BusKind::PcCard);
    pccard.plug(RawDevice::new(0x04e6, 0x5100, 0));
    let registry = RecordingRegistry::new();

    let handle = Watcher::spawn(
        WatcherConfig::default(),
        WatcherParts {
            provider: Box::new(provider()),
            enumerators: vec![Box::new(pccard)],
            event_sources: vec![Box::new(UsbHotplugSource::new())],
            registry: Box::new(registry.clone()),
        },
    )
    .unwrap();

    // Whether or not libusb starts here, the watcher must answer
    let status = handle.status_blocking().unwrap();
    assert_eq!(status.scans, 1);
    assert_eq!(status.devices, 1);
    assert_eq!(registry.registered().len(), 1);

    handle.shutdown().unwrap();
}
