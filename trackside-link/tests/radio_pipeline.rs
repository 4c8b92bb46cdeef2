// End-to-end radio path: mock module -> supervised link -> hub
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use trackside_link::clock::MonotonicClock;
use trackside_link::codec::{self, FrameBuilder};
use trackside_link::radio::run_supervised;
use trackside_link::sync::{SyncRequest, SyncResponse};
use trackside_link::transport::MockTransport;
use trackside_link::{DeviceStatus, LinkConfig, LinkEvent, RadioConfig, TelemetryHub};

fn rcv_line(address: u16, payload: &[u8], rssi: i32, snr: i32) -> String {
    let hex = hex::encode_upper(payload);
    format!("+RCV={},{},{},{},{}", address, hex.len(), hex, rssi, snr)
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn wait_for_event(rx: &Receiver<LinkEvent>, wanted: impl Fn(&LinkEvent) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) if wanted(&event) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
    false
}

fn sent_frames(mock: &MockTransport) -> Vec<Vec<u8>> {
    mock.written_lines()
        .iter()
        .filter_map(|line| line.strip_prefix("AT+SEND=1,"))
        .filter_map(|rest| rest.split(',').nth(1))
        .filter_map(|hex| hex::decode(hex).ok())
        .collect()
}

#[test]
fn radio_pipeline_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let radio = RadioConfig {
        reconnect_delay_ms: 50,
        init_timeout_ms: 500,
        ..RadioConfig::default()
    };
    let config = LinkConfig::new().with_radio(radio.clone());
    let clock = MonotonicClock::shared();
    let (events, rx) = crossbeam_channel::unbounded();
    let hub = Arc::new(TelemetryHub::new(&config, clock.clone(), events));

    let mock = MockTransport::new().with_auto_ok();
    let running = Arc::new(AtomicBool::new(true));

    let worker = {
        let hub = Arc::clone(&hub);
        let running = Arc::clone(&running);
        let port = mock.clone();
        let tx = hub.tx().clone();
        thread::spawn(move || {
            run_supervised(|| Ok(port.clone()), &radio, tx, clock, &running, &*hub)
        })
    };

    assert!(wait_for_event(&rx, |e| *e == LinkEvent::RadioConnected));

    // The link asks for names as soon as it is up
    assert!(wait_until(|| !sent_frames(&mock).is_empty()));

    // Name announcement and a value in the same frame
    let frame = FrameBuilder::new()
        .name(10, "RPM")
        .unwrap()
        .f32(10, 7200.0)
        .build();
    mock.inject_line(&rcv_line(1, &frame, -42, 9));

    assert!(wait_for_event(&rx, |e| matches!(e, LinkEvent::Telemetry { .. })));
    let snapshot = hub.snapshot(None);
    assert_eq!(snapshot["RPM"], 7200.0);
    assert_eq!(snapshot["RSSI"], -42.0);
    assert_eq!(snapshot["SNR"], 9.0);
    assert_eq!(hub.devices().status("lora:1"), Some(DeviceStatus::Up));

    // A sync request is answered over the air
    let request = SyncRequest {
        request_id: 7,
        t1: 1_000,
    };
    mock.inject_line(&rcv_line(1, &request.encode(), -40, 8));

    let response = || {
        sent_frames(&mock)
            .iter()
            .filter_map(|bytes| SyncResponse::from_fields(&codec::decode(bytes).fields))
            .next()
    };
    assert!(wait_until(|| response().is_some()));
    let response = response().unwrap();
    assert_eq!(response.request_id, 7);
    assert_eq!(response.t1, 1_000);
    assert!(response.t3 >= response.t2);

    // Unplugging the module marks the radio device down
    mock.disconnect();
    assert!(wait_for_event(&rx, |e| *e == LinkEvent::RadioDisconnected));
    assert_eq!(hub.devices().status("lora:1"), Some(DeviceStatus::Down));

    running.store(false, Ordering::SeqCst);
    worker.join().unwrap();
}
