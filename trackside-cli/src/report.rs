//! Console report of signals, devices and events
//!
//! Plain text for an operator watching the terminal, JSON lines for anything
//! piping the output elsewhere.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write;
use trackside_link::{DeviceHandle, LinkEvent};

#[derive(Serialize)]
struct StatusReport<'a> {
    at: DateTime<Utc>,
    signals: &'a BTreeMap<String, f64>,
    devices: &'a [DeviceHandle],
}

/// Render the periodic status block
pub fn render_status(
    at: DateTime<Utc>,
    signals: &BTreeMap<String, f64>,
    devices: &[DeviceHandle],
    json: bool,
) -> Result<String> {
    if json {
        let report = StatusReport {
            at,
            signals,
            devices,
        };
        return Ok(serde_json::to_string(&report)?);
    }

    let mut out = String::new();
    writeln!(
        out,
        "=== {} | {} signals | {} devices ===",
        at.format("%H:%M:%S"),
        signals.len(),
        devices.len()
    )?;

    let width = signals.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in signals {
        if value.is_nan() {
            writeln!(out, "  {:<width$}  --", name, width = width)?;
        } else {
            writeln!(out, "  {:<width$}  {:.3}", name, value, width = width)?;
        }
    }

    for device in devices {
        let age = device
            .age
            .map(|a| format!("{:.1}s", a.as_secs_f64()))
            .unwrap_or_else(|| "never".to_string());
        writeln!(
            out,
            "  [{:<8}] {} ({}) last heard {}",
            device.status.to_string(),
            device.id,
            device.device_type,
            age
        )?;
    }
    Ok(out)
}

/// Render one event as a single line
pub fn render_event(event: &LinkEvent, json: bool) -> Result<String> {
    let value = match event {
        LinkEvent::Telemetry {
            device_id,
            frame,
            received_at,
        } => json!({
            "event": "telemetry",
            "device": device_id,
            "at": received_at,
            "signals": frame,
        }),
        LinkEvent::DeviceCommand {
            device_id,
            command,
            args,
            received_at,
        } => json!({
            "event": "command",
            "device": device_id,
            "at": received_at,
            "command": command,
            "args": args,
        }),
        LinkEvent::RadioControl {
            device_id,
            command,
            received_at,
        } => json!({
            "event": "control",
            "device": device_id,
            "at": received_at,
            "command": command.to_string(),
        }),
        LinkEvent::Trigger {
            device_id,
            trigger,
            received_at,
        } => json!({
            "event": "trigger",
            "device": device_id,
            "at": received_at,
            "utc_time": trigger.utc_time,
            "trigger": trigger.trigger,
        }),
        LinkEvent::RadioConnected => json!({ "event": "radio_connected" }),
        LinkEvent::RadioDisconnected => json!({ "event": "radio_disconnected" }),
    };

    if json {
        return Ok(value.to_string());
    }

    let text = match event {
        LinkEvent::Telemetry {
            device_id, frame, ..
        } => {
            let values: Vec<String> = frame
                .iter()
                .map(|(name, v)| format!("{}={}", name, v))
                .collect();
            format!("{}: {}", device_id, values.join(" "))
        }
        LinkEvent::DeviceCommand {
            device_id,
            command,
            args,
            ..
        } => format!("{}: CMD {} {}", device_id, command, args.join(",")),
        LinkEvent::RadioControl {
            device_id, command, ..
        } => format!("{}: {}", device_id, command),
        LinkEvent::Trigger {
            device_id, trigger, ..
        } => {
            let time = trigger
                .utc_time
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "-".to_string());
            let local = trigger
                .trigger
                .map(|t| format!("{:.3}", t))
                .unwrap_or_else(|| "-".to_string());
            format!("{}: TRIGGER at {} UTC (gate {})", device_id, time, local)
        }
        LinkEvent::RadioConnected => "radio connected".to_string(),
        LinkEvent::RadioDisconnected => "radio disconnected".to_string(),
    };
    Ok(text.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use std::time::Duration;
    use trackside_link::devices::ChannelAddress;
    use trackside_link::net::GateTrigger;
    use trackside_link::{DeviceStatus, SignalFrame};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 13, 45, 10).unwrap()
    }

    fn device() -> DeviceHandle {
        DeviceHandle {
            id: "lora:1".to_string(),
            device_type: "lora_device".to_string(),
            channels: ChannelAddress::radio(1),
            age: Some(Duration::from_millis(400)),
            connected: true,
            status: DeviceStatus::Up,
        }
    }

    #[test]
    fn test_status_text() {
        let mut signals = BTreeMap::new();
        signals.insert("RPM".to_string(), 7200.0);
        signals.insert("Speed".to_string(), f64::NAN);

        let text = render_status(at(), &signals, &[device()], false).unwrap();
        assert!(text.starts_with("=== 13:45:10 | 2 signals | 1 devices ==="));
        assert!(text.contains("RPM    7200.000"));
        assert!(text.contains("Speed  --"));
        assert!(text.contains("[UP      ] lora:1 (lora_device) last heard 0.4s"));
    }

    #[test]
    fn test_status_json_nan_is_null() {
        let mut signals = BTreeMap::new();
        signals.insert("Speed".to_string(), f64::NAN);

        let line = render_status(at(), &signals, &[device()], true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value["signals"]["Speed"].is_null());
        assert_eq!(value["devices"][0]["status"], "UP");
    }

    #[test]
    fn test_event_lines() {
        let mut frame = SignalFrame::new();
        frame.push("RPM", 6500.0);
        let event = LinkEvent::Telemetry {
            device_id: "lora:1".to_string(),
            frame,
            received_at: at(),
        };
        assert_eq!(render_event(&event, false).unwrap(), "lora:1: RPM=6500");

        let trigger = LinkEvent::Trigger {
            device_id: "gate".to_string(),
            trigger: GateTrigger {
                utc_time: NaiveTime::from_hms_milli_opt(14, 3, 22, 125),
                trigger: Some(83.4),
            },
            received_at: at(),
        };
        assert_eq!(
            render_event(&trigger, false).unwrap(),
            "gate: TRIGGER at 14:03:22.125 UTC (gate 83.400)"
        );

        let json_line = render_event(&trigger, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json_line).unwrap();
        assert_eq!(value["event"], "trigger");
        assert_eq!(value["trigger"], 83.4);
    }
}
