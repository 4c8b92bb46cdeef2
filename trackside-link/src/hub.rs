//! Telemetry hub
//!
//! The hub owns every shared structure (names, signal store, device registry,
//! transmit queue handle) and is the single place where frames from all
//! transports are turned into signal updates and events. It is built once and
//! handed to each worker as an `Arc`.
//!
//! Events leave through a `crossbeam_channel::Sender<LinkEvent>`; the caller
//! decides what to do with them (console, logging, GUI).

use crate::clock::SharedClock;
use crate::codec::{self, FrameBuilder};
use crate::config::LinkConfig;
use crate::devices::{ChannelAddress, DeviceRegistry};
use crate::dispatcher::{CommandDispatcher, CommandHandler, Dispatch};
use crate::net::{parse_trigger, GateTrigger, LineChannel, LineHandler, LineOrigin, LinePacket};
use crate::protocol::{Command, FIELD_COMMAND};
use crate::radio::{PacketSink, RadioPacket, TxQueueHandle};
use crate::signals::{NameRegistry, PostProcessor, RowParser, SignalStore};
use crate::sync::SyncResponder;
use crate::types::{LinkError, Result, SignalFrame, TlvMap, Timestamp};
use chrono::Utc;
use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TCP_DEVICE: &str = "tcp_device";
pub const UDP_DEVICE: &str = "udp_device";
pub const LORA_DEVICE: &str = "lora_device";

/// Signal names for radio link quality
pub const RSSI_SIGNAL: &str = "RSSI";
pub const SNR_SIGNAL: &str = "SNR";

/// Something the consumer should know about
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A telemetry frame was stored
    Telemetry {
        device_id: String,
        frame: SignalFrame,
        received_at: Timestamp,
    },
    /// A `CMD` line from a socket device
    DeviceCommand {
        device_id: String,
        command: String,
        args: Vec<String>,
        received_at: Timestamp,
    },
    /// A radio control frame was handled
    RadioControl {
        device_id: String,
        command: Command,
        received_at: Timestamp,
    },
    /// A gate crossing arrived while the gate was armed
    Trigger {
        device_id: String,
        trigger: GateTrigger,
        received_at: Timestamp,
    },
    RadioConnected,
    RadioDisconnected,
}

/// Device id used for a radio sender
pub fn radio_device_id(address: u16) -> String {
    format!("lora:{}", address)
}

/// Shared ingestion state for all workers
pub struct TelemetryHub {
    clock: SharedClock,
    names: Arc<NameRegistry>,
    store: Arc<SignalStore>,
    devices: Arc<DeviceRegistry>,
    tx: TxQueueHandle,
    dispatcher: CommandDispatcher,
    post: PostProcessor,
    rows: RowParser,
    gate_armed: AtomicBool,
    name_request_interval: Duration,
    last_name_request: Mutex<Option<Duration>>,
    events: Sender<LinkEvent>,
}

impl TelemetryHub {
    /// Build the hub and its shared structures from `config`
    ///
    /// `SYNC_REQ` is answered through the transmit queue and `CONFIG_RESP` is
    /// logged; other commands can be added with [`TelemetryHub::register_command`]
    /// before the hub is shared.
    pub fn new(config: &LinkConfig, clock: SharedClock, events: Sender<LinkEvent>) -> Self {
        let tx = TxQueueHandle::new();

        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            Command::SyncReq,
            SyncResponder::new(clock.clone(), tx.clone()),
        );
        dispatcher.register(Command::ConfigResp, |fields: &TlvMap| {
            log::info!("Device acknowledged configuration ({} fields)", fields.len());
            Ok(())
        });

        Self {
            names: Arc::new(NameRegistry::new()),
            store: Arc::new(SignalStore::new(clock.clone())),
            devices: Arc::new(DeviceRegistry::new(clock.clone(), config.health)),
            tx,
            dispatcher,
            post: PostProcessor::from_rules(&config.signals.scale),
            rows: RowParser::new(config.signals.row_names.iter().cloned()),
            gate_armed: AtomicBool::new(false),
            name_request_interval: config.radio.name_request_interval(),
            last_name_request: Mutex::new(None),
            events,
            clock,
        }
    }

    pub fn register_command(
        &mut self,
        command: Command,
        handler: impl CommandHandler + 'static,
    ) {
        self.dispatcher.register(command, handler);
    }

    pub fn names(&self) -> &Arc<NameRegistry> {
        &self.names
    }

    pub fn store(&self) -> &Arc<SignalStore> {
        &self.store
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn tx(&self) -> &TxQueueHandle {
        &self.tx
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Process one frame received over the radio
    pub fn ingest_radio(&self, packet: &RadioPacket) {
        let device_id = radio_device_id(packet.address);
        self.devices
            .register(&device_id, LORA_DEVICE, ChannelAddress::radio(packet.address));

        // Anything the module heard counts as a sign of life, even a garbled frame
        self.devices.touch_heartbeat(&device_id, None);
        self.store.update(RSSI_SIGNAL, packet.rssi);
        self.store.update(SNR_SIGNAL, packet.snr);

        let outcome = codec::decode_hex(&packet.payload_hex, &self.names);
        outcome.log_warnings(&device_id);
        if outcome.fields.is_empty() && outcome.names.is_empty() {
            return;
        }

        match self.dispatcher.dispatch(&outcome.fields) {
            Dispatch::Telemetry(fields) => self.ingest_tlv(&device_id, &fields),
            Dispatch::Handled(command) => self.emit(LinkEvent::RadioControl {
                device_id,
                command,
                received_at: Utc::now(),
            }),
            Dispatch::Unhandled(_) => {}
        }
    }

    fn ingest_tlv(&self, device_id: &str, fields: &TlvMap) {
        let mut frame = SignalFrame::new();
        let mut unknown = Vec::new();

        for field in fields.iter() {
            match self.names.name_of(field.id) {
                Some(name) => frame.push(name, field.value.as_f64().unwrap_or(f64::NAN)),
                None => unknown.push(field.id),
            }
        }

        if !unknown.is_empty() {
            log::debug!("{}: no names for ids {:?}", device_id, unknown);
            self.request_names_limited();
        }
        self.store_frame(device_id, frame);
    }

    fn store_frame(&self, device_id: &str, frame: SignalFrame) {
        if frame.is_empty() {
            return;
        }
        let frame = self.post.apply_frame(frame);
        self.store.update_frame(&frame);
        self.emit(LinkEvent::Telemetry {
            device_id: device_id.to_string(),
            frame,
            received_at: Utc::now(),
        });
    }

    /// Process one line from a socket device
    ///
    /// Returns the sender's device id.
    pub fn ingest_line(&self, line: &str, origin: LineOrigin) -> Result<String> {
        let packet = LinePacket::parse(line)?;
        let device_id = packet.device_id.clone();

        let (device_type, channels, ip) = match origin {
            LineOrigin::Tcp(addr) => (TCP_DEVICE, ChannelAddress::tcp(addr), None),
            LineOrigin::Udp(addr) => (UDP_DEVICE, ChannelAddress::udp(addr.ip()), Some(addr.ip())),
        };
        self.devices.register(&device_id, device_type, channels);
        self.devices.touch_heartbeat(&device_id, ip);

        log::trace!("[{:?}] {}: {} {:?}", origin, device_id, packet.channel, packet.payload);

        match packet.channel {
            LineChannel::Heartbeat => {}
            LineChannel::Data => self.ingest_data(&device_id, &packet.payload_str())?,
            LineChannel::Command => {
                let command = packet
                    .payload
                    .first()
                    .map(|c| c.to_ascii_uppercase())
                    .unwrap_or_default();
                match command.as_str() {
                    "RESET" | "PING" => log::info!("{} sent {}", device_id, command),
                    other => log::debug!("{} sent unrecognised command {:?}", device_id, other),
                }
                self.emit(LinkEvent::DeviceCommand {
                    device_id: device_id.clone(),
                    command,
                    args: packet.payload.iter().skip(1).cloned().collect(),
                    received_at: Utc::now(),
                });
            }
        }
        Ok(device_id)
    }

    fn ingest_data(&self, device_id: &str, payload: &[&str]) -> Result<()> {
        if let Some(trigger) = parse_trigger(payload) {
            if self.gate_armed() {
                log::info!("Gate trigger from {}: {:?}", device_id, trigger);
                self.emit(LinkEvent::Trigger {
                    device_id: device_id.to_string(),
                    trigger,
                    received_at: Utc::now(),
                });
            } else {
                log::debug!("Ignoring trigger from {} while disarmed", device_id);
            }
            return Ok(());
        }

        if self.rows.is_empty() {
            return Err(LinkError::MalformedLine(
                "DATA received but no row names are configured".to_string(),
            ));
        }
        let frame = self.rows.parse(payload)?;
        self.store_frame(device_id, frame);
        Ok(())
    }

    pub fn arm_gate(&self) {
        self.gate_armed.store(true, Ordering::SeqCst);
        log::info!("Gate armed");
    }

    pub fn disarm_gate(&self) {
        self.gate_armed.store(false, Ordering::SeqCst);
        log::info!("Gate disarmed");
    }

    pub fn gate_armed(&self) -> bool {
        self.gate_armed.load(Ordering::SeqCst)
    }

    /// Queue a bare command frame for the radio peer
    pub fn send_command(&self, command: Command) -> Result<()> {
        let frame = FrameBuilder::new()
            .command(FIELD_COMMAND, command.as_byte())
            .build();
        self.tx.enqueue(frame)?;
        log::debug!("Queued {}", command);
        Ok(())
    }

    /// Ask the radio peer to re-announce its signal names
    pub fn request_names(&self) -> Result<()> {
        *self.last_name_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());
        self.send_command(Command::NameSyncReq)
    }

    fn request_names_limited(&self) {
        let now = self.clock.now();
        {
            let mut last = self.last_name_request.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if now.saturating_sub(at) < self.name_request_interval {
                    return;
                }
            }
            *last = Some(now);
        }
        if let Err(e) = self.send_command(Command::NameSyncReq) {
            log::warn!("Could not queue name request: {}", e);
        }
    }

    /// Latest value of every signal; older than `max_age` reads as NaN
    pub fn snapshot(&self, max_age: Option<Duration>) -> BTreeMap<String, f64> {
        self.store.snapshot(max_age)
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            log::trace!("Event receiver gone, dropping event");
        }
    }
}

impl PacketSink for TelemetryHub {
    fn on_packet(&self, packet: RadioPacket) {
        self.ingest_radio(&packet);
    }

    fn on_connect(&self) {
        self.emit(LinkEvent::RadioConnected);
    }

    fn on_disconnect(&self) {
        for device in self.devices.devices() {
            if device.device_type == LORA_DEVICE {
                self.devices.mark_disconnected(&device.id);
            }
        }
        self.emit(LinkEvent::RadioDisconnected);
    }
}

impl LineHandler for TelemetryHub {
    fn handle_line(&self, line: &str, origin: LineOrigin) -> Result<String> {
        self.ingest_line(line, origin)
    }

    fn connection_closed(&self, device_ids: &[String]) {
        for id in device_ids {
            self.devices.mark_disconnected(id);
        }
    }
}
