//! LoRa radio link
//!
//! This module contains the AT command parser, the half-duplex transmit
//! queue and the worker that owns the serial connection to the module.

pub mod at;
pub mod link;
pub mod tx_queue;

// Re-export key types for convenience
pub use at::{AtResponse, RadioPacket, ERR_BUSY, MAX_SEND_HEX_CHARS};
pub use link::{run_supervised, PacketSink, RadioLink};
pub use tx_queue::{TickOutcome, TransmitQueue, TxEntry, TxQueueHandle, TxState, TxTiming};
