use super::{SyncRequest, SyncResponse, SyncTransport};
use crate::clock::SharedClock;
use crate::codec;
use crate::dispatcher::CommandHandler;
use crate::radio::TxQueueHandle;
use crate::types::{Result, TlvMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Answers `SYNC_REQ` frames arriving over the radio
///
/// Registered with the command dispatcher; the response goes out through the
/// half-duplex transmit queue.
pub struct SyncResponder {
    clock: SharedClock,
    tx: TxQueueHandle,
}

impl SyncResponder {
    pub fn new(clock: SharedClock, tx: TxQueueHandle) -> Self {
        Self { clock, tx }
    }
}

impl CommandHandler for SyncResponder {
    fn handle(&self, fields: &TlvMap) -> Result<()> {
        let t2 = self.clock.now_micros();
        let Some(request) = SyncRequest::from_fields(fields) else {
            log::warn!("Malformed sync request: {} fields", fields.len());
            return Ok(());
        };

        let mut response = SyncResponse {
            request_id: request.request_id,
            t1: request.t1,
            t2,
            t3: 0,
        };
        response.t3 = self.clock.now_micros();
        self.tx.enqueue(response.encode())?;

        log::debug!(
            "Sync request {} answered (t1={} t2={})",
            request.request_id,
            request.t1,
            t2
        );
        Ok(())
    }
}

/// Sync server over a [`SyncTransport`]
pub struct SyncServer<T: SyncTransport> {
    transport: T,
    clock: SharedClock,
}

impl<T: SyncTransport> SyncServer<T> {
    pub fn new(transport: T, clock: SharedClock) -> Self {
        Self { transport, clock }
    }

    /// Wait for one frame and answer it if it is a sync request
    ///
    /// Returns `true` when a response was sent.
    pub fn serve_once(&self, timeout: Duration) -> Result<bool> {
        let Some(frame) = self.transport.recv(timeout)? else {
            return Ok(false);
        };
        let t2 = self.clock.now_micros();

        let outcome = codec::decode(&frame);
        outcome.log_warnings("sync server");
        let Some(request) = SyncRequest::from_fields(&outcome.fields) else {
            log::trace!("Ignoring non sync frame");
            return Ok(false);
        };

        let mut response = SyncResponse {
            request_id: request.request_id,
            t1: request.t1,
            t2,
            t3: 0,
        };
        response.t3 = self.clock.now_micros();
        self.transport.send(&response.encode())?;
        Ok(true)
    }

    /// Serve until `running` is cleared or the transport fails
    pub fn serve(&self, running: &AtomicBool, poll: Duration) -> Result<usize> {
        let mut served = 0;
        while running.load(Ordering::SeqCst) {
            if self.serve_once(poll)? {
                served += 1;
            }
        }
        log::debug!("Sync server stopped after {} exchanges", served);
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::protocol::{Command, FIELD_COMMAND};
    use crate::sync::SyncRequest;
    use std::sync::Arc;

    #[test]
    fn test_responder_enqueues_response() {
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_micros(2_000));
        let tx = TxQueueHandle::new();
        let responder = SyncResponder::new(clock, tx.clone());

        let request = SyncRequest {
            request_id: 42,
            t1: 1_000,
        };
        let fields = codec::decode(&request.encode()).fields;
        responder.handle(&fields).unwrap();

        assert_eq!(tx.len(), 1);
        let mut sent = None;
        let mut queue = crate::radio::TransmitQueue::new(
            tx,
            Arc::new(ManualClock::new()),
            Default::default(),
        );
        queue.tick(|entry| {
            sent = Some(entry.payload.clone());
            Ok(())
        });

        let response = codec::decode(&sent.unwrap()).fields;
        assert_eq!(
            response.get_u64(FIELD_COMMAND),
            Some(Command::SyncResp.as_byte() as u64)
        );
        assert_eq!(
            SyncResponse::from_fields(&response),
            Some(SyncResponse {
                request_id: 42,
                t1: 1_000,
                t2: 2_000,
                t3: 2_000,
            })
        );
    }
}
