//! Command dispatcher
//!
//! Splits control traffic from telemetry. A frame carrying field
//! [`FIELD_COMMAND`] is a control frame: it goes to the handler registered for
//! that command and contributes nothing to telemetry, even if it also carries
//! other fields. Frames without a command pass through untouched.

use crate::protocol::{Command, FIELD_COMMAND};
use crate::types::{Result, TlvMap};
use std::collections::HashMap;

/// Handler invoked with the full field map of a control frame
pub trait CommandHandler: Send + Sync {
    fn handle(&self, fields: &TlvMap) -> Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&TlvMap) -> Result<()> + Send + Sync,
{
    fn handle(&self, fields: &TlvMap) -> Result<()> {
        self(fields)
    }
}

/// What the dispatcher did with one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No command present; every field is telemetry
    Telemetry(TlvMap),
    /// A registered handler consumed the frame
    Handled(Command),
    /// Command field present but nothing registered for it
    Unhandled(Option<u64>),
}

/// Command id -> handler table
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: HashMap<Command, Box<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command`, replacing any previous one
    pub fn register(&mut self, command: Command, handler: impl CommandHandler + 'static) {
        if self.handlers.insert(command, Box::new(handler)).is_some() {
            log::debug!("Replaced handler for {}", command);
        }
    }

    pub fn handles(&self, command: Command) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Route one frame
    pub fn dispatch(&self, fields: &TlvMap) -> Dispatch {
        let Some(raw) = fields.get(FIELD_COMMAND) else {
            return Dispatch::Telemetry(fields.clone());
        };

        let code = raw.as_u64();
        let command = code
            .and_then(|c| u8::try_from(c).ok())
            .and_then(Command::from_byte);

        match command.and_then(|cmd| self.handlers.get(&cmd).map(|h| (cmd, h))) {
            Some((cmd, handler)) => {
                log::trace!("Dispatching {} ({} fields)", cmd, fields.len());
                if let Err(e) = handler.handle(fields) {
                    log::warn!("Handler for {} failed: {}", cmd, e);
                }
                Dispatch::Handled(cmd)
            }
            None => {
                log::warn!("Dropping frame with unhandled command {}", raw);
                Dispatch::Unhandled(code)
            }
        }
    }

    /// Handle any command in `fields` and return the telemetry left over
    ///
    /// The result is empty whenever a command field is present.
    pub fn filter_and_handle(&self, fields: &TlvMap) -> TlvMap {
        match self.dispatch(fields) {
            Dispatch::Telemetry(map) => map,
            Dispatch::Handled(_) | Dispatch::Unhandled(_) => TlvMap::new(),
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let commands: Vec<String> = self.handlers.keys().map(|c| c.to_string()).collect();
        f.debug_struct("CommandDispatcher")
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TlvValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_dispatcher(command: Command) -> (CommandDispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(command, move |fields: &TlvMap| {
            assert!(fields.contains(FIELD_COMMAND));
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (dispatcher, calls)
    }

    #[test]
    fn test_command_frame_is_stripped() {
        let (dispatcher, calls) = counting_dispatcher(Command::SyncReq);
        let frame: TlvMap = [
            (0x01, TlvValue::Command(0x01)),
            (0x02, TlvValue::U16(7)),
            (0x03, TlvValue::U64(123)),
            (0x09, TlvValue::F32(1.5)),
        ]
        .into_iter()
        .collect();

        let telemetry = dispatcher.filter_and_handle(&frame);
        assert!(telemetry.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plain_telemetry_passes_through() {
        let (dispatcher, calls) = counting_dispatcher(Command::SyncReq);
        let frame: TlvMap = [(0x05, TlvValue::F32(6500.0)), (0x06, TlvValue::U8(3))]
            .into_iter()
            .collect();

        assert_eq!(dispatcher.filter_and_handle(&frame), frame);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_command_drops_frame() {
        let (dispatcher, calls) = counting_dispatcher(Command::SyncReq);
        let frame: TlvMap = [(0x01, TlvValue::Command(0x7F)), (0x05, TlvValue::U8(1))]
            .into_iter()
            .collect();

        assert_eq!(dispatcher.dispatch(&frame), Dispatch::Unhandled(Some(0x7F)));
        assert!(dispatcher.filter_and_handle(&frame).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_known_but_unregistered_command_drops_frame() {
        let (dispatcher, _calls) = counting_dispatcher(Command::SyncReq);
        let frame: TlvMap = [(0x01, TlvValue::Command(0x04))].into_iter().collect();
        assert_eq!(dispatcher.dispatch(&frame), Dispatch::Unhandled(Some(4)));
    }

    #[test]
    fn test_handler_error_still_consumes_frame() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(Command::ConfigResp, |_: &TlvMap| {
            Err(crate::types::LinkError::Closed)
        });
        let frame: TlvMap = [(0x01, TlvValue::U8(0x04))].into_iter().collect();
        assert_eq!(
            dispatcher.dispatch(&frame),
            Dispatch::Handled(Command::ConfigResp)
        );
    }
}
