//! The means of receiving from a WebSocket connection
//!
//! A [`Receivers`] is provided *by* the request maker in the
//! [`Request`](super::Request) object. Data messages arrive fully
//! reassembled; control frames are never fragmented, so their payload is
//! passed through directly. Control notifications are informational only —
//! the connection answers pings and echoes closes itself, and once a close
//! control frame has been seen the accompanying [`Senders`](super::Senders)
//! is already shut off from further sends.

use bytes::Bytes;
use std::{fmt, sync::{Arc, Mutex}};

use super::{ConnectionId, ControlOpCode, DataOpCode};

/// Receives data messages: `(connection, opcode, message)`.
pub type DataReceiver = Box<dyn Fn(ConnectionId, DataOpCode, Bytes) + Send>;

/// Receives control frame payloads: `(connection, opcode, payload)`.
pub type ControlReceiver = Box<dyn Fn(ConnectionId, ControlOpCode, Bytes) + Send>;

struct ReceiverSet {
    data: DataReceiver,
    control: ControlReceiver,
}

/// A thread-safe, clonable handle holding the user-supplied receiver
/// callables.
///
/// Copies share the same underlying slot, so a holder can call
/// [`stop_receiving`](Receivers::stop_receiving) on any copy once the state
/// captured by the callables is no longer safe to touch; from then on both
/// receive methods return `false` without invoking anything.
///
/// A default-constructed `Receivers` is inert: it never invokes anything and
/// always reports `false`.
#[derive(Clone, Default)]
pub struct Receivers {
    slot: Arc<Mutex<Option<ReceiverSet>>>,
}

impl Receivers {
    /// Creates a [`Receivers`] from the two receiver callables.
    pub fn new(
        data: impl Fn(ConnectionId, DataOpCode, Bytes) + Send + 'static,
        control: impl Fn(ConnectionId, ControlOpCode, Bytes) + Send + 'static,
    ) -> Self {
        let set = ReceiverSet {
            data: Box::new(data),
            control: Box::new(control),
        };
        Self { slot: Arc::new(Mutex::new(Some(set))) }
    }

    /// Hands a data message to the data receiver.
    ///
    /// Returns `false`, without invoking anything, if receiving has been
    /// stopped.
    pub fn receive_data(&self, id: ConnectionId, op_code: DataOpCode, message: Bytes) -> bool {
        let guard = self.slot.lock().unwrap();
        match guard.as_ref() {
            Some(set) => {
                (set.data)(id, op_code, message);
                true
            }
            None => false,
        }
    }

    /// Hands a control frame payload to the control receiver.
    ///
    /// Returns `false`, without invoking anything, if receiving has been
    /// stopped.
    pub fn receive_control(&self, id: ConnectionId, op_code: ControlOpCode, payload: Bytes) -> bool {
        let guard = self.slot.lock().unwrap();
        match guard.as_ref() {
            Some(set) => {
                (set.control)(id, op_code, payload);
                true
            }
            None => false,
        }
    }

    /// Clears both callables.
    ///
    /// Intended for the request maker once the functions passed to
    /// [`Receivers::new`] are no longer safe to call. Idempotent.
    pub fn stop_receiving(&self) {
        self.slot.lock().unwrap().take();
    }
}

impl fmt::Debug for Receivers {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Receivers(..)")
    }
}
