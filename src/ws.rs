//! WebSocket request, response and messaging types
//!
//! A WebSocket request is not a typical URL request although it starts out
//! like one: an initial HTTP GET is upgraded into a two-way persistent
//! connection. The [`Request`] carries the [`Receivers`] through which the
//! engine passes incoming messages to the request maker, and the [`Response`]
//! carries the [`Senders`] through which the request maker writes back.

use bytes::{BufMut, Bytes, BytesMut};
use std::{sync::atomic::{AtomicU64, Ordering}, time::Duration};

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub use self::{
    receivers::{ControlReceiver, DataReceiver, Receivers},
    senders::{SendFuture, SendResult, Senders},
};

pub mod receivers;
pub mod senders;
pub(crate) mod handler;

/// Identifies one WebSocket connection, unique within the process lifetime.
///
/// This is passed to the [`Receivers`] callables so that messages can be
/// attributed to a particular connection. There is no need to specify it when
/// sending as each [`Senders`] already knows which connection it belongs to.
pub type ConnectionId = u64;

/// The identifier `0` is reserved for default-constructed responses.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// The opcode of a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOpCode {
    /// UTF-8 text payload.
    Text,
    /// Opaque binary payload. Not supported yet: sends are refused, and a
    /// received binary frame closes the connection.
    Binary,
}

/// The opcode of a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOpCode {
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

/// The default close handshake timeout.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// A request to open a WebSocket connection.
#[derive(Debug)]
pub struct Request {
    /// The `ws://` or `wss://` URL to upgrade on.
    pub url: String,

    /// The interface through which received messages are passed out.
    pub receivers: Receivers,

    /// How long to wait for the server's close confirmation after a
    /// client-initiated close before forcibly tearing the connection down.
    pub close_timeout: Duration,
}

impl Request {
    /// Creates a request for `url` delivering into `receivers`, with the
    /// default close timeout.
    pub fn new(url: impl Into<String>, receivers: Receivers) -> Self {
        Self {
            url: url.into(),
            receivers,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Overrides the close handshake timeout.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

/// The response to the initial WebSocket upgrade request.
///
/// If the upgrade succeeded this provides the means of writing to the
/// connection. If it did not, the completion callback receives a
/// default-constructed response: connection id `0` and a [`Senders`] whose
/// sends resolve to [`SendResult::NoImplementation`].
#[derive(Debug, Default)]
pub struct Response {
    /// The unique identifier of the connection.
    pub connection_id: ConnectionId,

    /// The interface for sending to the WebSocket.
    pub senders: Senders,
}

/// Rebuilds the raw close payload: two big-endian status code bytes followed
/// by the UTF-8 reason. An absent close frame yields an empty payload.
pub(crate) fn close_payload(frame: &Option<CloseFrame>) -> Bytes {
    match frame {
        Some(frame) => {
            let reason = frame.reason.as_str().as_bytes();
            let mut payload = BytesMut::with_capacity(2 + reason.len());
            payload.put_u16(u16::from(frame.code));
            payload.put_slice(reason);
            payload.freeze()
        }
        None => Bytes::new(),
    }
}

/// Splits a raw close payload into its status code and reason.
///
/// An empty payload means the peer sent no status code at all.
pub fn decode_close_payload(payload: &[u8]) -> (Option<u16>, &[u8]) {
    if payload.len() < 2 {
        return (None, &[]);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (Some(code), &payload[2..])
}

#[cfg(test)]
mod tests {
    use super::{close_payload, decode_close_payload, next_connection_id, CloseCode};
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn it_allocates_increasing_connection_ids() {
        let first = next_connection_id();
        let second = next_connection_id();
        assert!(first > 0);
        assert!(second > first);
    }

    #[test]
    fn it_encodes_a_close_payload() {
        let frame = CloseFrame { code: CloseCode::Normal, reason: "done".into() };
        let payload = close_payload(&Some(frame));

        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&payload[2..], b"done");
    }

    #[test]
    fn it_encodes_an_absent_close_as_an_empty_payload() {
        let payload = close_payload(&None);
        assert!(payload.is_empty());

        let (code, reason) = decode_close_payload(&payload);
        assert_eq!(code, None);
        assert!(reason.is_empty());
    }

    #[test]
    fn it_round_trips_a_close_payload() {
        let frame = CloseFrame { code: CloseCode::Away, reason: "Client shutdown".into() };
        let payload = close_payload(&Some(frame));

        let (code, reason) = decode_close_payload(&payload);
        assert_eq!(code, Some(1001));
        assert_eq!(reason, b"Client shutdown");
    }
}
