//! The means of writing to a WebSocket connection
//!
//! A [`Senders`] is provided *to* the request maker in the
//! [`Response`](super::Response) object. If the accompanying
//! [`ResponseCode`](crate::ResponseCode) was anything other than `Success`
//! the object is default-constructed and every send resolves to
//! [`SendResult::NoImplementation`].

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use super::{CloseCode, DataOpCode};

/// The outcome of a [`Senders`] send method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// The frame has been handed to the transport successfully.
    Success,

    /// The transport refused the frame.
    Failure,

    /// The close handshake has begun; nothing further can be sent.
    Closed,

    /// Sending is prohibited because the connection upgrade never succeeded
    /// and this handle is default-constructed.
    NoImplementation,
}

/// A frame to be written by the connection on behalf of a [`Senders`] holder.
pub(crate) struct Command {
    pub(crate) kind: CommandKind,
    pub(crate) reply: oneshot::Sender<SendResult>,
}

pub(crate) enum CommandKind {
    Data {
        op_code: DataOpCode,
        message: Bytes,
        max_frame_size: usize,
    },
    Close {
        code: CloseCode,
        reason: String,
    },
    Ping {
        payload: Bytes,
    },
    Pong {
        payload: Bytes,
    },
}

type Slot = Mutex<Option<mpsc::UnboundedSender<Command>>>;

/// A thread-safe, clonable handle for sending through a WebSocket
/// connection.
///
/// Copies share the same underlying slot (reference semantics); the engine
/// shuts the slot once the close handshake has begun or the connection has
/// been torn down, after which every copy resolves sends to
/// [`SendResult::Closed`].
///
/// Every send method returns a [`SendFuture`]: the actual write is performed
/// on the engine thread and the caller may `.await` the outcome or park on
/// [`SendFuture::wait`] from a non-async thread.
#[derive(Clone, Default)]
pub struct Senders {
    slot: Option<Arc<Slot>>,
}

impl Senders {
    /// Frames are not split when this is passed as the maximum frame size.
    pub const UNLIMITED_FRAME_SIZE: usize = 0;

    /// Creates a handle dispatching into a live connection.
    pub(crate) fn bound(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { slot: Some(Arc::new(Mutex::new(Some(commands)))) }
    }

    /// Shuts the slot so every holder observes [`SendResult::Closed`].
    ///
    /// Called by the engine once the connection can no longer service sends.
    /// Idempotent, and harmless on a default-constructed handle.
    pub(crate) fn close(&self) {
        if let Some(slot) = &self.slot {
            slot.lock().unwrap().take();
        }
    }

    /// Sends a text data message.
    ///
    /// With [`Senders::UNLIMITED_FRAME_SIZE`] the message goes out as a
    /// single frame. A finite `max_frame_size` splits the payload into a
    /// fragmented message of at most that many payload bytes per frame.
    ///
    /// Binary frames are not supported yet; a
    /// [`DataOpCode::Binary`](super::DataOpCode::Binary) send resolves to
    /// [`SendResult::Failure`].
    pub fn send_data(
        &self,
        op_code: DataOpCode,
        message: impl Into<Bytes>,
        max_frame_size: usize,
    ) -> SendFuture {
        self.dispatch(CommandKind::Data {
            op_code,
            message: message.into(),
            max_frame_size,
        })
    }

    /// Sends a close control frame with the given status code and reason.
    ///
    /// Sending a close immediately suspends all further sending.
    pub fn send_close(&self, code: CloseCode, reason: impl Into<String>) -> SendFuture {
        self.dispatch(CommandKind::Close { code, reason: reason.into() })
    }

    /// Sends a ping control frame.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> SendFuture {
        self.dispatch(CommandKind::Ping { payload: payload.into() })
    }

    /// Sends a pong control frame.
    pub fn send_pong(&self, payload: impl Into<Bytes>) -> SendFuture {
        self.dispatch(CommandKind::Pong { payload: payload.into() })
    }

    fn dispatch(&self, kind: CommandKind) -> SendFuture {
        let Some(slot) = &self.slot else {
            return SendFuture::ready(SendResult::NoImplementation);
        };
        let guard = slot.lock().unwrap();
        let Some(commands) = guard.as_ref() else {
            return SendFuture::ready(SendResult::Closed);
        };
        let (reply, outcome) = oneshot::channel();
        if commands.send(Command { kind, reply }).is_err() {
            return SendFuture::ready(SendResult::Closed);
        }
        SendFuture::pending(outcome)
    }
}

impl fmt::Debug for Senders {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Senders(..)")
    }
}

/// The future-valued outcome of a send.
///
/// Resolves once the engine thread has performed (or refused) the write.
/// Await it from async code, or park on [`SendFuture::wait`] from a plain
/// thread. Never block on it from inside a receiver callback — those run on
/// the engine thread itself.
#[derive(Debug)]
pub struct SendFuture {
    state: SendFutureState,
}

#[derive(Debug)]
enum SendFutureState {
    Ready(Option<SendResult>),
    Pending(oneshot::Receiver<SendResult>),
}

impl SendFuture {
    #[inline]
    fn ready(result: SendResult) -> Self {
        Self { state: SendFutureState::Ready(Some(result)) }
    }

    #[inline]
    fn pending(outcome: oneshot::Receiver<SendResult>) -> Self {
        Self { state: SendFutureState::Pending(outcome) }
    }

    /// Blocks the calling thread until the send outcome is available.
    pub fn wait(self) -> SendResult {
        match self.state {
            SendFutureState::Ready(result) => result.unwrap_or(SendResult::Closed),
            SendFutureState::Pending(outcome) => {
                outcome.blocking_recv().unwrap_or(SendResult::Closed)
            }
        }
    }
}

impl Future for SendFuture {
    type Output = SendResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            SendFutureState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(SendResult::Closed))
            }
            SendFutureState::Pending(outcome) => Pin::new(outcome)
                .poll(cx)
                .map(|result| result.unwrap_or(SendResult::Closed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandKind, SendResult, Senders};
    use crate::ws::{CloseCode, DataOpCode};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn it_resolves_no_implementation_when_default_constructed() {
        let senders = Senders::default();

        let result = senders
            .send_data(DataOpCode::Text, "hi", Senders::UNLIMITED_FRAME_SIZE)
            .await;
        assert_eq!(result, SendResult::NoImplementation);
        assert_eq!(senders.send_close(CloseCode::Normal, "bye").await, SendResult::NoImplementation);
        assert_eq!(senders.send_ping("p").await, SendResult::NoImplementation);
        assert_eq!(senders.send_pong("p").await, SendResult::NoImplementation);
    }

    #[tokio::test]
    async fn it_resolves_closed_once_shut() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let senders = Senders::bound(tx);
        let copy = senders.clone();

        senders.close();

        assert_eq!(copy.send_ping("p").await, SendResult::Closed);
        // Shutting again is harmless.
        senders.close();
        assert_eq!(senders.send_pong("p").await, SendResult::Closed);
    }

    #[tokio::test]
    async fn it_resolves_closed_when_the_connection_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let senders = Senders::bound(tx);
        drop(rx);

        assert_eq!(senders.send_ping("p").await, SendResult::Closed);
    }

    #[tokio::test]
    async fn it_dispatches_commands_to_the_connection() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let senders = Senders::bound(tx);

        let send = senders.send_data(DataOpCode::Binary, &b"payload"[..], 16);
        let command = rx.recv().await.unwrap();
        match command.kind {
            CommandKind::Data { op_code, message, max_frame_size } => {
                assert_eq!(op_code, DataOpCode::Binary);
                assert_eq!(message.as_ref(), b"payload");
                assert_eq!(max_frame_size, 16);
            }
            _ => panic!("expected a data command"),
        }
        command.reply.send(SendResult::Success).unwrap();

        assert_eq!(send.await, SendResult::Success);
    }

    #[test]
    fn it_waits_synchronously() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let senders = Senders::bound(tx);

        let handle = std::thread::spawn(move || {
            let command = rx.blocking_recv().unwrap();
            command.reply.send(SendResult::Success).unwrap();
        });

        assert_eq!(senders.send_ping("p").wait(), SendResult::Success);
        handle.join().unwrap();
    }
}
