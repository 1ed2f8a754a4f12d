//! The WebSocket connection handler
//!
//! WebSocket is not an ideal fit for a URL request engine as it is really a
//! two-way communication protocol that lives as long as is required. The
//! transport performs the upgrade GET, frame (de)masking, message reassembly
//! and the automatic pong echo; everything above that — the close-handshake
//! state machine, pong bookkeeping, fragmented sends and routing into the
//! user's [`Receivers`] — lives here.
//!
//! Unlike other transfers, which finish with their completion callback, a
//! connection that upgrades successfully persists: it is registered with the
//! engine and serviced by [`Connection::serve`] until the close handshake
//! completes, the close timeout expires, or the transport fails.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::{collections::HashMap, sync::{Arc, Mutex}, time::Duration};

use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{sleep, sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use tokio_tungstenite::{
    tungstenite::{
        error::ProtocolError,
        protocol::{
            frame::{
                coding::{Data, OpCode},
                Frame,
            },
            CloseFrame,
        },
        Error as WsError,
        Message,
        Utf8Bytes,
    },
    MaybeTlsStream,
    WebSocketStream,
};

use crate::{
    engine::{PersistingConnection, WsCallback},
    error::ResponseCode,
};

use super::{
    close_payload,
    next_connection_id,
    senders::{Command, CommandKind},
    CloseCode, ConnectionId, ControlOpCode, DataOpCode, Receivers, SendResult, Senders,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How many times a failed close echo is retried before giving up.
const CLOSE_ECHO_ATTEMPTS: u32 = 3;

/// Everything a WebSocket transfer needs from the engine.
pub(crate) struct WsTransferContext {
    pub(crate) transfer_id: u64,
    pub(crate) request: super::Request,
    pub(crate) callback: WsCallback,
    pub(crate) abort: CancellationToken,
    pub(crate) active: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    pub(crate) persisting: Arc<Mutex<HashMap<ConnectionId, PersistingConnection>>>,
    pub(crate) retry_pacing: Duration,
}

/// Runs one WebSocket transfer: upgrade, completion callback, and — on a
/// successful upgrade — connection servicing until teardown.
pub(crate) async fn run_transfer(context: WsTransferContext) {
    let WsTransferContext {
        transfer_id,
        request,
        callback,
        abort,
        active,
        persisting,
        retry_pacing,
    } = context;

    let upgrade = tokio::select! {
        biased;
        _ = abort.cancelled() => {
            active.lock().unwrap().remove(&transfer_id);
            callback(ResponseCode::Aborted, super::Response::default());
            return;
        }
        upgrade = tokio_tungstenite::connect_async(request.url.as_str()) => upgrade,
    };
    if active.lock().unwrap().remove(&transfer_id).is_none() {
        #[cfg(feature = "tracing")]
        tracing::warn!("transfer {transfer_id} completed but was not registered as active");
    }

    let (stream, _upgrade_response) = match upgrade {
        Ok(upgraded) => upgraded,
        Err(_err) => {
            // Covers refused upgrades (anything other than 101) and transport
            // failures alike.
            #[cfg(feature = "tracing")]
            tracing::warn!("websocket upgrade failed: {_err}");
            callback(ResponseCode::Failure, super::Response::default());
            return;
        }
    };

    let id = next_connection_id();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let senders = Senders::bound(command_tx);
    let close_requested = CancellationToken::new();
    persisting
        .lock()
        .unwrap()
        .insert(id, PersistingConnection::new(close_requested.clone()));

    callback(
        ResponseCode::Success,
        super::Response { connection_id: id, senders: senders.clone() },
    );

    let connection = Connection::new(
        id,
        stream,
        request.receivers.clone(),
        senders,
        request.close_timeout,
        retry_pacing,
    );
    connection.serve(command_rx, close_requested).await;

    if persisting.lock().unwrap().remove(&id).is_none() {
        #[cfg(feature = "tracing")]
        tracing::debug!("websocket connection {id} was already unregistered");
    }
    request.receivers.stop_receiving();
}

/// The close handshake.
///
/// There is no observable transition from `ServerInitiated` to `Complete`
/// beyond the echoed close having been sent successfully; once it has, the
/// two are effectively the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseHandshake {
    None,
    ClientInitiated,
    ServerInitiated,
    Complete,
}

/// What a service-loop turn has to deal with.
enum Event {
    CloseRequested,
    Command(Command),
    CloseTimeout,
    EchoRetryTick,
    Incoming(Option<Result<Message, WsError>>),
}

struct Connection {
    id: ConnectionId,
    stream: WsStream,
    receivers: Receivers,
    senders: Senders,
    close_timeout: Duration,
    retry_pacing: Duration,
    handshake: CloseHandshake,
    close_sent_at: Option<Instant>,
    /// The server's close payload, cached in case the echo needs retrying.
    close_echo: Option<CloseFrame>,
    remaining_echo_attempts: u32,
    awaiting_pong: bool,
}

impl Connection {
    fn new(
        id: ConnectionId,
        stream: WsStream,
        receivers: Receivers,
        senders: Senders,
        close_timeout: Duration,
        retry_pacing: Duration,
    ) -> Self {
        Self {
            id,
            stream,
            receivers,
            senders,
            close_timeout,
            retry_pacing,
            handshake: CloseHandshake::None,
            close_sent_at: None,
            close_echo: None,
            remaining_echo_attempts: CLOSE_ECHO_ATTEMPTS,
            awaiting_pong: false,
        }
    }

    /// Services the connection until the close handshake completes, the close
    /// timeout expires, or the transport fails.
    ///
    /// All sends are funneled through `commands`, so frames within one
    /// connection never interleave. `close_requested` is the engine asking
    /// for a graceful close during shutdown.
    async fn serve(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        close_requested: CancellationToken,
    ) {
        let mut close_request_pending = true;
        loop {
            if self.handshake == CloseHandshake::Complete {
                break;
            }

            let close_deadline =
                self.close_sent_at.unwrap_or_else(Instant::now) + self.close_timeout;
            let client_initiated = self.handshake == CloseHandshake::ClientInitiated;
            let server_initiated = self.handshake == CloseHandshake::ServerInitiated;

            let event = tokio::select! {
                biased;
                _ = close_requested.cancelled(), if close_request_pending => Event::CloseRequested,
                Some(command) = commands.recv() => Event::Command(command),
                _ = sleep_until(close_deadline), if client_initiated => Event::CloseTimeout,
                _ = sleep(self.retry_pacing), if server_initiated => Event::EchoRetryTick,
                incoming = self.stream.next() => Event::Incoming(incoming),
            };

            let proceed = match event {
                Event::CloseRequested => {
                    close_request_pending = false;
                    self.close().await
                }
                Event::Command(command) => {
                    self.handle_command(command).await;
                    true
                }
                Event::CloseTimeout => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "no close confirmation received within {}ms, destroying connection {}",
                        self.close_timeout.as_millis(),
                        self.id,
                    );
                    false
                }
                Event::EchoRetryTick => self.retry_close_echo().await,
                Event::Incoming(Some(Ok(message))) => self.process_message(message).await,
                Event::Incoming(Some(Err(_err))) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("websocket receive error on connection {}: {_err}", self.id);
                    false
                }
                // The transport reported the connection closed.
                Event::Incoming(None) => false,
            };

            if self.handshake != CloseHandshake::None {
                // External holders must observe Closed from here on.
                self.senders.close();
            }
            if !proceed {
                break;
            }
        }
        self.senders.close();
    }

    /// Graceful close, called via the engine during shutdown.
    ///
    /// Returns `false` if the connection must be torn down right away.
    async fn close(&mut self) -> bool {
        if self.handshake != CloseHandshake::None {
            return true;
        }
        match self.send_close(CloseCode::Away, "Client shutdown".into()).await {
            SendResult::Success => true,
            _ => {
                #[cfg(feature = "tracing")]
                tracing::warn!("failed to send the shutdown close on connection {}", self.id);
                false
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let Command { kind, reply } = command;
        if self.handshake != CloseHandshake::None {
            let _ = reply.send(SendResult::Closed);
            return;
        }
        let result = match kind {
            CommandKind::Data { op_code, message, max_frame_size } => {
                self.send_data(op_code, message, max_frame_size).await
            }
            CommandKind::Close { code, reason } => self.send_close(code, reason).await,
            CommandKind::Ping { payload } => self.send_ping(payload).await,
            CommandKind::Pong { payload } => self.write(Message::Pong(payload)).await,
        };
        let _ = reply.send(result);
    }

    async fn send_data(
        &mut self,
        op_code: DataOpCode,
        message: Bytes,
        max_frame_size: usize,
    ) -> SendResult {
        if op_code == DataOpCode::Binary {
            #[cfg(feature = "tracing")]
            tracing::error!("binary frames are not supported yet, refusing the send on connection {}", self.id);
            return SendResult::Failure;
        }
        if max_frame_size == Senders::UNLIMITED_FRAME_SIZE || message.len() <= max_frame_size {
            let message = match Utf8Bytes::try_from(message) {
                Ok(text) => Message::Text(text),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("refusing to send a text message that is not UTF-8: {_err}");
                    return SendResult::Failure;
                }
            };
            return self.write(message).await;
        }

        // Fragmented message: the text opcode with FIN clear on the first
        // frame, continuation frames after it, FIN set on the last.
        let mut offset = 0;
        let mut first = true;
        while offset < message.len() {
            let end = (offset + max_frame_size).min(message.len());
            let is_final = end == message.len();
            let op_code = if first {
                OpCode::Data(Data::Text)
            } else {
                OpCode::Data(Data::Continue)
            };
            first = false;
            let frame = Frame::message(message.slice(offset..end), op_code, is_final);
            if let Err(_err) = self.stream.send(Message::Frame(frame)).await {
                #[cfg(feature = "tracing")]
                tracing::error!("websocket fragment send error on connection {}: {_err}", self.id);
                return SendResult::Failure;
            }
            offset = end;
        }
        SendResult::Success
    }

    async fn send_close(&mut self, code: CloseCode, reason: String) -> SendResult {
        let frame = CloseFrame { code, reason: reason.into() };
        match self.write_close(Some(frame)).await {
            Ok(()) => {
                self.handshake = CloseHandshake::ClientInitiated;
                self.close_sent_at = Some(Instant::now());
                SendResult::Success
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("websocket close send error on connection {}: {_err}", self.id);
                SendResult::Failure
            }
        }
    }

    async fn send_ping(&mut self, payload: Bytes) -> SendResult {
        if self.awaiting_pong {
            #[cfg(feature = "tracing")]
            tracing::debug!("no pong from the last ping on connection {}, pinging again", self.id);
        }
        let result = self.write(Message::Ping(payload)).await;
        if result == SendResult::Success {
            self.awaiting_pong = true;
        }
        result
    }

    /// Handles one fully reassembled incoming message.
    ///
    /// Returns `false` when the connection must be torn down.
    async fn process_message(&mut self, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                if !self.receivers.receive_data(self.id, DataOpCode::Text, Bytes::from(text)) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("data receiver of connection {} no longer receiving", self.id);
                }
                true
            }
            Message::Binary(_payload) => {
                #[cfg(feature = "tracing")]
                tracing::error!("binary frames are not supported yet on connection {}", self.id);
                let _ = self
                    .send_close(CloseCode::Unsupported, "Cannot send binary data (yet).".into())
                    .await;
                true
            }
            Message::Ping(payload) => {
                // The transport echoes a pong with the identical payload.
                if !self.receivers.receive_control(self.id, ControlOpCode::Ping, payload) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("control receiver of connection {} no longer receiving", self.id);
                }
                true
            }
            Message::Pong(payload) => {
                if self.awaiting_pong {
                    if !self.receivers.receive_control(self.id, ControlOpCode::Pong, payload) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("control receiver of connection {} no longer receiving", self.id);
                    }
                    self.awaiting_pong = false;
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("received an unsolicited pong on connection {}", self.id);
                }
                true
            }
            Message::Close(frame) => self.process_close(frame).await,
            Message::Frame(_) => {
                debug_assert!(false, "the transport surfaced a raw frame while reading messages");
                true
            }
        }
    }

    async fn process_close(&mut self, frame: Option<CloseFrame>) -> bool {
        // Even when a close confirmation is expected the notification is
        // still passed out, it could be useful.
        if !self.receivers.receive_control(self.id, ControlOpCode::Close, close_payload(&frame)) {
            #[cfg(feature = "tracing")]
            tracing::debug!("control receiver of connection {} no longer receiving", self.id);
        }

        match self.handshake {
            CloseHandshake::None => {
                self.close_echo = frame.clone();
                match self.write_close(frame).await {
                    // There is no confirmation of the echo, so this is as
                    // complete as the handshake gets.
                    Ok(()) => self.handshake = CloseHandshake::Complete,
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            "failed to echo the close on connection {}, will retry: {_err}",
                            self.id,
                        );
                        self.handshake = CloseHandshake::ServerInitiated;
                    }
                }
            }
            CloseHandshake::ClientInitiated => self.handshake = CloseHandshake::Complete,
            CloseHandshake::ServerInitiated | CloseHandshake::Complete => {}
        }
        true
    }

    /// Another go at echoing the server's close control frame.
    ///
    /// Returns `false` once the attempts are used up.
    async fn retry_close_echo(&mut self) -> bool {
        match self.write_close(self.close_echo.clone()).await {
            Ok(()) => {
                self.handshake = CloseHandshake::Complete;
                true
            }
            Err(_err) => {
                self.remaining_echo_attempts -= 1;
                if self.remaining_echo_attempts == 0 {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "failed to send the close echo back to the server on connection {}, closing anyway: {_err}",
                        self.id,
                    );
                    self.handshake = CloseHandshake::Complete;
                    return false;
                }
                true
            }
        }
    }

    async fn write(&mut self, message: Message) -> SendResult {
        match self.stream.send(message).await {
            Ok(()) => SendResult::Success,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("websocket send error on connection {}: {_err}", self.id);
                SendResult::Failure
            }
        }
    }

    /// Sends a close frame, treating "already closing" outcomes as success —
    /// the transport may have completed the close exchange internally.
    async fn write_close(&mut self, frame: Option<CloseFrame>) -> Result<(), WsError> {
        match self.stream.send(Message::Close(frame)).await {
            Ok(()) => Ok(()),
            Err(err) if is_expected_close_error(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[inline]
fn is_expected_close_error(err: &WsError) -> bool {
    match err {
        WsError::ConnectionClosed => true,
        WsError::AlreadyClosed => true,
        WsError::Protocol(p) => matches!(p, ProtocolError::SendAfterClosing),
        WsError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}
