//! The request engine
//!
//! A [`Requester`] services one or more requests without blocking the caller.
//! It runs a drive loop in its own thread; when a request completes, its
//! completion callback is invoked there — so ideally don't do any heavy
//! lifting inside one. Completion callbacks for distinct requests never run
//! concurrently, but completion order relative to submission order is not
//! guaranteed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::Duration,
};

use tokio::{runtime, sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ResponseCode,
    http::{self, handler::{build_client, HttpClient}},
    ws::{self, handler::{run_transfer, WsTransferContext}, ConnectionId},
};

pub(crate) type HttpCallback = Box<dyn FnOnce(ResponseCode, http::Response) + Send>;
pub(crate) type WsCallback = Box<dyn FnOnce(ResponseCode, ws::Response) + Send>;

/// Engine configuration
#[derive(Debug, Clone, Copy)]
pub struct Config {
    poll_timeout: Duration,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self { poll_timeout: Duration::from_millis(50) }
    }
}

impl Config {
    /// Creates the default configuration
    ///
    /// Defaults:
    /// - poll_timeout: `50ms`
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the drive-loop pacing interval.
    ///
    /// This governs how often shutdown re-checks its drain conditions and how
    /// quickly a failed close echo is retried.
    ///
    /// Default: `50ms`
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

enum Submission {
    Http { request: http::Request, callback: HttpCallback },
    Ws { request: ws::Request, callback: WsCallback },
}

impl Submission {
    /// Fails the submission without it ever reaching the engine thread.
    fn refuse(self, code: ResponseCode) {
        match self {
            Submission::Http { callback, .. } => callback(code, http::Response::default()),
            Submission::Ws { callback, .. } => callback(code, ws::Response::default()),
        }
    }
}

/// Handles one or more requests without blocking.
///
/// Submissions are accepted from any thread and serviced on the engine's own
/// worker thread, which also delivers every completion callback. Dropping the
/// `Requester` runs the close handshake on every persisting WebSocket
/// connection (bounded by each connection's close timeout), surfaces
/// [`ResponseCode::Aborted`] on transfers that never completed, and joins the
/// thread.
///
/// # Example
/// ```no_run
/// use neva::{http, Requester, ResponseCode};
///
/// let requester = Requester::new();
/// requester.submit_http(
///     http::Request::get("http://localhost:8080/info"),
///     |code, response| {
///         if code == ResponseCode::Success {
///             println!("{}: {} bytes", response.status, response.body.len());
///         }
///     },
/// );
/// ```
pub struct Requester {
    submissions: Option<mpsc::UnboundedSender<Submission>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Requester {
    /// Creates a [`Requester`] with the default [`Config`] and starts its
    /// engine thread.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a [`Requester`] with the given [`Config`] and starts its
    /// engine thread.
    pub fn with_config(config: Config) -> Self {
        let (submissions, inbox) = mpsc::unbounded_channel();
        let worker = thread::spawn(move || worker(config, inbox));
        Self {
            submissions: Some(submissions),
            worker: Some(worker),
        }
    }

    /// Submits an HTTP request asynchronously.
    ///
    /// The call does not block; the request is serviced on the engine thread
    /// and `on_complete` is invoked there exactly once.
    pub fn submit_http<F>(&self, request: http::Request, on_complete: F)
    where
        F: FnOnce(ResponseCode, http::Response) + Send + 'static,
    {
        self.submit(Submission::Http { request, callback: Box::new(on_complete) });
    }

    /// Submits a request to open a WebSocket connection.
    ///
    /// On a successful upgrade `on_complete` receives a live
    /// [`ws::Response`]; the connection then persists and incoming messages
    /// flow into the request's [`Receivers`](ws::Receivers) until the close
    /// handshake completes.
    pub fn submit_ws<F>(&self, request: ws::Request, on_complete: F)
    where
        F: FnOnce(ResponseCode, ws::Response) + Send + 'static,
    {
        self.submit(Submission::Ws { request, callback: Box::new(on_complete) });
    }

    fn submit(&self, submission: Submission) {
        let Some(submissions) = &self.submissions else {
            submission.refuse(ResponseCode::SendFailure);
            return;
        };
        if let Err(refused) = submissions.send(submission) {
            refused.0.refuse(ResponseCode::SendFailure);
        }
    }

    /// Reports whether the one-time transport initialisation succeeded.
    ///
    /// If `false` the engine thread cannot be serviced and submissions fail
    /// with [`ResponseCode::SendFailure`].
    pub fn global_init_succeeded() -> bool {
        static PROBE: OnceLock<bool> = OnceLock::new();
        *PROBE.get_or_init(|| {
            runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .is_ok()
        })
    }

    /// A human-readable identification of the underlying transport stack.
    pub fn transport_version() -> &'static str {
        concat!("neva/", env!("CARGO_PKG_VERSION"), " (tokio, hyper, tungstenite)")
    }
}

impl Default for Requester {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        // Closing the submission channel asks the drive loop to drain
        // persisting connections, abort leftovers and stop.
        self.submissions.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// The engine thread: a current-thread runtime so that every transfer task
/// and every completion callback is serialized here.
fn worker(config: Config, mut inbox: mpsc::UnboundedReceiver<Submission>) {
    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::error!("failed to build the engine runtime: {_err}");
            while let Some(submission) = inbox.blocking_recv() {
                submission.refuse(ResponseCode::SendFailure);
            }
            return;
        }
    };
    runtime.block_on(Engine::new(config).drive(inbox));
}

/// A persisting WebSocket connection as the engine sees it.
pub(crate) struct PersistingConnection {
    close_requested: CancellationToken,
}

impl PersistingConnection {
    pub(crate) fn new(close_requested: CancellationToken) -> Self {
        Self { close_requested }
    }

    /// Asks the connection to run a client-side close handshake, unless one
    /// is already in flight.
    fn request_close(&self) {
        self.close_requested.cancel();
    }
}

struct Engine {
    config: Config,
    client: HttpClient,
    next_transfer_id: u64,
    /// Transfers that have not completed yet; aborted on shutdown.
    active: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    /// Connections that survived their initial completion.
    persisting: Arc<Mutex<HashMap<ConnectionId, PersistingConnection>>>,
}

impl Engine {
    fn new(config: Config) -> Self {
        Self {
            config,
            client: build_client(),
            next_transfer_id: 0,
            active: Arc::new(Mutex::new(HashMap::new())),
            persisting: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn drive(mut self, mut inbox: mpsc::UnboundedReceiver<Submission>) {
        while let Some(submission) = inbox.recv().await {
            match submission {
                Submission::Http { request, callback } => self.spawn_http(request, callback),
                Submission::Ws { request, callback } => self.spawn_ws(request, callback),
            }
        }
        // The requester is gone; nothing new can arrive.
        self.shutdown().await;
    }

    fn allocate_transfer_id(&mut self) -> u64 {
        self.next_transfer_id += 1;
        self.next_transfer_id
    }

    fn spawn_http(&mut self, request: http::Request, callback: HttpCallback) {
        let id = self.allocate_transfer_id();
        let abort = CancellationToken::new();
        self.active.lock().unwrap().insert(id, abort.clone());

        let client = self.client.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let (code, response) = tokio::select! {
                biased;
                _ = abort.cancelled() => (ResponseCode::Aborted, http::Response::default()),
                outcome = http::handler::execute(&client, request) => match outcome {
                    Ok(response) => (ResponseCode::Success, response),
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("http transfer failed: {_err}");
                        (ResponseCode::Failure, http::Response::default())
                    }
                },
            };
            if active.lock().unwrap().remove(&id).is_none() {
                #[cfg(feature = "tracing")]
                tracing::warn!("transfer {id} completed but was not registered as active");
            }
            callback(code, response);
        });
    }

    fn spawn_ws(&mut self, request: ws::Request, callback: WsCallback) {
        let id = self.allocate_transfer_id();
        let abort = CancellationToken::new();
        self.active.lock().unwrap().insert(id, abort.clone());

        tokio::spawn(run_transfer(WsTransferContext {
            transfer_id: id,
            request,
            callback,
            abort,
            active: Arc::clone(&self.active),
            persisting: Arc::clone(&self.persisting),
            retry_pacing: self.config.poll_timeout,
        }));
    }

    async fn shutdown(&self) {
        loop {
            // Ask every persisting connection to run its close handshake and
            // wait for them to unregister themselves; each wait is bounded by
            // the connection's own close timeout. Upgrades completing during
            // the drain are picked up on the next pass.
            loop {
                {
                    let persisting = self.persisting.lock().unwrap();
                    if persisting.is_empty() {
                        break;
                    }
                    for connection in persisting.values() {
                        connection.request_close();
                    }
                }
                sleep(self.config.poll_timeout).await;
            }

            // Abort transfers that never completed; each surfaces Aborted
            // through its callback before unregistering.
            let aborts: Vec<_> = self.active.lock().unwrap().values().cloned().collect();
            for abort in aborts {
                abort.cancel();
            }
            while !self.active.lock().unwrap().is_empty() {
                sleep(self.config.poll_timeout).await;
            }

            let drained = self.persisting.lock().unwrap().is_empty()
                && self.active.lock().unwrap().is_empty();
            if drained {
                break;
            }
        }
    }
}
