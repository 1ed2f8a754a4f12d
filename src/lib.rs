//! # Neva
//!
//! > Asynchronous HTTP and WebSocket request engine for Rust based on [Tokio](https://tokio.rs/),
//! > [hyper](https://hyper.rs/) and [tungstenite](https://docs.rs/tungstenite) for fire-and-forget
//! > URL requests and long-lived WebSocket connections.
//!
//! ## Features
//! * Non-blocking request submission from any thread
//! * Completion callbacks on a dedicated engine thread
//! * GET, HEAD, POST (url-encoded and streamed multipart), PUT and DELETE
//! * Persistent WebSocket connections with a graceful close handshake
//! * Runs on stable Rust 1.80+
//!
//! ## Example
//! ```no_run
//! use neva::{http, Requester, ResponseCode};
//!
//! let requester = Requester::new();
//!
//! requester.submit_http(http::Request::get("http://localhost:8080/info"), |code, response| {
//!     if code == ResponseCode::Success {
//!         println!("{}: {} bytes", response.status, response.body.len());
//!     }
//! });
//! ```

pub mod engine;
pub mod error;
pub mod http;
pub mod version;
pub mod ws;

pub use crate::{
    engine::{Config, Requester},
    error::ResponseCode,
    version::{Version, VERSION},
};
