//! Opens a WebSocket connection, sends a greeting and prints whatever comes
//! back, then closes gracefully.

use neva::{ws, Requester, ResponseCode};
use std::{sync::mpsc, time::Duration};
use tracing_subscriber::prelude::*;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/echo".to_owned());

    let requester = Requester::new();

    let receivers = ws::Receivers::new(
        |id, _op, message| println!("[{id}] data: {}", String::from_utf8_lossy(&message)),
        |id, op, payload| println!("[{id}] control {op:?}: {payload:?}"),
    );

    let (tx, rx) = mpsc::channel();
    requester.submit_ws(ws::Request::new(url, receivers), move |code, response| {
        let _ = tx.send((code, response));
    });

    let (code, response) = rx.recv().expect("the engine dropped the response");
    if code != ResponseCode::Success {
        eprintln!("upgrade failed: {code}");
        return;
    }

    let senders = response.senders;
    let sent = senders
        .send_data(ws::DataOpCode::Text, "Hello world!", ws::Senders::UNLIMITED_FRAME_SIZE)
        .wait();
    println!("send: {sent:?}");

    std::thread::sleep(Duration::from_secs(2));

    let closed = senders.send_close(ws::CloseCode::Normal, "Done").wait();
    println!("close: {closed:?}");
    std::thread::sleep(Duration::from_millis(500));
}
