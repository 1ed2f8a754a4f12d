//! Fetches a URL given on the command line and prints the response.

use neva::{http, Requester, ResponseCode};
use std::sync::mpsc;
use tracing_subscriber::prelude::*;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_owned());

    let requester = Requester::new();

    let (tx, rx) = mpsc::channel();
    requester.submit_http(http::Request::get(url), move |code, response| {
        let _ = tx.send((code, response));
    });

    let (code, response) = rx.recv().expect("the engine dropped the response");
    match code {
        ResponseCode::Success => {
            println!("HTTP {}", response.status);
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        other => eprintln!("request failed: {other}"),
    }
}
