//! Common test utilities: an in-process mock HTTP + WebSocket server.

#![allow(dead_code)]

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, service::service_fn, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, sync::{Arc, Mutex}, time::Duration};
use tokio::net::{TcpListener, TcpStream};

use tokio_tungstenite::{
    tungstenite::{
        handshake::server::{Request as WsUpgradeRequest, Response as WsUpgradeResponse},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message, Utf8Bytes,
    },
    WebSocketStream,
};

/// A mock server bound to two randomly assigned free ports, one speaking
/// HTTP/1.1 and one speaking WebSocket.
pub struct MockServer {
    pub http_port: u16,
    pub ws_port: u16,
}

impl MockServer {
    pub async fn spawn() -> Self {
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = http_listener.local_addr().unwrap().port();
        let ws_port = ws_listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = http_listener.accept().await else { break };
                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(route))
                        .await;
                });
            }
        });

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = ws_listener.accept().await else { break };
                tokio::spawn(serve_ws(stream));
            }
        });

        Self { http_port, ws_port }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.http_port)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{path}", self.ws_port)
    }
}

async fn route(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = match (method.as_str(), path.as_str()) {
        ("GET", "/test/url/http/get200") | ("HEAD", "/test/url/http/get200") => {
            text(StatusCode::OK, &b"GET test response SUCCESS"[..])
        }
        ("GET", "/test/url/http/get/containsnull") => {
            text(StatusCode::OK, &b"GET test response contains \0 and \0"[..])
        }
        ("GET", "/test/url/http/slow") => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            text(StatusCode::OK, &b"slow response"[..])
        }
        ("POST", "/test/url/http/post/form/no-encoding") => form_response(request, false).await,
        ("POST", "/test/url/http/post/form/encoding") => form_response(request, true).await,
        ("POST", "/test/url/http/post/mime/form/large") => mime_response(request).await,
        ("PUT", "/test/url/http/put") => text(StatusCode::OK, &b"PUT test response SUCCESS"[..]),
        ("DELETE", "/test/url/http/delete") => {
            text(StatusCode::OK, &b"DELETE test response SUCCESS"[..])
        }
        _ => text(StatusCode::NOT_FOUND, &b"not found"[..]),
    };
    Ok(response)
}

async fn form_response(request: Request<Incoming>, encoded: bool) -> Response<Full<Bytes>> {
    let body = request.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();

    let mut name = None;
    let mut handle = None;
    for pair in body.split('&') {
        if let Some((field, value)) = pair.split_once('=') {
            let (field, value) = if encoded {
                (percent_decode(field), percent_decode(value))
            } else {
                (field.to_owned(), value.to_owned())
            };
            match field.as_str() {
                "name" => name = Some(value),
                "handle" => handle = Some(value),
                _ => {}
            }
        }
    }

    match (name, handle) {
        (Some(name), Some(handle)) => {
            text(StatusCode::OK, format!("{handle}, your real name is {name}!"))
        }
        _ => text(StatusCode::BAD_REQUEST, "missing form fields"),
    }
}

fn percent_decode(value: &str) -> String {
    percent_encoding::percent_decode_str(value)
        .decode_utf8_lossy()
        .into_owned()
}

async fn mime_response(request: Request<Incoming>) -> Response<Full<Bytes>> {
    let content_type = request
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let Ok(boundary) = multer::parse_boundary(&content_type) else {
        return text(StatusCode::BAD_REQUEST, "not a multipart request");
    };

    let mut multipart = multer::Multipart::new(request.into_body().into_data_stream(), boundary);
    let mut total = 0usize;
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(chunk)) = field.chunk().await {
            total += chunk.len();
        }
    }

    text(StatusCode::OK, format!("Processed {total} bytes of data from MIME part"))
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap()
}

async fn serve_ws(stream: TcpStream) {
    let path = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&path);
    let callback = move |request: &WsUpgradeRequest, response: WsUpgradeResponse| {
        *seen.lock().unwrap() = request.uri().path().to_owned();
        Ok(response)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let path = path.lock().unwrap().clone();

    match path.as_str() {
        "/test/url/ws/hello" => hello(ws).await,
        "/test/url/ws/goodbye" => goodbye(ws).await,
        _ => reject(ws).await,
    }
}

/// Challenge/response endpoint: answers the greetings and lets the protocol
/// layer answer pings and echo closes.
async fn hello(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) if text.as_str() == "Hello world!" => {
                if ws.send(Message::text("Hi there!")).await.is_err() {
                    break;
                }
            }
            Message::Text(text) if text.as_str() == "What's your name?" => {
                if ws.send(Message::text("Paul")).await.is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
}

/// Server-initiated close endpoint.
async fn goodbye(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            if text.as_str() == "SEND BACK CONTROL CLOSE" {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Utf8Bytes::from_static("Server initiating close"),
                };
                if ws.send(Message::Close(Some(frame))).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn reject(mut ws: WebSocketStream<TcpStream>) {
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: Utf8Bytes::from_static("unknown test endpoint"),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
    while let Some(Ok(_)) = ws.next().await {}
}
