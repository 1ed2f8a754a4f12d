//! HTTP transfer execution
//!
//! One call to [`execute`] performs one transfer on the engine thread:
//! configure, send, accumulate the response body, report back. Translation to
//! a [`ResponseCode`](crate::ResponseCode) happens at the callback boundary
//! in the engine.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};

use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::Error;
use super::{multipart, Method, Request, Response, TransferBody};

/// The shared transfer driver. One per engine instance; connections are
/// pooled and multiplexed inside.
pub(crate) type HttpClient = Client<HttpConnector, TransferBody>;

pub(crate) fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Runs one HTTP transfer to completion.
pub(crate) async fn execute(client: &HttpClient, request: Request) -> Result<Response, Error> {
    let method = request.method.to_transport()?;

    let (body, implicit_content_type) = match request.method {
        Method::Post if !request.form.is_empty() => (
            full(Bytes::from(request.form)),
            Some(mime::APPLICATION_WWW_FORM_URLENCODED.to_string()),
        ),
        Method::Post if !request.multipart.is_empty() => {
            let boundary = multipart::boundary();
            let content_type = format!("{}; boundary={boundary}", mime::MULTIPART_FORM_DATA);
            (request.multipart.into_body(&boundary), Some(content_type))
        }
        _ => (empty(), None),
    };

    let mut transfer = hyper::Request::builder()
        .method(method)
        .uri(request.url.as_str())
        .body(body)?;

    let headers = transfer.headers_mut();
    for line in &request.headers {
        match parse_header(line) {
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!("skipping malformed header line: {line:?}");
            }
        }
    }
    if let Some(content_type) = implicit_content_type {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type).map_err(Error::new)?);
        }
    }

    let response = client.request(transfer).await?;
    let status = response.status().as_u16();
    let body = response.into_body().collect().await?.to_bytes();

    Ok(Response { status, body })
}

/// Parses a free-form `Name: Value` header line.
fn parse_header(line: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = line.split_once(':')?;
    let name = HeaderName::try_from(name.trim()).ok()?;
    let value = HeaderValue::from_str(value.trim()).ok()?;
    Some((name, value))
}

#[inline]
fn empty() -> TransferBody {
    Empty::<Bytes>::new().map_err(Error::from).boxed_unsync()
}

#[inline]
fn full(data: Bytes) -> TransferBody {
    Full::new(data).map_err(Error::from).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::parse_header;

    #[test]
    fn it_parses_a_header_line() {
        let (name, value) = parse_header("Accept: text/plain").unwrap();
        assert_eq!(name.as_str(), "accept");
        assert_eq!(value.to_str().unwrap(), "text/plain");
    }

    #[test]
    fn it_parses_a_header_with_a_colon_in_the_value() {
        let (name, value) = parse_header("Referer: http://localhost/page").unwrap();
        assert_eq!(name.as_str(), "referer");
        assert_eq!(value.to_str().unwrap(), "http://localhost/page");
    }

    #[test]
    fn it_rejects_a_header_without_a_colon() {
        assert!(parse_header("not a header").is_none());
    }

    #[test]
    fn it_rejects_an_empty_header_name() {
        assert!(parse_header(": no-name").is_none());
    }
}
