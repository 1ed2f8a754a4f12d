//! HTTP request and response types

use bytes::Bytes;

use crate::error::Error;

pub use self::{
    form::{Encodable, UrlEncodedValues},
    multipart::{Multipart, Part, PartData, PartReader},
};

pub mod form;
pub mod multipart;
pub(crate) mod handler;

/// A boxed request body
pub(crate) type TransferBody = http_body_util::combinators::UnsyncBoxBody<Bytes, Error>;

/// The HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// No method selected; the transfer is refused.
    #[default]
    Invalid,
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Maps onto the transport method, refusing [`Method::Invalid`].
    pub(crate) fn to_transport(self) -> Result<hyper::Method, Error> {
        match self {
            Method::Invalid => Err(Error::message("invalid request method")),
            Method::Get => Ok(hyper::Method::GET),
            Method::Head => Ok(hyper::Method::HEAD),
            Method::Post => Ok(hyper::Method::POST),
            Method::Put => Ok(hyper::Method::PUT),
            Method::Delete => Ok(hyper::Method::DELETE),
        }
    }
}

/// An HTTP request to be submitted to a [`Requester`](crate::Requester).
///
/// # Example
/// ```
/// use neva::http::{Method, Request};
///
/// let request = Request::get("http://localhost:8080/info")
///     .with_header("Accept: text/plain");
/// assert_eq!(request.method, Method::Get);
/// ```
#[derive(Debug, Default)]
pub struct Request {
    /// The request method.
    pub method: Method,

    /// The absolute request URL.
    pub url: String,

    /// Ordered free-form headers in `Name: Value` form.
    pub headers: Vec<String>,

    /// `application/x-www-form-urlencoded` POST data of the form
    /// `key1=value1&key2=value2`.
    ///
    /// The data is sent as-is and is assumed to be correctly encoded; see
    /// [`UrlEncodedValues`] for a helper that builds it. When empty, a POST
    /// falls back to the [`multipart`](Request::multipart) description.
    pub form: String,

    /// `multipart/form-data` POST description. Used when
    /// [`form`](Request::form) is empty.
    pub multipart: Multipart,
}

impl Request {
    /// Creates a GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::Get, url: url.into(), ..Default::default() }
    }

    /// Creates a HEAD request for `url`.
    pub fn head(url: impl Into<String>) -> Self {
        Self { method: Method::Head, url: url.into(), ..Default::default() }
    }

    /// Creates a POST request for `url`.
    pub fn post(url: impl Into<String>) -> Self {
        Self { method: Method::Post, url: url.into(), ..Default::default() }
    }

    /// Creates a PUT request for `url`.
    pub fn put(url: impl Into<String>) -> Self {
        Self { method: Method::Put, url: url.into(), ..Default::default() }
    }

    /// Creates a DELETE request for `url`.
    pub fn delete(url: impl Into<String>) -> Self {
        Self { method: Method::Delete, url: url.into(), ..Default::default() }
    }

    /// Appends a free-form `Name: Value` header.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    /// Sets the url-encoded form body.
    pub fn with_form(mut self, form: impl Into<String>) -> Self {
        self.form = form.into();
        self
    }

    /// Sets the multipart body description.
    pub fn with_multipart(mut self, multipart: Multipart) -> Self {
        self.multipart = multipart;
        self
    }
}

/// An HTTP response, delivered by move to the completion callback.
#[derive(Debug, Default)]
pub struct Response {
    /// The HTTP status code, e.g. 200, 404.
    pub status: u16,

    /// The response body. Opaque bytes; may contain NULs.
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::{Method, Request};

    #[test]
    fn it_defaults_to_an_invalid_method() {
        let request = Request::default();
        assert_eq!(request.method, Method::Invalid);
        assert!(request.method.to_transport().is_err());
    }

    #[test]
    fn it_builds_requests_with_headers() {
        let request = Request::post("http://localhost/submit")
            .with_header("Accept: text/plain")
            .with_header("X-Custom: yes")
            .with_form("a=1&b=2");

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.form, "a=1&b=2");
    }

    #[test]
    fn it_maps_methods_onto_the_transport() {
        assert_eq!(Method::Get.to_transport().unwrap(), hyper::Method::GET);
        assert_eq!(Method::Head.to_transport().unwrap(), hyper::Method::HEAD);
        assert_eq!(Method::Post.to_transport().unwrap(), hyper::Method::POST);
        assert_eq!(Method::Put.to_transport().unwrap(), hyper::Method::PUT);
        assert_eq!(Method::Delete.to_transport().unwrap(), hyper::Method::DELETE);
    }
}
