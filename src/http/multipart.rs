//! Multipart request body composition
//!
//! A [`Multipart`] describes a `multipart/form-data` POST body as an ordered
//! list of named parts. Part content is supplied either inline as bytes or
//! through a reader callback that is pulled on demand, so large payloads are
//! streamed without ever being buffered in full.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::Error;
use super::TransferBody;

/// Pull callback for streamed part content.
///
/// Invoked with a scratch buffer to fill; returns the number of bytes
/// written. Returning `0` (or a short count on an intermediate pull) ends the
/// part early.
pub type ReadFn = Box<dyn FnMut(&mut [u8]) -> usize + Send + 'static>;

/// Repositioning callback for streamed part content.
///
/// Invoked once with offset `0` before the first pull so the source starts
/// from its origin. Returns `false` if the source cannot seek.
pub type SeekFn = Box<dyn FnMut(u64) -> bool + Send + 'static>;

/// Reader chunk size. A multiple of 3 so that base64-encoded chunks
/// concatenate into a valid stream.
const READ_CHUNK_SIZE: usize = 57 * 1024;

/// An ordered list of [`Part`]s forming a `multipart/form-data` body.
#[derive(Default)]
pub struct Multipart {
    /// The parts, sent in insertion order.
    pub parts: Vec<Part>,
}

/// One part of a [`Multipart`] body.
pub struct Part {
    name: String,
    content_type: Option<String>,
    encoding: Option<String>,
    headers: Vec<String>,
    data: PartData,
}

/// The content of a [`Part`].
pub enum PartData {
    /// Inline content, copied into the body.
    Bytes(Bytes),

    /// Streamed content, pulled from a callback on demand.
    Reader(PartReader),
}

/// A streamed content source with a declared total size.
pub struct PartReader {
    /// Total number of bytes the reader will produce.
    pub len: u64,
    read: ReadFn,
    seek: Option<SeekFn>,
}

impl Multipart {
    /// Creates an empty [`Multipart`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if there are no parts.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Appends a part.
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Turns the description into a streaming request body using `boundary`.
    pub(crate) fn into_body(self, boundary: &str) -> TransferBody {
        let chunks = Chunks {
            boundary: boundary.to_owned(),
            parts: self.parts.into_iter(),
            current: None,
            finished: false,
        };
        StreamBody::new(futures_util::stream::iter(chunks)).boxed_unsync()
    }
}

impl Part {
    /// Creates a part with inline content.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            encoding: None,
            headers: Vec::new(),
            data: PartData::Bytes(data.into()),
        }
    }

    /// Creates a part with inline text content.
    #[inline]
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::bytes(name, Bytes::from(text.into()))
    }

    /// Creates a part whose content is pulled from `read` on demand.
    ///
    /// The callback is invoked as many times as necessary to produce `len`
    /// bytes and must track its own position across pulls.
    pub fn reader(
        name: impl Into<String>,
        len: u64,
        read: impl FnMut(&mut [u8]) -> usize + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            encoding: None,
            headers: Vec::new(),
            data: PartData::Reader(PartReader { len, read: Box::new(read), seek: None }),
        }
    }

    /// Explicitly sets the MIME type if the default is not sufficient.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Explicitly sets the content transfer encoding.
    ///
    /// `binary`, `7bit` and `8bit` are identity encodings; `base64` encodes
    /// the content while streaming.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Appends an extra `Name: Value` sub-header to the part.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    /// Sets a repositioning callback for a reader part.
    ///
    /// Ignored for inline parts.
    pub fn with_seek(mut self, seek: impl FnMut(u64) -> bool + Send + 'static) -> Self {
        if let PartData::Reader(reader) = &mut self.data {
            reader.seek = Some(Box::new(seek));
        }
        self
    }

    /// Emits the part sub-headers and opens its payload.
    fn open(self, boundary: &str) -> (Bytes, Payload) {
        let mut header = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n",
            self.name,
        );
        if let Some(content_type) = &self.content_type {
            header.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if let Some(encoding) = &self.encoding {
            header.push_str(&format!("Content-Transfer-Encoding: {encoding}\r\n"));
        }
        for extra in &self.headers {
            header.push_str(extra);
            header.push_str("\r\n");
        }
        header.push_str("\r\n");

        let base64 = matches!(self.encoding.as_deref(), Some("base64"));
        let payload = match self.data {
            PartData::Bytes(data) if base64 => {
                Payload::Inline(Some(Bytes::from(STANDARD.encode(&data))))
            }
            PartData::Bytes(data) => Payload::Inline(Some(data)),
            PartData::Reader(mut reader) => {
                if let Some(seek) = &mut reader.seek {
                    if !seek(0) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("multipart part source refused to seek to its origin");
                    }
                }
                let remaining = reader.len;
                Payload::Reader { reader, remaining, base64 }
            }
        };
        (Bytes::from(header), payload)
    }
}

impl fmt::Debug for Multipart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multipart")
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Picks a boundary that is unique within the process.
pub(crate) fn boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed) ^ (nanos << 24);
    format!("----neva-{unique:024x}")
}

enum Payload {
    Inline(Option<Bytes>),
    Reader {
        reader: PartReader,
        remaining: u64,
        base64: bool,
    },
}

impl Payload {
    /// Produces the next content chunk, or `None` when the payload is spent.
    fn next_chunk(&mut self) -> Option<Bytes> {
        match self {
            Payload::Inline(data) => data.take().filter(|b| !b.is_empty()),
            Payload::Reader { reader, remaining, base64 } => {
                if *remaining == 0 {
                    return None;
                }
                let want = READ_CHUNK_SIZE.min(*remaining as usize);
                let mut buffer = vec![0u8; want];
                let mut filled = 0;
                while filled < want {
                    let n = (reader.read)(&mut buffer[filled..]);
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    // Source dried up early; end the part.
                    *remaining = 0;
                    return None;
                }
                if filled < want {
                    *remaining = 0;
                } else {
                    *remaining -= filled as u64;
                }
                buffer.truncate(filled);
                if *base64 {
                    Some(Bytes::from(STANDARD.encode(&buffer)))
                } else {
                    Some(Bytes::from(buffer))
                }
            }
        }
    }
}

/// Walks the parts, yielding body frames: per-part sub-headers, content
/// chunks, and finally the closing boundary.
struct Chunks {
    boundary: String,
    parts: std::vec::IntoIter<Part>,
    current: Option<Payload>,
    finished: bool,
}

impl Iterator for Chunks {
    type Item = Result<Frame<Bytes>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(payload) = self.current.as_mut() {
            return match payload.next_chunk() {
                Some(chunk) => Some(Ok(Frame::data(chunk))),
                None => {
                    self.current = None;
                    Some(Ok(Frame::data(Bytes::from_static(b"\r\n"))))
                }
            };
        }

        match self.parts.next() {
            Some(part) => {
                let (header, payload) = part.open(&self.boundary);
                self.current = Some(payload);
                Some(Ok(Frame::data(header)))
            }
            None if !self.finished => {
                self.finished = true;
                Some(Ok(Frame::data(Bytes::from(format!("--{}--\r\n", self.boundary)))))
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{boundary, Multipart, Part};
    use http_body_util::BodyExt;

    async fn compose(multipart: Multipart, boundary: &str) -> Vec<u8> {
        multipart
            .into_body(boundary)
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn it_composes_inline_parts_in_order() {
        let multipart = Multipart::new()
            .with_part(Part::text("first", "alpha"))
            .with_part(Part::text("second", "beta").with_content_type("text/plain"));

        let body = String::from_utf8(compose(multipart, "B").await).unwrap();

        assert_eq!(
            body,
            "--B\r\nContent-Disposition: form-data; name=\"first\"\r\n\r\nalpha\r\n\
             --B\r\nContent-Disposition: form-data; name=\"second\"\r\nContent-Type: text/plain\r\n\r\nbeta\r\n\
             --B--\r\n"
        );
    }

    #[tokio::test]
    async fn it_preserves_nul_bytes() {
        let data = b"left\0middle\0right".to_vec();
        let multipart = Multipart::new().with_part(Part::bytes("raw", data.clone()));

        let body = compose(multipart, "B").await;

        let needle = &data[..];
        assert!(body.windows(needle.len()).any(|w| w == needle));
    }

    #[tokio::test]
    async fn it_streams_reader_parts() {
        let total = 200_000u64;
        let mut produced = 0u64;
        let part = Part::reader("big", total, move |buffer| {
            let n = buffer.len().min((total - produced) as usize);
            buffer[..n].fill(b'0');
            produced += n as u64;
            n
        });
        let multipart = Multipart::new().with_part(part);

        let body = compose(multipart, "B").await;

        let zeros = body.iter().filter(|b| **b == b'0').count();
        assert_eq!(zeros as u64, total);
    }

    #[tokio::test]
    async fn it_base64_encodes_across_chunks() {
        let total = (super::READ_CHUNK_SIZE + 100) as u64;
        let mut produced = 0u64;
        let part = Part::reader("encoded", total, move |buffer| {
            let n = buffer.len().min((total - produced) as usize);
            buffer[..n].fill(b'x');
            produced += n as u64;
            n
        })
        .with_encoding("base64");
        let multipart = Multipart::new().with_part(part);

        let body = String::from_utf8(compose(multipart, "B").await).unwrap();

        let start = body.find("\r\n\r\n").unwrap() + 4;
        let end = body[start..].find("\r\n").unwrap() + start;
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let decoded = STANDARD.decode(&body[start..end]).unwrap();
        assert_eq!(decoded.len() as u64, total);
        assert!(decoded.iter().all(|b| *b == b'x'));
    }

    #[tokio::test]
    async fn it_stops_a_part_on_a_dry_source() {
        let part = Part::reader("dry", 1_000, |_| 0);
        let multipart = Multipart::new().with_part(part);

        let body = String::from_utf8(compose(multipart, "B").await).unwrap();

        assert!(body.contains("name=\"dry\"\r\n\r\n\r\n--B--"));
    }

    #[test]
    fn it_picks_distinct_boundaries() {
        assert_ne!(boundary(), boundary());
    }
}
