//! URL-encoded form body builder

use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything outside the RFC 3986 unreserved set gets percent-encoded.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A string that can be marked as already encoded or not.
///
/// Used for both field names and values, allowing the caller to state whether
/// the string is already encoded (or needs no encoding) or whether it should
/// be percent-encoded while being appended.
#[derive(Debug, Clone)]
pub struct Encodable {
    value: String,
    needs_encoding: bool,
}

impl Encodable {
    /// A string that is appended verbatim.
    #[inline]
    pub fn raw(value: impl Into<String>) -> Self {
        Self { value: value.into(), needs_encoding: false }
    }

    /// A string that is percent-encoded while being appended.
    #[inline]
    pub fn encode(value: impl Into<String>) -> Self {
        Self { value: value.into(), needs_encoding: true }
    }
}

impl From<&str> for Encodable {
    #[inline]
    fn from(value: &str) -> Self {
        Self::encode(value)
    }
}

impl From<String> for Encodable {
    #[inline]
    fn from(value: String) -> Self {
        Self::encode(value)
    }
}

/// Builds an `application/x-www-form-urlencoded` body of the form
/// `field1=value1&field2=value2`.
///
/// The output is consumed as an opaque request body by
/// [`Request::with_form`](super::Request::with_form); the `=` and `&`
/// delimiters themselves are never encoded.
///
/// # Example
/// ```
/// use neva::http::{Encodable, UrlEncodedValues};
///
/// let mut values = UrlEncodedValues::new();
/// assert!(values.add(Encodable::raw("fruit"), Encodable::raw("apple")));
/// assert!(values.add(Encodable::raw("vegetable"), Encodable::encode("pot&to")));
/// assert_eq!(values.as_str(), "fruit=apple&vegetable=pot%26to");
/// ```
#[derive(Debug, Clone, Default)]
pub struct UrlEncodedValues {
    buffer: String,
}

impl UrlEncodedValues {
    /// Creates an empty builder
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `{field, value}` pair, optionally encoding either side.
    ///
    /// The value may be empty but the field must not. Returns `false` and
    /// leaves the builder unchanged if the field is empty.
    pub fn add(&mut self, field: impl Into<Encodable>, value: impl Into<Encodable>) -> bool {
        let field = field.into();
        let value = value.into();
        if field.value.is_empty() {
            return false;
        }

        if !self.buffer.is_empty() {
            self.buffer.push('&');
        }
        self.append(&field);
        self.buffer.push('=');
        self.append(&value);
        true
    }

    /// Returns the full string as it currently stands.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Consumes the builder, returning the built string.
    #[inline]
    pub fn into_string(self) -> String {
        self.buffer
    }

    /// Resets the builder back to the empty string.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn append(&mut self, encodable: &Encodable) {
        if encodable.needs_encoding {
            for piece in percent_encode(encodable.value.as_bytes(), FORM_ENCODE_SET) {
                self.buffer.push_str(piece);
            }
        } else {
            self.buffer.push_str(&encodable.value);
        }
    }
}
