//! The response writer handed back to the host.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// Character set appended to every content type the dispatcher sets.
pub const CHARSET: &str = "utf-8";

/// A response under construction.
///
/// The dispatcher writes into it step by step; the host reads
/// [`status`](Self::status), [`headers`](Self::headers) and
/// [`body`](Self::body) once dispatch has returned.
///
/// # Examples
///
/// ```
/// use remoting::http::{Response, StatusCode};
///
/// let mut response = Response::new(StatusCode::Ok);
/// response.no_cache();
/// response.set_content_type("text/plain");
/// response.write("{\"value\":3}");
///
/// assert_eq!(response.headers().get("content-type"), Some("text/plain; charset=utf-8"));
/// assert_eq!(response.headers().get("cache-control"), Some("no-cache"));
/// assert_eq!(response.body_str(), Some("{\"value\":3}"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: BytesMut::new(),
        }
    }

    /// Appends a header and returns the response, for one-shot responses.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body from a string, replacing anything written so far.
    #[must_use]
    pub fn body_text(mut self, body: impl AsRef<str>) -> Self {
        self.clear();
        self.write(body.as_ref());
        self
    }

    /// Appends a header in place.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Replaces a header in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets `Content-Type` to `mime` with the UTF-8 charset.
    ///
    /// A `mime` that already names a charset is used unchanged.
    pub fn set_content_type(&mut self, mime: &str) {
        if mime.to_ascii_lowercase().contains("charset=") {
            self.headers.set("Content-Type", mime);
        } else {
            self.headers
                .set("Content-Type", format!("{mime}; charset={CHARSET}"));
        }
    }

    /// Marks the response as not cacheable by browsers or proxies.
    pub fn no_cache(&mut self) {
        self.headers.set("Cache-Control", "no-cache");
        self.headers.set("Pragma", "no-cache");
        self.headers.set("Expires", "0");
    }

    /// Appends text to the body.
    pub fn write(&mut self, text: &str) {
        self.body.put_slice(text.as_bytes());
    }

    /// Returns a writer that appends raw bytes to the body.
    pub fn writer(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Discards everything written to the body so far.
    pub fn clear(&mut self) {
        self.body.clear();
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as text when it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
