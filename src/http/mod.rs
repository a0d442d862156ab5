//! Host-facing HTTP values.
//!
//! The host web server owns the wire. It builds a [`Request`] for each
//! incoming call and writes out the [`Response`] this crate hands back, so
//! nothing in here touches sockets or raw bytes on the wire.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// Status codes the dispatcher and router can produce.
///
/// Failures inside a call are reported in the body of a `200 OK`; the
/// other codes are only used by the router when a call cannot be bound.
///
/// # Examples
///
/// ```
/// use remoting::http::StatusCode;
///
/// let status = StatusCode::NotFound;
/// assert_eq!(status.as_u16(), 404);
/// assert_eq!(status.canonical_reason(), "Not Found");
/// assert!(!status.is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    InternalServerError = 500,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    /// Returns `true` for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// The HTTP method of an incoming call.
///
/// Only `GET` and `POST` carry remote calls; everything else is kept
/// verbatim so the router can reject it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Parameters travel in the query string.
    Get,
    /// Parameters travel in the request body.
    Post,
    /// Any other method, as sent by the client.
    Other(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("GET") {
            Self::Get
        } else if s.eq_ignore_ascii_case("POST") {
            Self::Post
        } else {
            Self::Other(s.to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("post".parse::<Method>(), Ok(Method::Post));
        assert_eq!("GET".parse::<Method>(), Ok(Method::Get));
        assert_eq!(
            "DELETE".parse::<Method>(),
            Ok(Method::Other("DELETE".to_owned()))
        );
    }

    #[test]
    fn status_display() {
        assert_eq!(StatusCode::MethodNotAllowed.to_string(), "405 Method Not Allowed");
        assert!(StatusCode::Ok.is_success());
    }
}
