//! An incoming call as handed over by the host server.

use bytes::Bytes;

use super::{Headers, Method};

/// A request the host has already read off the wire.
///
/// Built with [`Request::new`] and the chained setters. The query string
/// is kept raw and decoded on demand by [`query_pairs`](Self::query_pairs).
///
/// # Examples
///
/// ```
/// use remoting::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/rpc/Demo.Calculator/add")
///     .query("a=1&b=two%20words")
///     .header("User-Agent", "curl/8");
///
/// assert_eq!(request.path(), "/rpc/Demo.Calculator/add");
/// assert_eq!(request.query_param("b").as_deref(), Some("two words"));
/// assert_eq!(request.headers().get("user-agent"), Some("curl/8"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Creates a request with no query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the raw query string (without the leading `?`).
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Decodes the query string as `application/x-www-form-urlencoded` pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the decoded value of the first query parameter named `key`.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_decode_plus_and_percent() {
        let req = Request::new(Method::Get, "/").query("name=J%C3%BCrgen+M&x=%7B%7D");
        assert_eq!(
            req.query_pairs(),
            vec![
                ("name".to_owned(), "Jürgen M".to_owned()),
                ("x".to_owned(), "{}".to_owned()),
            ]
        );
    }

    #[test]
    fn no_query_means_no_pairs() {
        let req = Request::new(Method::Post, "/rpc/Svc");
        assert!(req.query_pairs().is_empty());
        assert_eq!(req.query_param("a"), None);
    }

    #[test]
    fn body_is_kept_verbatim() {
        let req = Request::new(Method::Post, "/").body(r#"{"a":1}"#);
        assert_eq!(&req.body_bytes()[..], br#"{"a":1}"#);
    }
}
