//! The HTTP transport used by the session.
//!
//! The session only talks to the network through [`HttpClient`], so applications can bring their
//! own transport (authentication, proxies, pooling). [`ReqwestHttpClient`] is the bundled
//! implementation.

use parking_lot::RwLock;
use rdf_fusion_protocol::ProtocolError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

pub use reqwest::{Method, StatusCode, Url};

/// A request body.
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// A body of unknown length, sent with chunked transfer encoding.
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// An outgoing request.
///
/// Headers are kept in insertion order. When a name occurs more than once the last value wins.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// The effective value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Why a response body has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The body has been read or dropped by its owner.
    Completed,
    /// The consumer gave up on the body before it was fully read.
    Aborted,
}

/// Called exactly once when a response body is released.
pub type ReleaseHook = Box<dyn FnOnce(ReleaseReason) + Send>;

/// A response whose body has not been consumed yet.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Box<dyn Read + Send>>,
    release: Option<ReleaseHook>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            headers,
            body: Some(Box::new(body)),
            release: None,
        }
    }

    /// Registers a callback that observes the release of the body.
    #[must_use]
    pub fn with_release_hook(mut self, hook: impl FnOnce(ReleaseReason) + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }

    /// Reads the whole body and releases it.
    pub fn bytes(mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut buffer = Vec::new();
        if let Some(body) = &mut self.body {
            body.read_to_end(&mut buffer)
                .map_err(ProtocolError::transport)?;
        }
        Ok(buffer)
    }

    /// Reads the whole body as UTF-8 text and releases it.
    pub fn text(self) -> Result<String, ProtocolError> {
        String::from_utf8(self.bytes()?).map_err(ProtocolError::results_parsing)
    }

    /// Hands the body and its release hook over to the caller.
    pub fn into_body(mut self) -> (Box<dyn Read + Send>, Option<ReleaseHook>) {
        let body = self
            .body
            .take()
            .unwrap_or_else(|| Box::new(io::empty()));
        (body, self.release.take())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        drop(self.body.take());
        if let Some(release) = self.release.take() {
            release(ReleaseReason::Completed);
        }
    }
}

/// Executes HTTP requests.
///
/// Implementations must not retry failed requests and must return the response as soon as the
/// headers are available, without reading the body.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError>;

    /// Releases the resources of the client. Later requests fail with [`ProtocolError::Closed`].
    fn close(&self) {}
}

/// A [`HttpClient`] backed by a blocking [`reqwest`] client.
#[derive(Debug)]
pub struct ReqwestHttpClient {
    client: RwLock<Option<reqwest::blocking::Client>>,
}

impl ReqwestHttpClient {
    pub fn new(connection_timeout: Option<Duration>) -> Result<Self, ProtocolError> {
        // Result streams may stay open for a long time, hence no overall timeout.
        let mut builder = reqwest::blocking::Client::builder().timeout(None::<Duration>);
        if let Some(connection_timeout) = connection_timeout {
            builder = builder.connect_timeout(connection_timeout);
        }
        let client = builder.build().map_err(ProtocolError::transport)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let client = self.client.read().clone().ok_or(ProtocolError::Closed)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProtocolError::InvalidRequest(format!("Invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProtocolError::InvalidRequest(format!("Invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let builder = client.request(request.method, request.url).headers(headers);
        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream(reader) => builder.body(reqwest::blocking::Body::new(reader)),
        };
        let response = builder.send().map_err(ProtocolError::transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        Ok(HttpResponse::new(status, headers, response))
    }

    fn close(&self) {
        self.client.write().take();
    }
}
