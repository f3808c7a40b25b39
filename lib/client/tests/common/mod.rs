#![allow(dead_code)]

use parking_lot::Mutex;
use rdf_fusion_client::http::{
    HttpClient, HttpRequest, HttpResponse, Method, ReleaseReason, RequestBody, StatusCode, Url,
};
use rdf_fusion_client::{ProtocolError, ProtocolSession, SessionConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const REPOSITORY_URL: &str = "http://example.com/rdf4j-server/repositories/test";

/// A request as seen by [`FakeClient`], with its body read to the end.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn params(&self, name: &str) -> Vec<String> {
        self.url
            .query_pairs()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn action(&self) -> Option<String> {
        self.param("action")
    }
}

#[derive(Debug, Clone)]
pub struct Scripted {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Scripted {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Scripted + Send + Sync>;

/// An in-memory [`HttpClient`] answering with scripted responses.
///
/// Queued responses are used first, then the responder. Without either the client answers
/// `500`.
#[derive(Default)]
pub struct FakeClient {
    queued: Mutex<VecDeque<Scripted>>,
    responder: Mutex<Option<Arc<Responder>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    releases: Arc<Mutex<Vec<ReleaseReason>>>,
    closed: AtomicBool,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn push(&self, response: Scripted) {
        self.queued.lock().push_back(response);
    }

    pub fn respond_with(&self, responder: impl Fn(&RecordedRequest) -> Scripted + Send + Sync + 'static) {
        *self.responder.lock() = Some(Arc::new(Box::new(responder)));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("no request was sent")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn releases(&self) -> Vec<ReleaseReason> {
        self.releases.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl HttpClient for FakeClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let body = match request.body {
            RequestBody::Empty => Vec::new(),
            RequestBody::Bytes(bytes) => bytes,
            RequestBody::Stream(mut reader) => {
                let mut bytes = Vec::new();
                reader
                    .read_to_end(&mut bytes)
                    .map_err(ProtocolError::transport)?;
                bytes
            }
        };
        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        };
        self.requests.lock().push(recorded.clone());

        let queued = self.queued.lock().pop_front();
        let scripted = match queued {
            Some(scripted) => scripted,
            None => {
                let responder = self.responder.lock().clone();
                match responder {
                    Some(responder) => responder(&recorded),
                    None => Scripted::new(500).with_body("no scripted response"),
                }
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &scripted.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let releases = Arc::clone(&self.releases);
        Ok(HttpResponse::new(
            StatusCode::from_u16(scripted.status).unwrap(),
            headers,
            Cursor::new(scripted.body),
        )
        .with_release_hook(move |reason| releases.lock().push(reason)))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn session(client: &Arc<FakeClient>) -> ProtocolSession {
    session_with_config(client, SessionConfig::default())
}

pub fn session_with_config(client: &Arc<FakeClient>, config: SessionConfig) -> ProtocolSession {
    let client: Arc<dyn HttpClient> = Arc::<FakeClient>::clone(client);
    let session = ProtocolSession::new(client, config);
    session.set_repository(REPOSITORY_URL);
    session
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn json_solutions(values: &[&str]) -> String {
    let bindings = values
        .iter()
        .map(|value| format!(r#"{{"s":{{"type":"uri","value":"{value}"}}}}"#))
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"head":{{"vars":["s"]}},"results":{{"bindings":[{bindings}]}}}}"#)
}
