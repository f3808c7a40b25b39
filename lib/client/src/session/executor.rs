use crate::http::{HttpClient, HttpRequest, HttpResponse, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::RwLock;
use rdf_fusion_protocol::{ErrorBody, ErrorClassifier, ProtocolError};
use std::sync::Arc;
use tracing::debug;

/// How a request treats a `404 Not Found` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotFoundPolicy {
    /// The response is handed to the caller, which interprets the absence itself.
    PassThrough,
    /// The response fails with [`ProtocolError::NotFound`].
    Fail,
}

pub(crate) type Headers = Arc<[(String, String)]>;

/// The single choke point for outgoing requests.
pub(crate) struct RequestExecutor {
    client: RwLock<Option<Arc<dyn HttpClient>>>,
    owns_client: bool,
    authorization: RwLock<Option<String>>,
    additional_headers: RwLock<Headers>,
}

impl RequestExecutor {
    pub(crate) fn new(client: Arc<dyn HttpClient>, owns_client: bool) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            owns_client,
            authorization: RwLock::new(None),
            additional_headers: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Sends HTTP Basic credentials with every request, or stops sending them.
    pub(crate) fn set_credentials(&self, credentials: Option<(&str, &str)>) {
        *self.authorization.write() = credentials.map(|(username, password)| {
            format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
        });
    }

    /// Replaces the headers appended to every request. Running requests keep the old snapshot.
    pub(crate) fn set_additional_headers(&self, headers: Vec<(String, String)>) {
        *self.additional_headers.write() = headers.into();
    }

    pub(crate) fn additional_headers(&self) -> Headers {
        Arc::clone(&*self.additional_headers.read())
    }

    /// Sends a request and classifies error responses.
    ///
    /// Successful responses are returned with their body untouched.
    pub(crate) fn execute(
        &self,
        mut request: HttpRequest,
        not_found: NotFoundPolicy,
    ) -> Result<HttpResponse, ProtocolError> {
        let client = self.client.read().clone().ok_or(ProtocolError::Closed)?;
        if let Some(authorization) = self.authorization.read().clone() {
            request
                .headers
                .push(("Authorization".to_owned(), authorization));
        }
        request
            .headers
            .extend(self.additional_headers().iter().cloned());

        debug!("Sending {} {}", request.method, request.url);
        let response = client.execute(request)?;
        let status = response.status();
        if status.is_success()
            || (status == StatusCode::NOT_FOUND && not_found == NotFoundPolicy::PassThrough)
        {
            return Ok(response);
        }

        let body = if ErrorClassifier::requires_body(status.as_u16()) {
            let content_type = response.content_type().map(ToOwned::to_owned);
            // An unreadable error body is classified like an empty one.
            let bytes = response.bytes().unwrap_or_default();
            Some(ErrorBody {
                content_type,
                bytes,
            })
        } else {
            None
        };
        let error =
            ErrorClassifier::classify(status.as_u16(), status.canonical_reason(), body.as_ref());
        debug!("Request failed with status {status}: {error}");
        Err(error)
    }

    /// Sends a request that must be answered with `200 OK` or `203 Non-Authoritative
    /// Information`.
    pub(crate) fn execute_ok(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let response = self.execute(request, NotFoundPolicy::Fail)?;
        match response.status() {
            StatusCode::OK | StatusCode::NON_AUTHORITATIVE_INFORMATION => Ok(response),
            status => Err(ProtocolError::ProtocolViolation(format!(
                "Expected status 200 but the server answered with {status}"
            ))),
        }
    }

    /// Sends a request that must be answered with any `2xx` status. The body is discarded.
    pub(crate) fn execute_no_content(&self, request: HttpRequest) -> Result<(), ProtocolError> {
        self.execute(request, NotFoundPolicy::Fail)?;
        Ok(())
    }

    /// Detaches the client. It is closed only if the session created it.
    pub(crate) fn close(&self) {
        let Some(client) = self.client.write().take() else {
            return;
        };
        if self.owns_client {
            client.close();
        } else {
            debug!("Leaving the injected HTTP client open");
        }
    }
}
