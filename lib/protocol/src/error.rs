use oxrdf::Quad;
use oxrdfio::{RdfFormat, RdfParseError, RdfParser};
use std::error::Error;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The result type of every remote operation.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

type SharedSource = Arc<dyn Error + Send + Sync + 'static>;

/// An error raised while talking to a remote SPARQL endpoint.
///
/// Errors reported by the server are classified exactly once (see
/// [`ErrorClassifier`](crate::ErrorClassifier)) and then handed to the caller unchanged. The
/// type is [`Clone`] so that a terminal error of a streaming result can be observed
/// repeatedly.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The connection could not be established or broke down while the request was in flight.
    #[error("Transport error: {0}")]
    Transport(#[source] SharedSource),
    /// The server answered with `401 Unauthorized`.
    #[error("The server requires authentication")]
    AuthenticationRequired,
    /// The server answered with `503 Service Unavailable`.
    #[error("The operation was interrupted by the server")]
    Interrupted,
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    #[error("Malformed data: {0}")]
    MalformedData(String),
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("Unsupported query language: {0}")]
    UnsupportedQueryLanguage(String),
    /// The server rejected the data and attached a validation report.
    #[error(transparent)]
    ValidationFailed(ValidationReport),
    /// The server sent an error payload that could not be interpreted.
    #[error("Unable to classify the server error: {0}")]
    ClassificationFailed(String),
    /// A generic error response.
    #[error("The server answered with status {status}: {message}")]
    RemoteFailure { status: u16, message: String },
    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The response does not have the shape required by the protocol.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// The response body could not be parsed.
    #[error("Unable to parse the results: {0}")]
    ResultsParsing(#[source] SharedSource),
    /// The operation is not valid in the current local state. No request has been sent.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// The request could not be built from the given arguments. No request has been sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The consumer or the session cancelled the operation.
    #[error("The operation has been cancelled")]
    Cancelled,
    /// The session has been closed.
    #[error("The session is closed")]
    Closed,
    /// A background worker could not be started.
    #[error("Unable to start a background worker: {0}")]
    WorkerSpawn(#[source] SharedSource),
}

impl ProtocolError {
    pub fn transport(error: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::Transport(Arc::from(error.into()))
    }

    pub fn results_parsing(error: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::ResultsParsing(Arc::from(error.into()))
    }

    pub fn worker_spawn(error: io::Error) -> Self {
        Self::WorkerSpawn(Arc::new(error))
    }

    /// Returns `true` if the error was raised locally without any network traffic.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_)
                | Self::InvalidRequest(_)
                | Self::Cancelled
                | Self::Closed
                | Self::WorkerSpawn(_)
        )
    }
}

impl From<ProtocolError> for io::Error {
    #[inline]
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Transport(_) => Self::new(io::ErrorKind::ConnectionAborted, error),
            ProtocolError::AuthenticationRequired => {
                Self::new(io::ErrorKind::PermissionDenied, error)
            }
            ProtocolError::Interrupted | ProtocolError::Cancelled => {
                Self::new(io::ErrorKind::Interrupted, error)
            }
            ProtocolError::NotFound(_) => Self::new(io::ErrorKind::NotFound, error),
            ProtocolError::MalformedData(_)
            | ProtocolError::ResultsParsing(_)
            | ProtocolError::ProtocolViolation(_) => Self::new(io::ErrorKind::InvalidData, error),
            ProtocolError::MalformedQuery(_)
            | ProtocolError::InvalidRequest(_)
            | ProtocolError::UnsupportedFormat(_)
            | ProtocolError::UnsupportedQueryLanguage(_) => {
                Self::new(io::ErrorKind::InvalidInput, error)
            }
            _ => Self::other(error),
        }
    }
}

/// A validation report attached to a rejected write.
///
/// The report is kept as raw bytes. Use [`ValidationReport::parse`] to read it as RDF.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    content_type: String,
    serialization: String,
    format: RdfFormat,
    report: Arc<[u8]>,
}

impl ValidationReport {
    pub fn new(
        content_type: impl Into<String>,
        serialization: impl Into<String>,
        format: RdfFormat,
        report: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            serialization: serialization.into(),
            format,
            report: report.into(),
        }
    }

    /// The content type declared by the server, e.g. `application/shacl-validation-report+turtle`.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The media type of the serialization, e.g. `text/turtle`.
    pub fn serialization(&self) -> &str {
        &self.serialization
    }

    pub fn format(&self) -> RdfFormat {
        self.format
    }

    pub fn report(&self) -> &[u8] {
        &self.report
    }

    /// Parses the report into quads.
    pub fn parse(&self) -> Result<Vec<Quad>, RdfParseError> {
        RdfParser::from_format(self.format)
            .for_reader(self.report.as_ref())
            .collect()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "The server rejected the data with a validation report serialized as {}",
            self.serialization
        )
    }
}

impl Error for ValidationReport {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_keeps_source() {
        let error = ProtocolError::transport(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        let cloned = error.clone();
        assert_eq!(cloned.to_string(), "Transport error: timeout");
        assert!(cloned.source().is_some());
    }

    #[test]
    fn io_error_kind_follows_variant() {
        let error: io::Error = ProtocolError::NotFound("ns".to_owned()).into();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
        let error: io::Error = ProtocolError::Cancelled.into();
        assert_eq!(error.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn validation_report_parses_quads() {
        let report = ValidationReport::new(
            "application/shacl-validation-report+n-triples",
            "application/n-triples",
            RdfFormat::NTriples,
            b"<http://example.com/r> <http://www.w3.org/ns/shacl#conforms> \"false\"^^<http://www.w3.org/2001/XMLSchema#boolean> .\n".as_slice(),
        );
        let quads = report.parse().unwrap();
        assert_eq!(quads.len(), 1);
        assert!(ProtocolError::ValidationFailed(report)
            .to_string()
            .contains("application/n-triples"));
    }
}
