use crate::error::{ProtocolError, ValidationReport};
use crate::format::{media_type_essence, ResultFormat};
use oxrdfio::RdfFormat;

/// Content type marker of validation report payloads, followed by `+<serialization>`.
const VALIDATION_REPORT_MARKER: &str = "shacl-validation-report+";

/// Kinds of structured error payloads sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedQuery,
    MalformedData,
    UnsupportedQueryLanguage,
    UnsupportedFileFormat,
}

impl ErrorKind {
    const ALL: [Self; 4] = [
        Self::MalformedQuery,
        Self::MalformedData,
        Self::UnsupportedQueryLanguage,
        Self::UnsupportedFileFormat,
    ];

    /// The label used on the wire.
    pub fn label(self) -> &'static str {
        match self {
            Self::MalformedQuery => "MALFORMED QUERY",
            Self::MalformedData => "MALFORMED DATA",
            Self::UnsupportedQueryLanguage => "UNSUPPORTED QUERY LANGUAGE",
            Self::UnsupportedFileFormat => "UNSUPPORTED FILE FORMAT",
        }
    }

    /// Parses a wire label. Underscores are accepted in place of spaces.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|kind| {
            kind.label().len() == label.len()
                && kind
                    .label()
                    .bytes()
                    .zip(label.bytes())
                    .all(|(expected, actual)| {
                        expected.eq_ignore_ascii_case(&actual)
                            || (expected == b' ' && actual == b'_')
                    })
        })
    }

    fn into_error(self, message: String) -> ProtocolError {
        match self {
            Self::MalformedQuery => ProtocolError::MalformedQuery(message),
            Self::MalformedData => ProtocolError::MalformedData(message),
            Self::UnsupportedQueryLanguage => ProtocolError::UnsupportedQueryLanguage(message),
            Self::UnsupportedFileFormat => ProtocolError::UnsupportedFormat(message),
        }
    }
}

/// A structured error payload of the form `KIND: message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl ErrorPayload {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some((label, message)) = text.split_once(':') {
            if let Some(kind) = ErrorKind::from_label(label) {
                return Self {
                    kind: Some(kind),
                    message: message.trim().to_owned(),
                };
            }
        }
        Self {
            kind: None,
            message: text.to_owned(),
        }
    }
}

/// The body of an error response, read eagerly by the executor.
#[derive(Debug, Clone, Default)]
pub struct ErrorBody {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ErrorBody {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_owned()
    }
}

/// Maps an HTTP status and an optional error payload to a [`ProtocolError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Whether the classifier reads the body for the given status.
    ///
    /// The executor uses this to avoid downloading bodies that are ignored anyway.
    pub fn requires_body(status: u16) -> bool {
        !matches!(status, 401 | 503)
    }

    pub fn classify(status: u16, reason: Option<&str>, body: Option<&ErrorBody>) -> ProtocolError {
        match status {
            401 => return ProtocolError::AuthenticationRequired,
            503 => return ProtocolError::Interrupted,
            _ => (),
        }

        let text = body.map(ErrorBody::text).unwrap_or_default();
        let payload = ErrorPayload::parse(&text);
        if let Some(kind) = payload.kind {
            return kind.into_error(payload.message);
        }

        if let Some(content_type) = body.and_then(|body| body.content_type.as_deref()) {
            if let Some(error) = classify_validation_report(content_type, body) {
                return error;
            }
        }

        let message = if payload.message.is_empty() {
            reason.unwrap_or_default().to_owned()
        } else {
            payload.message
        };
        if status == 404 {
            return ProtocolError::NotFound(message);
        }
        ProtocolError::RemoteFailure { status, message }
    }
}

fn classify_validation_report(
    content_type: &str,
    body: Option<&ErrorBody>,
) -> Option<ProtocolError> {
    let essence = media_type_essence(content_type);
    let (media_type, serialization) = essence.split_once('/')?;
    let suffix = serialization
        .to_ascii_lowercase()
        .strip_prefix(VALIDATION_REPORT_MARKER)?
        .to_owned();
    // application/shacl-validation-report+turtle is served as text/turtle and so on
    let candidates = [
        format!("text/{suffix}"),
        format!("{media_type}/{suffix}"),
        format!("application/{suffix}"),
    ];
    let Some((serialization, format)) = candidates.into_iter().find_map(|candidate| {
        <RdfFormat as ResultFormat>::from_media_type(&candidate).map(|format| (candidate, format))
    }) else {
        return Some(ProtocolError::ClassificationFailed(format!(
            "No RDF serialization is known for the validation report content type {content_type}"
        )));
    };
    let bytes = body.map(|body| body.bytes.as_slice()).unwrap_or_default();
    Some(ProtocolError::ValidationFailed(ValidationReport::new(
        content_type,
        serialization,
        format,
        bytes,
    )))
}
