use crate::results::QueryForm;
use oxrdf::{GraphName, NamedNode, Term};
use oxrdfio::RdfFormat;
use rdf_fusion_protocol::protocol::{
    encode_value, Action, BASE_URI_PARAM_NAME, BINDING_PREFIX, DEFAULT_GRAPH_PARAM_NAME,
    INCLUDE_INFERRED_PARAM_NAME, INSERT_GRAPH_PARAM_NAME, NAMED_GRAPH_PARAM_NAME,
    QUERY_LANGUAGE_PARAM_NAME, QUERY_PARAM_NAME, REMOVE_GRAPH_PARAM_NAME, TIMEOUT_PARAM_NAME,
    UPDATE_PARAM_NAME, USING_GRAPH_PARAM_NAME, USING_NAMED_GRAPH_PARAM_NAME,
};
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

pub(crate) type Params = Vec<(String, String)>;

/// The language of a query or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryLanguage {
    #[default]
    Sparql,
}

impl QueryLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sparql => "SPARQL",
        }
    }
}

/// The graphs a query is evaluated against. Empty lists leave the choice to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDataset {
    pub default_graphs: Vec<NamedNode>,
    pub named_graphs: Vec<NamedNode>,
}

/// The graphs an update reads from and writes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDataset {
    /// Graphs `DELETE DATA` and `DELETE WHERE` remove from by default.
    pub remove_graphs: Vec<NamedNode>,
    /// The graph `INSERT DATA` writes to by default.
    pub insert_graph: Option<NamedNode>,
    pub using_graphs: Vec<NamedNode>,
    pub using_named_graphs: Vec<NamedNode>,
}

/// A query together with its protocol parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub language: QueryLanguage,
    pub query: String,
    pub base_iri: Option<String>,
    pub dataset: QueryDataset,
    pub include_inferred: bool,
    /// Maximum evaluation time, sent with a resolution of seconds.
    pub timeout: Option<Duration>,
    pub bindings: Vec<(String, Term)>,
    /// The expected answer shape. Detected from the query when absent.
    pub form: Option<QueryForm>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            language: QueryLanguage::Sparql,
            query: query.into(),
            base_iri: None,
            dataset: QueryDataset::default(),
            include_inferred: true,
            timeout: None,
            bindings: Vec::new(),
            form: None,
        }
    }

    #[must_use]
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Self {
        self.base_iri = Some(base_iri.into());
        self
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: QueryDataset) -> Self {
        self.dataset = dataset;
        self
    }

    #[must_use]
    pub fn with_include_inferred(mut self, include_inferred: bool) -> Self {
        self.include_inferred = include_inferred;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Term>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_form(mut self, form: QueryForm) -> Self {
        self.form = Some(form);
        self
    }

    /// The request parameters. Inside a transaction the query travels in the body instead.
    pub(crate) fn params(&self, include_query: bool) -> Params {
        let mut params = vec![(
            QUERY_LANGUAGE_PARAM_NAME.to_owned(),
            self.language.as_str().to_owned(),
        )];
        if include_query {
            params.push((QUERY_PARAM_NAME.to_owned(), self.query.clone()));
        }
        if let Some(base_iri) = &self.base_iri {
            params.push((BASE_URI_PARAM_NAME.to_owned(), base_iri.clone()));
        }
        params.push((
            INCLUDE_INFERRED_PARAM_NAME.to_owned(),
            self.include_inferred.to_string(),
        ));
        push_timeout(&mut params, self.timeout);
        push_graphs(&mut params, DEFAULT_GRAPH_PARAM_NAME, &self.dataset.default_graphs);
        push_graphs(&mut params, NAMED_GRAPH_PARAM_NAME, &self.dataset.named_graphs);
        push_bindings(&mut params, &self.bindings);
        params
    }
}

/// An update together with its protocol parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub language: QueryLanguage,
    pub update: String,
    pub base_iri: Option<String>,
    pub dataset: UpdateDataset,
    pub include_inferred: bool,
    pub timeout: Option<Duration>,
    pub bindings: Vec<(String, Term)>,
}

impl UpdateRequest {
    pub fn new(update: impl Into<String>) -> Self {
        Self {
            language: QueryLanguage::Sparql,
            update: update.into(),
            base_iri: None,
            dataset: UpdateDataset::default(),
            include_inferred: true,
            timeout: None,
            bindings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Self {
        self.base_iri = Some(base_iri.into());
        self
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: UpdateDataset) -> Self {
        self.dataset = dataset;
        self
    }

    #[must_use]
    pub fn with_include_inferred(mut self, include_inferred: bool) -> Self {
        self.include_inferred = include_inferred;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Term>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    pub(crate) fn params(&self, include_update: bool) -> Params {
        let mut params = vec![(
            QUERY_LANGUAGE_PARAM_NAME.to_owned(),
            self.language.as_str().to_owned(),
        )];
        if include_update {
            params.push((UPDATE_PARAM_NAME.to_owned(), self.update.clone()));
        }
        if let Some(base_iri) = &self.base_iri {
            params.push((BASE_URI_PARAM_NAME.to_owned(), base_iri.clone()));
        }
        params.push((
            INCLUDE_INFERRED_PARAM_NAME.to_owned(),
            self.include_inferred.to_string(),
        ));
        push_graphs(&mut params, REMOVE_GRAPH_PARAM_NAME, &self.dataset.remove_graphs);
        push_graphs(
            &mut params,
            INSERT_GRAPH_PARAM_NAME,
            self.dataset.insert_graph.as_slice(),
        );
        push_graphs(&mut params, USING_GRAPH_PARAM_NAME, &self.dataset.using_graphs);
        push_graphs(
            &mut params,
            USING_NAMED_GRAPH_PARAM_NAME,
            &self.dataset.using_named_graphs,
        );
        push_timeout(&mut params, self.timeout);
        push_bindings(&mut params, &self.bindings);
        params
    }
}

fn push_graphs(params: &mut Params, name: &str, graphs: &[NamedNode]) {
    params.extend(
        graphs
            .iter()
            .map(|graph| (name.to_owned(), graph.as_str().to_owned())),
    );
}

fn push_timeout(params: &mut Params, timeout: Option<Duration>) {
    if let Some(timeout) = timeout.filter(|timeout| timeout.as_secs() > 0) {
        params.push((TIMEOUT_PARAM_NAME.to_owned(), timeout.as_secs().to_string()));
    }
}

fn push_bindings(params: &mut Params, bindings: &[(String, Term)]) {
    params.extend(bindings.iter().map(|(name, value)| {
        (
            format!("{BINDING_PREFIX}{name}"),
            encode_value(value.as_ref()),
        )
    }));
}

/// Data sent to the repository.
pub enum UploadContent {
    Bytes(Vec<u8>),
    /// An encoded document of unknown length.
    Reader(Box<dyn Read + Send>),
    /// UTF-8 text of unknown length. The reader is dropped as soon as it is exhausted or fails.
    Text(Box<dyn Read + Send>),
}

impl fmt::Debug for UploadContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Reader(_) => f.write_str("Reader"),
            Self::Text(_) => f.write_str("Text"),
        }
    }
}

/// An upload of RDF data, or a removal of it inside a transaction.
#[derive(Debug)]
pub struct UploadRequest {
    pub content: UploadContent,
    pub format: RdfFormat,
    pub base_iri: Option<String>,
    /// Replaces the statements of the target graphs instead of adding to them.
    pub overwrite: bool,
    pub preserve_blank_node_ids: bool,
    /// [`Action::Add`] or, inside a transaction, [`Action::Delete`].
    pub action: Action,
    /// The target graphs. Empty means all graphs.
    pub contexts: Vec<GraphName>,
}

impl UploadRequest {
    pub fn new(content: UploadContent, format: RdfFormat) -> Self {
        Self {
            content,
            format,
            base_iri: None,
            overwrite: false,
            preserve_blank_node_ids: true,
            action: Action::Add,
            contexts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Self {
        self.base_iri = Some(base_iri.into());
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_preserve_blank_node_ids(mut self, preserve: bool) -> Self {
        self.preserve_blank_node_ids = preserve;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn with_contexts(mut self, contexts: impl IntoIterator<Item = GraphName>) -> Self {
        self.contexts = contexts.into_iter().collect();
        self
    }
}

/// Drops its source exactly once, as soon as it is exhausted or fails.
pub(crate) struct ClosingReader {
    inner: Option<Box<dyn Read + Send>>,
}

impl ClosingReader {
    pub(crate) fn new(inner: Box<dyn Read + Send>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Read for ClosingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(inner) = &mut self.inner else {
            return Ok(0);
        };
        match inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.inner = None;
                Ok(0)
            }
            Ok(read) => Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => Err(error),
            Err(error) => {
                self.inner = None;
                Err(error)
            }
        }
    }
}
