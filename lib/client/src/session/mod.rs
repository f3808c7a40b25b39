//! The session turning repository operations into HTTP requests.

pub(crate) mod executor;
mod request;

use crate::config::{ParserConfig, SessionConfig};
use crate::http::{
    HttpClient, HttpRequest, HttpResponse, Method, ReqwestHttpClient, RequestBody, Url,
};
use crate::results::{
    parse_boolean, GraphQueryResult, Namespaces, ProducerRegistry, QueryForm, QueryResponse,
    RdfResultParser, ResultProducer, StatementsResult, TupleQueryResult, TupleResultParser,
};
use crate::transaction::{
    parse_url, with_action, TransactionController, TransactionSetting, TransactionStatus,
};
use executor::RequestExecutor;
use oxrdf::{GraphName, NamedNodeRef, NamedOrBlankNodeRef, Term, TermRef};
use oxrdfio::RdfFormat;
use parking_lot::RwLock;
use rdf_fusion_protocol::content_negotiation::{
    accept_header, match_media_type, rdf_accept_header,
};
use rdf_fusion_protocol::protocol::{
    contexts_location, encode_contexts, encode_value, namespace_prefix_location,
    namespaces_location, protocol_location, repositories_location, repository_location,
    size_location, statements_location, Action, BASE_URI_PARAM_NAME, CONTEXT_PARAM_NAME,
    FORM_MIME_TYPE, INCLUDE_INFERRED_PARAM_NAME, OBJECT_PARAM_NAME, PREDICATE_PARAM_NAME,
    PRESERVE_BNODE_ID_PARAM_NAME, SPARQL_QUERY_MIME_TYPE, SPARQL_UPDATE_MIME_TYPE,
    SUBJECT_PARAM_NAME, TEXT_PLAIN_MIME_TYPE,
};
use rdf_fusion_protocol::{
    BooleanQueryResultFormat, ProtocolError, ResultFormat, TupleQueryResultFormat,
};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use spargebra::Query;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::debug;

pub use executor::NotFoundPolicy;
pub(crate) use request::Params;
pub use request::{
    QueryDataset, QueryLanguage, QueryRequest, UpdateDataset, UpdateRequest, UploadContent,
    UploadRequest,
};

use request::ClosingReader;

const UTF8_CHARSET: &str = "; charset=utf-8";

/// Matches `<server>/repositories/<id>` and captures the server URL.
static REPOSITORY_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.*)/repositories/[^/]*/?$").ok());

#[derive(Debug, Default, Clone)]
struct Endpoints {
    query_url: Option<String>,
    update_url: Option<String>,
    server_url: Option<String>,
    repository_url: Option<String>,
}

/// A connection to a remote SPARQL endpoint or RDF4J-style repository.
///
/// The HTTP round trip of every operation runs on the calling thread. Query results are
/// parsed on a background thread per result and consumed through a [`StreamingResult`].
/// Inside a transaction, all repository operations are sent to the transaction resource and
/// push back the next keep-alive ping.
///
/// Closing the session (explicitly or by dropping it) closes all open results, stops the
/// keep-alive ping and closes the HTTP client if the session created it.
///
/// [`StreamingResult`]: crate::results::StreamingResult
pub struct ProtocolSession {
    executor: Arc<RequestExecutor>,
    transaction: TransactionController,
    registry: Arc<ProducerRegistry>,
    endpoints: RwLock<Endpoints>,
    config: RwLock<SessionConfig>,
    closed: AtomicBool,
}

impl ProtocolSession {
    /// Creates a session on top of an injected client. The client is not closed with the
    /// session.
    pub fn new(client: Arc<dyn HttpClient>, config: SessionConfig) -> Self {
        Self::with_client(client, false, config)
    }

    /// Creates a session with its own [`ReqwestHttpClient`].
    pub fn with_reqwest(config: SessionConfig) -> Result<Self, ProtocolError> {
        let client = ReqwestHttpClient::new(config.connection_timeout)?;
        Ok(Self::with_client(Arc::new(client), true, config))
    }

    fn with_client(client: Arc<dyn HttpClient>, owns_client: bool, config: SessionConfig) -> Self {
        let executor = Arc::new(RequestExecutor::new(client, owns_client));
        let transaction =
            TransactionController::new(Arc::clone(&executor), config.initial_ping_delay());
        Self {
            executor,
            transaction,
            registry: Arc::default(),
            endpoints: RwLock::default(),
            config: RwLock::new(config),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.config.read().clone()
    }

    pub fn query_url(&self) -> Option<String> {
        self.endpoints.read().query_url.clone()
    }

    pub fn set_query_url(&self, url: impl Into<String>) {
        self.endpoints.write().query_url = Some(url.into());
    }

    pub fn update_url(&self) -> Option<String> {
        self.endpoints.read().update_url.clone()
    }

    pub fn set_update_url(&self, url: impl Into<String>) {
        self.endpoints.write().update_url = Some(url.into());
    }

    pub fn server_url(&self) -> Option<String> {
        self.endpoints.read().server_url.clone()
    }

    pub fn set_server_url(&self, url: impl Into<String>) {
        self.endpoints.write().server_url = Some(url.into());
    }

    pub fn repository_url(&self) -> Option<String> {
        self.endpoints.read().repository_url.clone()
    }

    /// Points the session at a repository.
    ///
    /// Queries go to the repository URL and updates to its `statements` resource. For URLs of
    /// the form `<server>/repositories/<id>` the server URL is derived as well.
    pub fn set_repository(&self, repository_url: impl Into<String>) {
        let repository_url = repository_url.into();
        let server_url = REPOSITORY_URL
            .as_ref()
            .and_then(|pattern| pattern.captures(&repository_url))
            .and_then(|captures| captures.get(1))
            .map(|server| server.as_str().to_owned());
        let mut endpoints = self.endpoints.write();
        endpoints.query_url = Some(repository_url.clone());
        endpoints.update_url = Some(statements_location(&repository_url));
        if server_url.is_some() {
            endpoints.server_url = server_url;
        }
        endpoints.repository_url = Some(repository_url);
    }

    /// Selects a repository of the configured server by id.
    pub fn set_repository_id(&self, repository_id: &str) -> Result<(), ProtocolError> {
        let server_url = self.require_server_url()?;
        self.set_repository(repository_location(&server_url, repository_id));
        Ok(())
    }

    /// Replaces the headers appended to every request.
    ///
    /// They are added last, so they override the headers set by the session.
    pub fn set_additional_headers(&self, headers: impl IntoIterator<Item = (String, String)>) {
        self.executor
            .set_additional_headers(headers.into_iter().collect());
    }

    pub fn additional_headers(&self) -> Vec<(String, String)> {
        self.executor.additional_headers().to_vec()
    }

    /// Authenticates every following request with HTTP Basic credentials.
    ///
    /// An `Authorization` entry of the additional headers still takes precedence.
    pub fn set_username_and_password(&self, username: &str, password: &str) {
        debug!(
            "Setting username '{username}' and password for server at {}",
            self.query_url().unwrap_or_default()
        );
        self.executor.set_credentials(Some((username, password)));
    }

    /// Stops sending HTTP Basic credentials.
    pub fn clear_username_and_password(&self) {
        self.executor.set_credentials(None);
    }

    pub fn set_preferred_tuple_format(&self, format: TupleQueryResultFormat) {
        self.config.write().preferred_tuple_format = format;
    }

    pub fn set_preferred_boolean_format(&self, format: BooleanQueryResultFormat) {
        self.config.write().preferred_boolean_format = format;
    }

    pub fn set_preferred_rdf_format(&self, format: RdfFormat) {
        self.config.write().preferred_rdf_format = format;
    }

    pub fn set_parser_config(&self, parser_config: ParserConfig) {
        self.config.write().parser_config = parser_config;
    }

    pub fn set_maximum_url_length(&self, maximum_url_length: usize) {
        self.config.write().maximum_url_length = maximum_url_length;
    }

    /// Runs a query whose form is given by the request or detected from the query.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ProtocolError> {
        let form = match request.form {
            Some(form) => form,
            None => detect_query_form(request)?,
        };
        Ok(match form {
            QueryForm::Tuple => self.tuple_query(request)?.into(),
            QueryForm::Boolean => self.boolean_query(request)?.into(),
            QueryForm::Graph => self.graph_query(request)?.into(),
        })
    }

    /// Runs a `SELECT` query. The solutions are parsed in the background.
    pub fn tuple_query(&self, request: &QueryRequest) -> Result<TupleQueryResult, ProtocolError> {
        let config = self.config();
        let accept = accept_header(config.preferred_tuple_format);
        let (response, _) = self.send_query(request, &accept)?;
        let format = response_format(&response, config.preferred_tuple_format)?;
        debug!("Parsing solutions as {}", format.media_type());
        ResultProducer::start(
            TupleResultParser::new(format),
            response,
            config.queue_capacity,
            &self.registry,
        )
    }

    /// Runs a `CONSTRUCT` or `DESCRIBE` query. The triples are parsed in the background.
    pub fn graph_query(&self, request: &QueryRequest) -> Result<GraphQueryResult, ProtocolError> {
        let config = self.config();
        let accept = rdf_accept_header(false, config.preferred_rdf_format);
        let (response, url) = self.send_query(request, &accept)?;
        self.start_rdf_parser(response, url, &config)
    }

    /// Runs an `ASK` query.
    pub fn boolean_query(&self, request: &QueryRequest) -> Result<bool, ProtocolError> {
        let config = self.config();
        let accept = accept_header(config.preferred_boolean_format);
        let (response, _) = self.send_query(request, &accept)?;
        let format = response_format(&response, config.preferred_boolean_format)?;
        parse_boolean(format, response.bytes()?.as_slice())
    }

    fn send_query(
        &self,
        request: &QueryRequest,
        accept: &str,
    ) -> Result<(HttpResponse, Url), ProtocolError> {
        let http_request = match self.transaction.active_token() {
            Some(token) => {
                let mut url = with_action(&token, Action::Query);
                url.query_pairs_mut().extend_pairs(request.params(false));
                HttpRequest::new(Method::PUT, url)
                    .with_header(
                        CONTENT_TYPE.as_str(),
                        format!("{SPARQL_QUERY_MIME_TYPE}{UTF8_CHARSET}"),
                    )
                    .with_body(RequestBody::Bytes(request.query.clone().into_bytes()))
            }
            None => {
                let query_url = parse_url(&self.require_query_url()?)?;
                self.get_or_post(query_url, &request.params(true))
            }
        }
        .with_header(ACCEPT.as_str(), accept);
        let url = http_request.url.clone();
        let response = self.execute_transactional(http_request)?;
        Ok((response, url))
    }

    /// Sends the parameters in the query string unless the URL gets too long.
    fn get_or_post(&self, base: Url, params: &Params) -> HttpRequest {
        let mut url = base.clone();
        url.query_pairs_mut().extend_pairs(params);
        let maximum_url_length = self.config.read().maximum_url_length;
        if url.as_str().len() <= maximum_url_length {
            return HttpRequest::new(Method::GET, url);
        }
        debug!(
            "Request URL exceeds {maximum_url_length} characters, sending the parameters as a form"
        );
        HttpRequest::new(Method::POST, base)
            .with_header(CONTENT_TYPE.as_str(), format!("{FORM_MIME_TYPE}{UTF8_CHARSET}"))
            .with_body(RequestBody::Bytes(encode_form(params).into_bytes()))
    }

    /// Executes a request expecting `200` and reschedules the ping if it targets the open
    /// transaction.
    fn execute_transactional(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let in_transaction = self.is_transaction_request(&request);
        let response = self.executor.execute_ok(request)?;
        if in_transaction {
            self.transaction.reschedule_ping();
        }
        Ok(response)
    }

    fn is_transaction_request(&self, request: &HttpRequest) -> bool {
        self.transaction.active_token().is_some_and(|token| {
            request.url.as_str().starts_with(token.as_str())
        })
    }

    fn start_rdf_parser<T: From<oxrdf::Quad> + Send + 'static>(
        &self,
        response: HttpResponse,
        base_iri: Url,
        config: &SessionConfig,
    ) -> Result<crate::results::StreamingResult<T, Namespaces>, ProtocolError> {
        let format = response_format(&response, config.preferred_rdf_format)?;
        debug!("Parsing RDF as {}", format.media_type());
        ResultProducer::start(
            RdfResultParser::new(format, Some(base_iri.into()), config.parser_config),
            response,
            config.queue_capacity,
            &self.registry,
        )
    }

    /// Runs an update. Outside of a transaction it is always sent with `POST`.
    pub fn update(&self, request: &UpdateRequest) -> Result<(), ProtocolError> {
        let http_request = match self.transaction.active_token() {
            Some(token) => {
                let mut url = with_action(&token, Action::Update);
                url.query_pairs_mut().extend_pairs(request.params(false));
                HttpRequest::new(Method::PUT, url)
                    .with_header(
                        CONTENT_TYPE.as_str(),
                        format!("{SPARQL_UPDATE_MIME_TYPE}{UTF8_CHARSET}"),
                    )
                    .with_body(RequestBody::Bytes(request.update.clone().into_bytes()))
            }
            None => HttpRequest::new(Method::POST, parse_url(&self.require_update_url()?)?)
                .with_header(CONTENT_TYPE.as_str(), format!("{FORM_MIME_TYPE}{UTF8_CHARSET}"))
                .with_body(RequestBody::Bytes(
                    encode_form(&request.params(true)).into_bytes(),
                )),
        };
        self.execute_transactional_no_content(http_request)
    }

    /// Streams RDF data to the repository.
    ///
    /// The body is sent with an unknown length. Inside a transaction the data is added or
    /// removed depending on [`UploadRequest::action`], outside of one only additions are
    /// possible.
    pub fn upload(&self, request: UploadRequest) -> Result<(), ProtocolError> {
        let UploadRequest {
            content,
            format,
            base_iri,
            overwrite,
            preserve_blank_node_ids,
            action,
            contexts,
        } = request;
        if !matches!(action, Action::Add | Action::Delete) {
            return Err(ProtocolError::InvalidRequest(format!(
                "{action} is not an upload action"
            )));
        }

        let mut params = context_params(&contexts);
        if let Some(base_iri) = &base_iri {
            let base_iri = oxrdf::NamedNode::new(base_iri.as_str()).map_err(|e| {
                ProtocolError::InvalidRequest(format!("Invalid base IRI {base_iri}: {e}"))
            })?;
            params.push((
                BASE_URI_PARAM_NAME.to_owned(),
                encode_value(base_iri.as_ref().into()),
            ));
        }
        if preserve_blank_node_ids {
            params.push((PRESERVE_BNODE_ID_PARAM_NAME.to_owned(), "true".to_owned()));
        }

        let (method, mut url) = match self.transaction.active_token() {
            Some(token) => (Method::PUT, with_action(&token, action)),
            None if action == Action::Delete => {
                return Err(ProtocolError::InvalidRequest(
                    "Data can only be removed by upload inside a transaction".to_owned(),
                ));
            }
            None => {
                let method = if overwrite { Method::PUT } else { Method::POST };
                (method, parse_url(&statements_location(&self.require_repository_url()?))?)
            }
        };
        url.query_pairs_mut().extend_pairs(&params);

        let media_type = format.media_type();
        let (content_type, body) = match content {
            UploadContent::Bytes(bytes) => (media_type.to_owned(), RequestBody::Bytes(bytes)),
            UploadContent::Reader(reader) => (
                media_type.to_owned(),
                RequestBody::Stream(Box::new(ClosingReader::new(reader))),
            ),
            UploadContent::Text(reader) => (
                format!("{media_type}{UTF8_CHARSET}"),
                RequestBody::Stream(Box::new(ClosingReader::new(reader))),
            ),
        };
        let http_request = HttpRequest::new(method, url)
            .with_header(CONTENT_TYPE.as_str(), content_type)
            .with_body(body);
        self.execute_transactional_no_content(http_request)
    }

    /// Adds RDF data to the given graphs.
    pub fn add_data(
        &self,
        content: UploadContent,
        format: RdfFormat,
        base_iri: Option<&str>,
        contexts: &[GraphName],
    ) -> Result<(), ProtocolError> {
        self.upload(data_request(content, format, base_iri, contexts, Action::Add))
    }

    /// Removes RDF data from the given graphs. Requires an open transaction.
    pub fn remove_data(
        &self,
        content: UploadContent,
        format: RdfFormat,
        base_iri: Option<&str>,
        contexts: &[GraphName],
    ) -> Result<(), ProtocolError> {
        self.upload(data_request(content, format, base_iri, contexts, Action::Delete))
    }

    fn execute_transactional_no_content(&self, request: HttpRequest) -> Result<(), ProtocolError> {
        let in_transaction = self.is_transaction_request(&request);
        self.executor.execute_no_content(request)?;
        if in_transaction {
            self.transaction.reschedule_ping();
        }
        Ok(())
    }

    /// Streams the statements matching a pattern, with their graph names.
    ///
    /// An empty `contexts` list matches all graphs.
    pub fn get_statements(
        &self,
        subject: Option<NamedOrBlankNodeRef<'_>>,
        predicate: Option<NamedNodeRef<'_>>,
        object: Option<TermRef<'_>>,
        include_inferred: bool,
        contexts: &[GraphName],
    ) -> Result<StatementsResult, ProtocolError> {
        let config = self.config();
        let mut params = Params::new();
        if let Some(subject) = subject {
            let subject = match subject {
                NamedOrBlankNodeRef::NamedNode(node) => TermRef::from(node),
                NamedOrBlankNodeRef::BlankNode(node) => TermRef::from(node),
            };
            params.push((SUBJECT_PARAM_NAME.to_owned(), encode_value(subject)));
        }
        if let Some(predicate) = predicate {
            params.push((PREDICATE_PARAM_NAME.to_owned(), encode_value(predicate.into())));
        }
        if let Some(object) = object {
            params.push((OBJECT_PARAM_NAME.to_owned(), encode_value(object)));
        }
        params.extend(context_params(contexts));
        params.push((
            INCLUDE_INFERRED_PARAM_NAME.to_owned(),
            include_inferred.to_string(),
        ));

        let (method, mut url) = self.repository_resource(Action::Get, statements_location)?;
        url.query_pairs_mut().extend_pairs(&params);
        let request = HttpRequest::new(method, url.clone()).with_header(
            ACCEPT.as_str(),
            rdf_accept_header(true, config.preferred_rdf_format),
        );
        let response = self.execute_transactional(request)?;
        self.start_rdf_parser(response, url, &config)
    }

    /// Counts the statements in the given graphs, all graphs if `contexts` is empty.
    pub fn size(&self, contexts: &[GraphName]) -> Result<u64, ProtocolError> {
        let (method, mut url) = self.repository_resource(Action::Size, size_location)?;
        let params = context_params(contexts);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(&params);
        }
        let request = HttpRequest::new(method, url).with_header(ACCEPT.as_str(), TEXT_PLAIN_MIME_TYPE);
        let text = self.execute_transactional(request)?.text()?;
        text.trim().parse().map_err(|e| {
            ProtocolError::ProtocolViolation(format!("Invalid repository size {text:?}: {e}"))
        })
    }

    /// The transaction resource with the given action, or the repository resource outside of a
    /// transaction.
    fn repository_resource(
        &self,
        action: Action,
        location: fn(&str) -> String,
    ) -> Result<(Method, Url), ProtocolError> {
        Ok(match self.transaction.active_token() {
            Some(token) => (Method::PUT, with_action(&token, action)),
            None => (
                Method::GET,
                parse_url(&location(&self.require_repository_url()?))?,
            ),
        })
    }

    /// The graphs of the repository, as solutions binding `contextID`.
    pub fn context_ids(&self) -> Result<TupleQueryResult, ProtocolError> {
        let url = parse_url(&contexts_location(&self.require_repository_url()?))?;
        self.get_tuple_result(url)
    }

    /// The repositories of the server, as solutions binding `id`, `uri`, `title`, `readable`
    /// and `writable`.
    pub fn repository_list(&self) -> Result<TupleQueryResult, ProtocolError> {
        let url = parse_url(&repositories_location(&self.require_server_url()?))?;
        self.get_tuple_result(url)
    }

    fn get_tuple_result(&self, url: Url) -> Result<TupleQueryResult, ProtocolError> {
        let config = self.config();
        let request = HttpRequest::new(Method::GET, url)
            .with_header(ACCEPT.as_str(), accept_header(config.preferred_tuple_format));
        let response = self.executor.execute_ok(request)?;
        let format = response_format(&response, config.preferred_tuple_format)?;
        ResultProducer::start(
            TupleResultParser::new(format),
            response,
            config.queue_capacity,
            &self.registry,
        )
    }

    /// The protocol version of the server.
    pub fn server_protocol(&self) -> Result<String, ProtocolError> {
        let url = parse_url(&protocol_location(&self.require_server_url()?))?;
        let request =
            HttpRequest::new(Method::GET, url).with_header(ACCEPT.as_str(), TEXT_PLAIN_MIME_TYPE);
        Ok(self.executor.execute_ok(request)?.text()?.trim().to_owned())
    }

    pub fn delete_repository(&self, repository_id: &str) -> Result<(), ProtocolError> {
        let url = parse_url(&repository_location(
            &self.require_server_url()?,
            repository_id,
        ))?;
        self.executor
            .execute_no_content(HttpRequest::new(Method::DELETE, url))
    }

    /// The namespace declarations of the repository.
    pub fn namespaces(&self) -> Result<Namespaces, ProtocolError> {
        let url = parse_url(&namespaces_location(&self.require_repository_url()?))?;
        let mut namespaces = Namespaces::new();
        for solution in self.get_tuple_result(url)? {
            let solution = solution?;
            if let (Some(Term::Literal(prefix)), Some(Term::Literal(namespace))) =
                (solution.get("prefix"), solution.get("namespace"))
            {
                namespaces.insert(prefix.value().to_owned(), namespace.value().to_owned());
            }
        }
        Ok(namespaces)
    }

    /// The namespace bound to a prefix. `None` if the prefix is not declared.
    pub fn namespace(&self, prefix: &str) -> Result<Option<String>, ProtocolError> {
        let url = parse_url(&namespace_prefix_location(
            &self.require_repository_url()?,
            prefix,
        ))?;
        let request =
            HttpRequest::new(Method::GET, url).with_header(ACCEPT.as_str(), TEXT_PLAIN_MIME_TYPE);
        let response = self.executor.execute(request, NotFoundPolicy::PassThrough)?;
        match response.status().as_u16() {
            200 | 203 => Ok(Some(response.text()?)),
            _ => Ok(None),
        }
    }

    pub fn set_namespace_prefix(&self, prefix: &str, namespace: &str) -> Result<(), ProtocolError> {
        let url = parse_url(&namespace_prefix_location(
            &self.require_repository_url()?,
            prefix,
        ))?;
        self.executor.execute_no_content(
            HttpRequest::new(Method::PUT, url)
                .with_header(
                    CONTENT_TYPE.as_str(),
                    format!("{TEXT_PLAIN_MIME_TYPE}{UTF8_CHARSET}"),
                )
                .with_body(RequestBody::Bytes(namespace.as_bytes().to_vec())),
        )
    }

    pub fn remove_namespace_prefix(&self, prefix: &str) -> Result<(), ProtocolError> {
        let url = parse_url(&namespace_prefix_location(
            &self.require_repository_url()?,
            prefix,
        ))?;
        self.executor
            .execute_no_content(HttpRequest::new(Method::DELETE, url))
    }

    pub fn clear_namespaces(&self) -> Result<(), ProtocolError> {
        let url = parse_url(&namespaces_location(&self.require_repository_url()?))?;
        self.executor
            .execute_no_content(HttpRequest::new(Method::DELETE, url))
    }

    /// Opens a transaction on the repository.
    pub fn begin_transaction(&self, settings: &[TransactionSetting]) -> Result<(), ProtocolError> {
        let repository_url = self.require_repository_url()?;
        self.transaction.begin(&repository_url, settings)
    }

    pub fn prepare_transaction(&self) -> Result<(), ProtocolError> {
        self.transaction.prepare()
    }

    pub fn commit_transaction(&self) -> Result<(), ProtocolError> {
        self.transaction.commit()
    }

    pub fn rollback_transaction(&self) -> Result<(), ProtocolError> {
        self.transaction.rollback()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction.status()
    }

    pub fn transaction(&self) -> &TransactionController {
        &self.transaction
    }

    /// Sends a raw request through the session.
    ///
    /// The additional headers are appended and error responses are classified. With
    /// [`NotFoundPolicy::PassThrough`] a `404` response is returned instead of failing.
    pub fn execute(
        &self,
        request: HttpRequest,
        not_found: NotFoundPolicy,
    ) -> Result<HttpResponse, ProtocolError> {
        self.executor.execute(request, not_found)
    }

    /// Closes all open results, stops the keep-alive ping and releases the HTTP client.
    ///
    /// Open transactions are abandoned without contacting the server. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transaction.close();
        self.registry.close_all();
        self.executor.close();
        debug!("Closed protocol session");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn require_query_url(&self) -> Result<String, ProtocolError> {
        self.query_url()
            .ok_or_else(|| ProtocolError::InvalidState("No query URL has been set".to_owned()))
    }

    fn require_update_url(&self) -> Result<String, ProtocolError> {
        self.update_url()
            .ok_or_else(|| ProtocolError::InvalidState("No update URL has been set".to_owned()))
    }

    fn require_repository_url(&self) -> Result<String, ProtocolError> {
        self.repository_url().ok_or_else(|| {
            ProtocolError::InvalidState("No repository URL has been set".to_owned())
        })
    }

    fn require_server_url(&self) -> Result<String, ProtocolError> {
        self.server_url()
            .ok_or_else(|| ProtocolError::InvalidState("No server URL has been set".to_owned()))
    }
}

impl fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("endpoints", &*self.endpoints.read())
            .field("transaction", &self.transaction)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn detect_query_form(request: &QueryRequest) -> Result<QueryForm, ProtocolError> {
    match request.language {
        QueryLanguage::Sparql => {
            let query = Query::parse(&request.query, request.base_iri.as_deref()).map_err(|e| {
                ProtocolError::InvalidRequest(format!(
                    "Unable to detect the query form, set it explicitly: {e}"
                ))
            })?;
            Ok(match query {
                Query::Select { .. } => QueryForm::Tuple,
                Query::Ask { .. } => QueryForm::Boolean,
                Query::Construct { .. } | Query::Describe { .. } => QueryForm::Graph,
            })
        }
    }
}

/// The format of a response, the preferred one if the server did not declare any.
fn response_format<F: ResultFormat>(
    response: &HttpResponse,
    preferred: F,
) -> Result<F, ProtocolError> {
    let Some(content_type) = response.content_type() else {
        return Ok(preferred);
    };
    match_media_type(F::PARSEABLE, content_type).ok_or_else(|| {
        ProtocolError::ProtocolViolation(format!(
            "The server responded with an unsupported format: {content_type}"
        ))
    })
}

fn context_params(contexts: &[GraphName]) -> Params {
    encode_contexts(contexts)
        .into_iter()
        .map(|context| (CONTEXT_PARAM_NAME.to_owned(), context))
        .collect()
}

fn encode_form(params: &Params) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

fn data_request(
    content: UploadContent,
    format: RdfFormat,
    base_iri: Option<&str>,
    contexts: &[GraphName],
    action: Action,
) -> UploadRequest {
    let mut request = UploadRequest::new(content, format)
        .with_action(action)
        .with_contexts(contexts.iter().cloned());
    if let Some(base_iri) = base_iri {
        request = request.with_base_iri(base_iri);
    }
    request
}
