//! Names and locations of the remote repository protocol.

use oxrdf::{GraphName, GraphNameRef, TermRef};
use std::fmt;

/// Default threshold for switching from `GET` to `POST`.
///
/// Lowest common denominator of the request line limits of common web servers.
pub const DEFAULT_MAXIMUM_URL_LENGTH: usize = 4083;

pub const QUERY_PARAM_NAME: &str = "query";
pub const UPDATE_PARAM_NAME: &str = "update";
pub const QUERY_LANGUAGE_PARAM_NAME: &str = "queryLn";
pub const BASE_URI_PARAM_NAME: &str = "baseURI";
pub const INCLUDE_INFERRED_PARAM_NAME: &str = "infer";
pub const TIMEOUT_PARAM_NAME: &str = "timeout";
pub const DEFAULT_GRAPH_PARAM_NAME: &str = "default-graph-uri";
pub const NAMED_GRAPH_PARAM_NAME: &str = "named-graph-uri";
pub const USING_GRAPH_PARAM_NAME: &str = "using-graph-uri";
pub const USING_NAMED_GRAPH_PARAM_NAME: &str = "using-named-graph-uri";
pub const REMOVE_GRAPH_PARAM_NAME: &str = "remove-graph-uri";
pub const INSERT_GRAPH_PARAM_NAME: &str = "insert-graph-uri";
pub const CONTEXT_PARAM_NAME: &str = "context";
pub const SUBJECT_PARAM_NAME: &str = "subj";
pub const PREDICATE_PARAM_NAME: &str = "pred";
pub const OBJECT_PARAM_NAME: &str = "obj";
pub const PRESERVE_BNODE_ID_PARAM_NAME: &str = "preserveNodeId";
pub const ACTION_PARAM_NAME: &str = "action";

/// Prefix of query parameters carrying variable bindings, e.g. `$name`.
pub const BINDING_PREFIX: &str = "$";
/// Prefix of form parameters carrying transaction settings.
pub const TRANSACTION_SETTINGS_PREFIX: &str = "transaction-setting__";

/// Value of the `context` parameter for the default graph.
pub const NULL_PARAM_VALUE: &str = "null";

pub const SPARQL_QUERY_MIME_TYPE: &str = "application/sparql-query";
pub const SPARQL_UPDATE_MIME_TYPE: &str = "application/sparql-update";
pub const FORM_MIME_TYPE: &str = "application/x-www-form-urlencoded";
pub const TEXT_PLAIN_MIME_TYPE: &str = "text/plain";

pub const REPOSITORIES: &str = "repositories";
pub const STATEMENTS: &str = "statements";
pub const TRANSACTIONS: &str = "transactions";
pub const NAMESPACES: &str = "namespaces";
pub const CONTEXTS: &str = "contexts";
pub const SIZE: &str = "size";
pub const PROTOCOL: &str = "protocol";

/// The `action` of a request against a transaction resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Delete,
    Get,
    Size,
    Query,
    Update,
    Prepare,
    Commit,
    Ping,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Size => "SIZE",
            Self::Query => "QUERY",
            Self::Update => "UPDATE",
            Self::Prepare => "PREPARE",
            Self::Commit => "COMMIT",
            Self::Ping => "PING",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn join(base: &str, segment: &str) -> String {
    format!("{}/{segment}", base.trim_end_matches('/'))
}

pub fn protocol_location(server_url: &str) -> String {
    join(server_url, PROTOCOL)
}

pub fn repositories_location(server_url: &str) -> String {
    join(server_url, REPOSITORIES)
}

pub fn repository_location(server_url: &str, repository_id: &str) -> String {
    join(&repositories_location(server_url), repository_id)
}

pub fn statements_location(repository_url: &str) -> String {
    join(repository_url, STATEMENTS)
}

pub fn transactions_location(repository_url: &str) -> String {
    join(repository_url, TRANSACTIONS)
}

pub fn namespaces_location(repository_url: &str) -> String {
    join(repository_url, NAMESPACES)
}

pub fn namespace_prefix_location(repository_url: &str, prefix: &str) -> String {
    join(&namespaces_location(repository_url), prefix)
}

pub fn contexts_location(repository_url: &str) -> String {
    join(repository_url, CONTEXTS)
}

pub fn size_location(repository_url: &str) -> String {
    join(repository_url, SIZE)
}

/// Encodes an RDF term as a parameter value using the N-Triples syntax.
pub fn encode_value(term: TermRef<'_>) -> String {
    term.to_string()
}

/// Encodes a graph name as a `context` parameter value.
///
/// The default graph is encoded as `null`.
pub fn encode_context(graph: GraphNameRef<'_>) -> String {
    match graph {
        GraphNameRef::DefaultGraph => NULL_PARAM_VALUE.to_owned(),
        GraphNameRef::NamedNode(node) => node.to_string(),
        GraphNameRef::BlankNode(node) => node.to_string(),
    }
}

/// Encodes a list of graph names. An empty list addresses the whole repository.
pub fn encode_contexts(graphs: &[GraphName]) -> Vec<String> {
    graphs
        .iter()
        .map(|graph| encode_context(graph.as_ref()))
        .collect()
}
