use oxrdfio::RdfFormat;
use rdf_fusion_protocol::protocol::DEFAULT_MAXIMUM_URL_LENGTH;
use rdf_fusion_protocol::{BooleanQueryResultFormat, TupleQueryResultFormat};
use std::num::ParseIntError;
use std::time::Duration;
use thiserror::Error;

/// Overrides [`SessionConfig::maximum_url_length`].
pub const MAXIMUM_URL_LENGTH_VARIABLE: &str = "RDF_FUSION_SPARQL_URL_MAXLENGTH";
/// Overrides [`SessionConfig::transaction_timeout`], in seconds.
pub const TRANSACTION_TIMEOUT_VARIABLE: &str = "RDF_FUSION_TXN_TIMEOUT";

/// Transaction timeout assumed until the server reports its own.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Number of parsed rows buffered ahead of the consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Holds the parser settings used for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Skips validation of IRIs, literals and language tags.
    pub lenient: bool,
    /// Keeps the blank node identifiers of the server instead of generating fresh ones.
    pub preserve_blank_node_ids: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            lenient: true,
            preserve_blank_node_ids: true,
        }
    }
}

/// Holds the configuration of a [`ProtocolSession`](crate::session::ProtocolSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Encoded URLs longer than this are sent with `POST` instead of `GET`.
    pub maximum_url_length: usize,
    /// Transaction timeout assumed before the first ping. The first ping is sent after half of
    /// it. A zero timeout disables pings.
    pub transaction_timeout: Duration,
    /// Capacity of the queue between a result producer and its consumer.
    pub queue_capacity: usize,
    pub preferred_tuple_format: TupleQueryResultFormat,
    pub preferred_boolean_format: BooleanQueryResultFormat,
    pub preferred_rdf_format: RdfFormat,
    pub parser_config: ParserConfig,
    /// Connection timeout of the bundled HTTP client. `None` uses the client default.
    pub connection_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            maximum_url_length: DEFAULT_MAXIMUM_URL_LENGTH,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            preferred_tuple_format: TupleQueryResultFormat::Xml,
            preferred_boolean_format: BooleanQueryResultFormat::Text,
            preferred_rdf_format: RdfFormat::Turtle,
            parser_config: ParserConfig::default(),
            connection_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Creates the default configuration with the overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates the default configuration with overrides read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(length) = parse_variable(&lookup, MAXIMUM_URL_LENGTH_VARIABLE)? {
            config.maximum_url_length = length;
        }
        if let Some(seconds) = parse_variable(&lookup, TRANSACTION_TIMEOUT_VARIABLE)? {
            config.transaction_timeout = Duration::from_secs(seconds);
        }
        Ok(config)
    }

    /// The delay before the first keep-alive ping of a transaction.
    pub fn initial_ping_delay(&self) -> Duration {
        self.transaction_timeout / 2
    }
}

fn parse_variable<T: std::str::FromStr<Err = ParseIntError>>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|source| ConfigError::InvalidInteger {
            variable: name,
            value,
            source,
        })
}

/// An error raised while reading the configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("The value {value:?} of {variable} is not a valid non-negative integer")]
    InvalidInteger {
        variable: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}
