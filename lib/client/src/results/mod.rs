//! Streaming results of remote queries.
//!
//! Response bodies are parsed on a background thread while the caller iterates. The two sides
//! are connected through a [`BoundedResultQueue`](crate::queue::BoundedResultQueue), so at most a
//! few parsed rows are buffered no matter how large the response is.

mod metadata;
mod parsers;
mod producer;

use oxrdf::{Quad, Triple, Variable};
use rdf_fusion_protocol::ProtocolError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use parsers::{parse_boolean, RdfResultParser, TupleResultParser};
pub(crate) use producer::{ProducerRegistry, ResultProducer};
pub use producer::{ResponseBody, ResultHandler, ResultParser};
pub use sparesults::QuerySolution;

use producer::ResultChannel;

/// Prefix to namespace IRI mappings, declared by an RDF response.
pub type Namespaces = BTreeMap<String, String>;

/// Results of a `SELECT` query.
pub type TupleQueryResult = StreamingResult<QuerySolution, Arc<[Variable]>>;
/// Results of a `CONSTRUCT` or `DESCRIBE` query.
pub type GraphQueryResult = StreamingResult<Triple, Namespaces>;
/// Statements of a repository, with their graph names.
pub type StatementsResult = StreamingResult<Quad, Namespaces>;

/// A pull-based cursor over a result that is parsed in the background.
///
/// Errors of the background parser surface on the next call of [`has_next`](Self::has_next) or
/// [`Iterator::next`], after all rows parsed before the failure. The iterator yields such an
/// error once and then stops.
///
/// Dropping the result closes it.
#[must_use]
pub struct StreamingResult<T, M> {
    channel: Arc<ResultChannel<T, M>>,
    lookahead: Option<T>,
    failure: Option<ProtocolError>,
    failure_reported: bool,
    exhausted: bool,
    closed: bool,
}

impl<T, M> StreamingResult<T, M> {
    pub(crate) fn new(channel: Arc<ResultChannel<T, M>>) -> Self {
        Self {
            channel,
            lookahead: None,
            failure: None,
            failure_reported: false,
            exhausted: false,
            closed: false,
        }
    }

    /// Checks whether another item is available, blocking until the producer has parsed it or
    /// reached the end of the stream.
    ///
    /// After a failure every call returns the same error.
    pub fn has_next(&mut self) -> Result<bool, ProtocolError> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.closed || self.exhausted {
            return Ok(false);
        }
        match self.channel.queue.take() {
            Ok(Some(item)) => {
                self.lookahead = Some(item);
                Ok(true)
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(false)
            }
            Err(error) => {
                self.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    /// The metadata of the result, e.g. the variables of a solution sequence.
    ///
    /// Blocks until the producer has read it. Fails with the producer error if the response
    /// could not be parsed that far.
    pub fn metadata(&self) -> Result<M, ProtocolError>
    where
        M: Clone,
    {
        self.channel.metadata.wait()
    }

    /// Closes the result and stops the background parser.
    ///
    /// Closing is idempotent and does not wait for the parser thread.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.lookahead = None;
        self.channel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T, M> Iterator for StreamingResult<T, M> {
    type Item = Result<T, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failure_reported {
            return None;
        }
        match self.has_next() {
            Ok(true) => self.lookahead.take().map(Ok),
            Ok(false) => None,
            Err(error) => {
                self.failure_reported = true;
                Some(Err(error))
            }
        }
    }
}

impl<T, M> Drop for StreamingResult<T, M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T, M> fmt::Debug for StreamingResult<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResult")
            .field("buffered", &self.lookahead.is_some())
            .field("exhausted", &self.exhausted)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// The shape of a query answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryForm {
    /// `SELECT`
    Tuple,
    /// `ASK`
    Boolean,
    /// `CONSTRUCT` and `DESCRIBE`
    Graph,
}

/// Results of a query whose form is only known at runtime.
#[derive(Debug)]
pub enum QueryResponse {
    Solutions(TupleQueryResult),
    Boolean(bool),
    Graph(GraphQueryResult),
}

impl From<TupleQueryResult> for QueryResponse {
    #[inline]
    fn from(value: TupleQueryResult) -> Self {
        Self::Solutions(value)
    }
}

impl From<GraphQueryResult> for QueryResponse {
    #[inline]
    fn from(value: GraphQueryResult) -> Self {
        Self::Graph(value)
    }
}

impl From<bool> for QueryResponse {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
