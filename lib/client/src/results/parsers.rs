use crate::config::ParserConfig;
use crate::results::producer::{ResponseBody, ResultHandler, ResultParser};
use crate::results::Namespaces;
use oxrdf::{Quad, Variable};
use oxrdfio::{RdfFormat, RdfParser, ReaderQuadParser};
use rdf_fusion_protocol::{BooleanQueryResultFormat, ProtocolError, TupleQueryResultFormat};
use sparesults::{QueryResultsParser, QuerySolution, ReaderQueryResultsParserOutput};
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;

/// Parses a solution sequence. The metadata is the list of variables.
#[derive(Debug, Clone, Copy)]
pub struct TupleResultParser {
    format: TupleQueryResultFormat,
}

impl TupleResultParser {
    pub fn new(format: TupleQueryResultFormat) -> Self {
        Self { format }
    }
}

impl ResultParser for TupleResultParser {
    type Item = QuerySolution;
    type Metadata = Arc<[Variable]>;

    fn parse(
        self,
        body: ResponseBody,
        handler: &mut dyn ResultHandler<QuerySolution, Arc<[Variable]>>,
    ) -> Result<(), ProtocolError> {
        let output = QueryResultsParser::from_format(self.format.results_format())
            .for_reader(body)
            .map_err(ProtocolError::results_parsing)?;
        let ReaderQueryResultsParserOutput::Solutions(solutions) = output else {
            return Err(ProtocolError::ProtocolViolation(
                "Expected a solution sequence but the server sent a boolean".to_owned(),
            ));
        };
        handler.handle_metadata(solutions.variables().into());
        for solution in solutions {
            handler.handle_item(solution.map_err(ProtocolError::results_parsing)?)?;
        }
        Ok(())
    }
}

/// Parses an RDF document into triples or quads. The metadata is the set of prefixes declared
/// before the first statement.
pub struct RdfResultParser<T> {
    format: RdfFormat,
    base_iri: Option<String>,
    config: ParserConfig,
    item: PhantomData<fn() -> T>,
}

impl<T> RdfResultParser<T> {
    pub fn new(format: RdfFormat, base_iri: Option<String>, config: ParserConfig) -> Self {
        Self {
            format,
            base_iri,
            config,
            item: PhantomData,
        }
    }

    fn rdf_parser(&self) -> Result<RdfParser, ProtocolError> {
        let mut parser = RdfParser::from_format(self.format);
        if let Some(base_iri) = &self.base_iri {
            parser = parser.with_base_iri(base_iri).map_err(|e| {
                ProtocolError::InvalidRequest(format!("Invalid base IRI {base_iri}: {e}"))
            })?;
        }
        if self.config.lenient {
            parser = parser.unchecked();
        }
        if !self.config.preserve_blank_node_ids {
            parser = parser.rename_blank_nodes();
        }
        Ok(parser)
    }
}

impl<T: From<Quad> + Send + 'static> ResultParser for RdfResultParser<T> {
    type Item = T;
    type Metadata = Namespaces;

    fn parse(
        self,
        body: ResponseBody,
        handler: &mut dyn ResultHandler<T, Namespaces>,
    ) -> Result<(), ProtocolError> {
        let mut reader = self.rdf_parser()?.for_reader(body);
        let mut prefixes_published = false;
        while let Some(quad) = reader.next() {
            let quad = quad.map_err(ProtocolError::results_parsing)?;
            if !prefixes_published {
                handler.handle_metadata(prefixes(&reader));
                prefixes_published = true;
            }
            handler.handle_item(T::from(quad))?;
        }
        if !prefixes_published {
            handler.handle_metadata(prefixes(&reader));
        }
        Ok(())
    }
}

fn prefixes<R: Read>(reader: &ReaderQuadParser<R>) -> Namespaces {
    reader
        .prefixes()
        .map(|(prefix, iri)| (prefix.to_owned(), iri.to_owned()))
        .collect()
}

/// Reads a boolean query answer.
pub fn parse_boolean(
    format: BooleanQueryResultFormat,
    mut body: impl Read,
) -> Result<bool, ProtocolError> {
    let Some(results_format) = format.results_format() else {
        let mut text = String::new();
        body.read_to_string(&mut text)
            .map_err(ProtocolError::results_parsing)?;
        return match text.trim() {
            value if value.eq_ignore_ascii_case("true") => Ok(true),
            value if value.eq_ignore_ascii_case("false") => Ok(false),
            value => Err(ProtocolError::results_parsing(format!(
                "Invalid boolean result: {value:?}"
            ))),
        };
    };
    match QueryResultsParser::from_format(results_format)
        .for_reader(body)
        .map_err(ProtocolError::results_parsing)?
    {
        ReaderQueryResultsParserOutput::Boolean(value) => Ok(value),
        ReaderQueryResultsParserOutput::Solutions(_) => Err(ProtocolError::ProtocolViolation(
            "Expected a boolean but the server sent a solution sequence".to_owned(),
        )),
    }
}
