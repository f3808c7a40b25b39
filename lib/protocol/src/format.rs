use oxrdfio::RdfFormat;
use sparesults::QueryResultsFormat;

/// A response format the client knows how to parse.
///
/// Every format is advertised with all of its media types. The first one is the canonical
/// media type.
pub trait ResultFormat: Copy + Eq + 'static {
    /// All formats of this kind the client can parse, in the order they are advertised.
    const PARSEABLE: &'static [Self];

    fn media_types(self) -> &'static [&'static str];

    /// The canonical media type.
    fn media_type(self) -> &'static str {
        self.media_types().first().copied().unwrap_or_default()
    }

    /// Finds the parseable format that declares the given media type.
    ///
    /// Parameters like `; charset=utf-8` are ignored.
    fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type_essence(media_type);
        Self::PARSEABLE.iter().copied().find(|format| {
            format
                .media_types()
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(essence))
        })
    }
}

/// Strips the parameters of a media type.
pub fn media_type_essence(media_type: &str) -> &str {
    media_type
        .split_once(';')
        .map_or(media_type, |(essence, _)| essence)
        .trim()
}

/// Serialization of solution sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleQueryResultFormat {
    Json,
    Xml,
    Tsv,
}

impl TupleQueryResultFormat {
    pub fn results_format(self) -> QueryResultsFormat {
        match self {
            Self::Json => QueryResultsFormat::Json,
            Self::Xml => QueryResultsFormat::Xml,
            Self::Tsv => QueryResultsFormat::Tsv,
        }
    }
}

impl ResultFormat for TupleQueryResultFormat {
    const PARSEABLE: &'static [Self] = &[Self::Xml, Self::Json, Self::Tsv];

    fn media_types(self) -> &'static [&'static str] {
        match self {
            Self::Json => &["application/sparql-results+json", "application/json"],
            Self::Xml => &["application/sparql-results+xml", "application/xml"],
            Self::Tsv => &["text/tab-separated-values"],
        }
    }
}

/// Serialization of boolean query answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanQueryResultFormat {
    Json,
    Xml,
    /// `true` or `false` as plain text.
    Text,
}

impl BooleanQueryResultFormat {
    /// The `sparesults` format, `None` for the plain text format.
    pub fn results_format(self) -> Option<QueryResultsFormat> {
        match self {
            Self::Json => Some(QueryResultsFormat::Json),
            Self::Xml => Some(QueryResultsFormat::Xml),
            Self::Text => None,
        }
    }
}

impl ResultFormat for BooleanQueryResultFormat {
    const PARSEABLE: &'static [Self] = &[Self::Xml, Self::Json, Self::Text];

    fn media_types(self) -> &'static [&'static str] {
        match self {
            Self::Json => &["application/sparql-results+json", "application/json"],
            Self::Xml => &["application/sparql-results+xml", "application/xml"],
            Self::Text => &["text/boolean"],
        }
    }
}

impl ResultFormat for RdfFormat {
    const PARSEABLE: &'static [Self] = &[
        Self::Turtle,
        Self::NTriples,
        Self::NQuads,
        Self::TriG,
        Self::RdfXml,
        Self::N3,
    ];

    fn media_types(self) -> &'static [&'static str] {
        match self {
            Self::Turtle => &["text/turtle", "application/x-turtle"],
            Self::NTriples => &["application/n-triples", "text/plain"],
            Self::NQuads => &["application/n-quads", "text/x-nquads"],
            Self::TriG => &["application/trig", "application/x-trig"],
            Self::RdfXml => &["application/rdf+xml", "application/xml"],
            Self::N3 => &["text/n3", "text/rdf+n3"],
            _ => &[],
        }
    }
}
