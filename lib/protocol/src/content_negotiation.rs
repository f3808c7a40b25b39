//! Builds `Accept` headers with relative preference weights.
//!
//! Every format receives one weight that all of its media types share. The preferred format
//! keeps the implicit maximum weight (`q=1`), all other formats get [`NON_PREFERRED_QUALITY`].

use crate::format::{media_type_essence, ResultFormat};
use oxrdfio::RdfFormat;

/// The weight of formats that are supported but not preferred.
pub const NON_PREFERRED_QUALITY: &str = "0.8";

/// Builds the `Accept` header for the given formats.
///
/// The output follows the order of `supported`, so the same input always yields the same header.
/// A preferred format that is not part of `supported` is ignored and all formats get the same
/// weight.
pub fn build_accept_header<F: ResultFormat>(supported: &[F], preferred: Option<F>) -> String {
    let preferred = preferred.filter(|preferred| supported.contains(preferred));
    let mut entries: Vec<(&str, Option<&str>)> = Vec::new();
    for format in supported {
        let weight = match preferred {
            Some(preferred) if preferred != *format => Some(NON_PREFERRED_QUALITY),
            _ => None,
        };
        for media_type in format.media_types() {
            if entries
                .iter()
                .any(|(known, _)| known.eq_ignore_ascii_case(media_type))
            {
                continue;
            }
            entries.push((*media_type, weight));
        }
    }
    entries
        .into_iter()
        .map(|(media_type, weight)| match weight {
            Some(weight) => format!("{media_type};q={weight}"),
            None => media_type.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the `Accept` header of all parseable formats of a kind.
pub fn accept_header<F: ResultFormat>(preferred: F) -> String {
    build_accept_header(F::PARSEABLE, Some(preferred))
}

/// Builds the `Accept` header for RDF responses.
///
/// With `require_context` only formats able to carry named graphs are offered.
pub fn rdf_accept_header(require_context: bool, preferred: RdfFormat) -> String {
    let supported = <RdfFormat as ResultFormat>::PARSEABLE
        .iter()
        .copied()
        .filter(|format| !require_context || format.supports_datasets())
        .collect::<Vec<_>>();
    build_accept_header(&supported, Some(preferred))
}

/// Finds the format of a response given its `Content-Type` header.
pub fn match_media_type<F: ResultFormat>(supported: &[F], content_type: &str) -> Option<F> {
    let essence = media_type_essence(content_type);
    supported.iter().copied().find(|format| {
        format
            .media_types()
            .iter()
            .any(|media_type| media_type.eq_ignore_ascii_case(essence))
    })
}
