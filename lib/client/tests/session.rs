#![cfg(test)]
#![allow(clippy::panic_in_result_fn)]

mod common;

use common::{
    json_solutions, session, session_with_config, wait_until, FakeClient, Scripted, REPOSITORY_URL,
};
use oxrdf::{GraphName, Literal, NamedNode, Quad, Term, Triple, Variable};
use oxrdfio::RdfFormat;
use rdf_fusion_client::http::{Method, ReleaseReason};
use rdf_fusion_client::results::{QueryForm, QueryResponse};
use rdf_fusion_client::session::{QueryRequest, UpdateRequest, UploadContent, UploadRequest};
use rdf_fusion_client::{ProtocolError, SessionConfig};
use rdf_fusion_protocol::content_negotiation::{accept_header, rdf_accept_header};
use rdf_fusion_protocol::TupleQueryResultFormat;
use rstest::rstest;

const SPARQL_JSON: &str = "application/sparql-results+json";

#[test]
fn tuple_query_streams_solutions() {
    let client = FakeClient::new();
    client.push(Scripted::ok(
        SPARQL_JSON,
        json_solutions(&[
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ]),
    ));
    let session = session(&client);

    let mut result = session
        .tuple_query(&QueryRequest::new("SELECT ?s WHERE { ?s ?p ?o }"))
        .unwrap();
    assert_eq!(&*result.metadata().unwrap(), [Variable::new_unchecked("s")]);
    let subjects = result
        .by_ref()
        .map(|solution| solution.unwrap().get("s").cloned())
        .collect::<Vec<_>>();
    assert_eq!(
        subjects,
        [
            Some(Term::from(NamedNode::new_unchecked("http://example.com/1"))),
            Some(Term::from(NamedNode::new_unchecked("http://example.com/2"))),
            Some(Term::from(NamedNode::new_unchecked("http://example.com/3"))),
        ]
    );
    assert!(!result.has_next().unwrap());
    wait_until(|| client.releases() == [ReleaseReason::Completed]);

    let request = client.last_request();
    assert_eq!(request.method, Method::GET);
    assert_eq!(
        request.url.as_str().split('?').next(),
        Some(REPOSITORY_URL)
    );
    assert_eq!(
        request.param("query").as_deref(),
        Some("SELECT ?s WHERE { ?s ?p ?o }")
    );
    assert_eq!(request.param("queryLn").as_deref(), Some("SPARQL"));
    assert_eq!(request.param("infer").as_deref(), Some("true"));
    assert_eq!(
        request.header("Accept"),
        Some(accept_header(TupleQueryResultFormat::Xml).as_str())
    );
}

#[test]
fn long_queries_are_sent_as_forms() {
    let client = FakeClient::new();
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    let session = session(&client);
    session.set_maximum_url_length(64);

    let query = format!("SELECT ?s WHERE {{ ?s ?p \"{}\" }}", "x".repeat(100));
    let mut result = session.tuple_query(&QueryRequest::new(query.clone())).unwrap();
    assert!(result.next().is_none());

    let request = client.last_request();
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.as_str(), REPOSITORY_URL);
    assert_eq!(
        request.header("Content-Type"),
        Some("application/x-www-form-urlencoded; charset=utf-8")
    );
    let form = url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect::<Vec<_>>();
    assert!(form.contains(&("query".to_owned(), query)));
}

#[test]
fn url_length_limit_is_inclusive() {
    let client = FakeClient::new();
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    let session = session(&client);
    let request = QueryRequest::new("SELECT * WHERE { ?s ?p ?o }");

    drop(session.tuple_query(&request).unwrap());
    let length = client.last_request().url.as_str().len();
    session.set_maximum_url_length(length);
    drop(session.tuple_query(&request).unwrap());
    assert_eq!(client.last_request().method, Method::GET);
}

#[rstest]
#[case(401, "", "AuthenticationRequired")]
#[case(503, "", "Interrupted")]
#[case(400, "MALFORMED QUERY: unexpected end", "MalformedQuery")]
#[case(500, "boom", "RemoteFailure")]
fn error_responses_are_classified(#[case] status: u16, #[case] body: &str, #[case] expected: &str) {
    let client = FakeClient::new();
    client.push(
        Scripted::new(status)
            .with_header("Content-Type", "text/plain")
            .with_body(body),
    );
    let session = session(&client);

    let error = session
        .tuple_query(&QueryRequest::new("SELECT * WHERE { ?s ?p ?o }"))
        .unwrap_err();
    match (expected, error) {
        ("AuthenticationRequired", ProtocolError::AuthenticationRequired)
        | ("Interrupted", ProtocolError::Interrupted) => (),
        ("MalformedQuery", ProtocolError::MalformedQuery(message)) => {
            assert_eq!(message, "unexpected end");
        }
        ("RemoteFailure", ProtocolError::RemoteFailure { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        (expected, error) => panic!("expected {expected}, got {error:?}"),
    }
}

#[test]
fn unsupported_result_format_is_rejected() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/html", "<html></html>"));
    let session = session(&client);

    assert!(matches!(
        session.tuple_query(&QueryRequest::new("SELECT * WHERE { ?s ?p ?o }")),
        Err(ProtocolError::ProtocolViolation(_))
    ));
}

#[test]
fn truncated_results_surface_after_parsed_rows() {
    let client = FakeClient::new();
    let body = json_solutions(&["http://example.com/1"]);
    client.push(Scripted::ok(SPARQL_JSON, &body[..body.len() - 3]));
    let session = session(&client);

    let mut result = session
        .tuple_query(&QueryRequest::new("SELECT ?s WHERE { ?s ?p ?o }"))
        .unwrap();
    let mut rows = 0;
    let mut failure = None;
    for solution in result.by_ref() {
        match solution {
            Ok(_) => rows += 1,
            Err(error) => failure = Some(error),
        }
    }
    assert!(rows <= 1);
    assert!(matches!(failure, Some(ProtocolError::ResultsParsing(_))));
    assert!(result.has_next().is_err());
}

#[test]
fn boolean_query_reads_plain_text() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/boolean", "true\n"));
    client.push(Scripted::ok(
        SPARQL_JSON,
        r#"{"head":{},"boolean":false}"#,
    ));
    let session = session(&client);

    assert!(session
        .boolean_query(&QueryRequest::new("ASK { ?s ?p ?o }"))
        .unwrap());
    assert!(!session
        .boolean_query(&QueryRequest::new("ASK { ?s ?p ?o }"))
        .unwrap());
    wait_until(|| client.releases().len() == 2);
}

#[test]
fn query_detects_the_form() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/boolean", "false"));
    client.push(Scripted::ok(
        "text/turtle",
        "<http://example.com/s> <http://example.com/p> <http://example.com/o> .",
    ));
    let session = session(&client);

    assert!(matches!(
        session.query(&QueryRequest::new("ASK { ?s ?p ?o }")).unwrap(),
        QueryResponse::Boolean(false)
    ));
    let QueryResponse::Graph(triples) = session
        .query(&QueryRequest::new("CONSTRUCT WHERE { ?s ?p ?o }"))
        .unwrap()
    else {
        panic!("expected a graph result");
    };
    assert_eq!(triples.count(), 1);

    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    let response = session
        .query(&QueryRequest::new("not a query").with_form(QueryForm::Tuple))
        .unwrap();
    assert!(matches!(response, QueryResponse::Solutions(_)));
    assert!(matches!(
        session.query(&QueryRequest::new("not a query")),
        Err(ProtocolError::InvalidRequest(_))
    ));
}

#[test]
fn graph_query_resolves_against_the_request_url() {
    let client = FakeClient::new();
    client.push(Scripted::ok(
        "text/turtle; charset=utf-8",
        "@prefix ex: <http://example.com/> .\nex:s ex:p <o> .",
    ));
    let session = session(&client);

    let mut result = session
        .graph_query(&QueryRequest::new("CONSTRUCT WHERE { ?s ?p ?o }"))
        .unwrap();
    let namespaces = result.metadata().unwrap();
    assert_eq!(
        namespaces.get("ex").map(String::as_str),
        Some("http://example.com/")
    );
    let triples = result.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        triples,
        [Triple::new(
            NamedNode::new_unchecked("http://example.com/s"),
            NamedNode::new_unchecked("http://example.com/p"),
            NamedNode::new_unchecked("http://example.com/rdf4j-server/repositories/o"),
        )]
    );
    assert_eq!(
        client.last_request().header("Accept"),
        Some(rdf_accept_header(false, RdfFormat::Turtle).as_str())
    );
}

#[test]
fn closing_a_result_early_aborts_the_body() {
    let client = FakeClient::new();
    let values = (0..1000)
        .map(|i| format!("http://example.com/{i}"))
        .collect::<Vec<_>>();
    let values = values.iter().map(String::as_str).collect::<Vec<_>>();
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&values)));
    let session = session_with_config(
        &client,
        SessionConfig {
            queue_capacity: 2,
            ..SessionConfig::default()
        },
    );

    let mut result = session
        .tuple_query(&QueryRequest::new("SELECT ?s WHERE { ?s ?p ?o }"))
        .unwrap();
    assert!(result.next().unwrap().is_ok());
    result.close();
    assert!(result.is_closed());
    assert!(result.next().is_none());
    wait_until(|| client.releases() == [ReleaseReason::Aborted]);
}

#[test]
fn update_is_posted_as_a_form() {
    let client = FakeClient::new();
    client.push(Scripted::new(204));
    let session = session(&client);

    session
        .update(
            &UpdateRequest::new("INSERT DATA { <http://example.com/s> <http://example.com/p> 1 }")
                .with_binding("x", Literal::from(1)),
        )
        .unwrap();

    let request = client.last_request();
    assert_eq!(request.method, Method::POST);
    assert_eq!(
        request.url.as_str(),
        format!("{REPOSITORY_URL}/statements")
    );
    let form = url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect::<Vec<_>>();
    assert_eq!(form[0], ("queryLn".to_owned(), "SPARQL".to_owned()));
    assert_eq!(form[1].0, "update");
    assert!(form.contains(&(
        "$x".to_owned(),
        "\"1\"^^<http://www.w3.org/2001/XMLSchema#integer>".to_owned()
    )));
}

#[test]
fn upload_streams_text_with_charset() {
    let client = FakeClient::new();
    client.push(Scripted::new(204));
    client.push(Scripted::new(204));
    let session = session(&client);
    let data = "<http://example.com/s> <http://example.com/p> <http://example.com/o> .";

    session
        .add_data(
            UploadContent::Text(Box::new(data.as_bytes())),
            RdfFormat::Turtle,
            Some("http://example.com/base"),
            &[
                NamedNode::new_unchecked("http://example.com/g").into(),
                GraphName::DefaultGraph,
            ],
        )
        .unwrap();
    let request = client.last_request();
    assert_eq!(request.method, Method::POST);
    assert_eq!(
        request.url.as_str().split('?').next(),
        Some(format!("{REPOSITORY_URL}/statements").as_str())
    );
    assert_eq!(
        request.header("Content-Type"),
        Some("text/turtle; charset=utf-8")
    );
    assert_eq!(
        request.params("context"),
        ["<http://example.com/g>", "null"]
    );
    assert_eq!(
        request.param("baseURI").as_deref(),
        Some("<http://example.com/base>")
    );
    assert_eq!(request.param("preserveNodeId").as_deref(), Some("true"));
    assert_eq!(request.body_text(), data);

    session
        .upload(
            UploadRequest::new(UploadContent::Bytes(data.as_bytes().to_vec()), RdfFormat::NTriples)
                .with_overwrite(true),
        )
        .unwrap();
    let request = client.last_request();
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.header("Content-Type"), Some("application/n-triples"));
}

#[test]
fn removal_requires_a_transaction() {
    let client = FakeClient::new();
    let session = session(&client);

    assert!(matches!(
        session.remove_data(
            UploadContent::Bytes(Vec::new()),
            RdfFormat::NTriples,
            None,
            &[],
        ),
        Err(ProtocolError::InvalidRequest(_))
    ));
    assert_eq!(client.request_count(), 0);
}

#[test]
fn validation_reports_are_surfaced() {
    let client = FakeClient::new();
    client.push(
        Scripted::new(409)
            .with_header("Content-Type", "application/shacl-validation-report+n-quads")
            .with_body(
                "<http://example.com/r> <http://www.w3.org/ns/shacl#conforms> \"false\"^^<http://www.w3.org/2001/XMLSchema#boolean> .",
            ),
    );
    let session = session(&client);

    let Err(ProtocolError::ValidationFailed(report)) = session.add_data(
        UploadContent::Bytes(b"<http://example.com/s> <http://example.com/p> 1 .".to_vec()),
        RdfFormat::Turtle,
        None,
        &[],
    ) else {
        panic!("expected a validation report");
    };
    assert_eq!(report.format(), RdfFormat::NQuads);
    assert_eq!(report.parse().unwrap().len(), 1);
}

#[test]
fn statements_are_streamed_with_graph_names() {
    let client = FakeClient::new();
    client.push(Scripted::ok(
        "application/n-quads",
        "<http://example.com/s> <http://example.com/p> \"o\" <http://example.com/g> .\n\
         <http://example.com/s> <http://example.com/p> \"o\" .\n",
    ));
    let session = session(&client);
    let subject = NamedNode::new_unchecked("http://example.com/s");
    let predicate = NamedNode::new_unchecked("http://example.com/p");

    let quads = session
        .get_statements(Some(subject.as_ref().into()), None, None, false, &[])
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(
        quads,
        [
            Quad::new(
                subject.clone(),
                predicate.clone(),
                Literal::new_simple_literal("o"),
                NamedNode::new_unchecked("http://example.com/g"),
            ),
            Quad::new(
                subject,
                predicate,
                Literal::new_simple_literal("o"),
                GraphName::DefaultGraph,
            ),
        ]
    );

    let request = client.last_request();
    assert_eq!(request.method, Method::GET);
    assert_eq!(
        request.param("subj").as_deref(),
        Some("<http://example.com/s>")
    );
    assert_eq!(request.param("pred"), None);
    assert_eq!(request.param("infer").as_deref(), Some("false"));
    assert_eq!(
        request.header("Accept"),
        Some(rdf_accept_header(true, RdfFormat::Turtle).as_str())
    );
}

#[test]
fn size_parses_the_count() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/plain", "42\n"));
    client.push(Scripted::ok("text/plain", "many"));
    let session = session(&client);

    assert_eq!(session.size(&[GraphName::DefaultGraph]).unwrap(), 42);
    let request = client.last_request();
    assert_eq!(
        request.url.as_str().split('?').next(),
        Some(format!("{REPOSITORY_URL}/size").as_str())
    );
    assert_eq!(request.params("context"), ["null"]);

    assert!(matches!(
        session.size(&[]),
        Err(ProtocolError::ProtocolViolation(_))
    ));
}

#[test]
fn namespace_lookup() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/plain", "http://example.com/"));
    client.push(Scripted::new(404).with_body("unknown prefix"));
    client.push(Scripted::new(204));
    let session = session(&client);

    assert_eq!(
        session.namespace("ex").unwrap().as_deref(),
        Some("http://example.com/")
    );
    assert_eq!(
        client.last_request().url.as_str(),
        format!("{REPOSITORY_URL}/namespaces/ex")
    );
    assert_eq!(session.namespace("missing").unwrap(), None);

    session
        .set_namespace_prefix("ex", "http://example.com/")
        .unwrap();
    let request = client.last_request();
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.body_text(), "http://example.com/");
}

#[test]
fn namespaces_are_collected() {
    let client = FakeClient::new();
    client.push(Scripted::ok(
        SPARQL_JSON,
        r#"{"head":{"vars":["prefix","namespace"]},"results":{"bindings":[
            {"prefix":{"type":"literal","value":"ex"},"namespace":{"type":"literal","value":"http://example.com/"}},
            {"prefix":{"type":"literal","value":"rdf"},"namespace":{"type":"literal","value":"http://www.w3.org/1999/02/22-rdf-syntax-ns#"}}
        ]}}"#,
    ));
    let session = session(&client);

    let namespaces = session.namespaces().unwrap();
    assert_eq!(namespaces.len(), 2);
    assert_eq!(
        namespaces.get("ex").map(String::as_str),
        Some("http://example.com/")
    );
}

#[test]
fn repository_url_determines_the_server() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/plain", "12\n"));
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    let session = session(&client);

    assert_eq!(
        session.server_url().as_deref(),
        Some("http://example.com/rdf4j-server")
    );
    assert_eq!(
        session.update_url(),
        Some(format!("{REPOSITORY_URL}/statements"))
    );
    assert_eq!(session.server_protocol().unwrap(), "12");
    assert_eq!(
        client.last_request().url.as_str(),
        "http://example.com/rdf4j-server/protocol"
    );
    assert!(session.repository_list().unwrap().next().is_none());
    assert_eq!(
        client.last_request().url.as_str(),
        "http://example.com/rdf4j-server/repositories"
    );
}

#[test]
fn additional_headers_override_session_headers() {
    let client = FakeClient::new();
    client.push(Scripted::ok("text/csv", ""));
    let session = session(&client);
    session.set_additional_headers([
        ("Accept".to_owned(), "text/csv".to_owned()),
        ("Authorization".to_owned(), "Bearer secret".to_owned()),
    ]);

    drop(session.tuple_query(&QueryRequest::new("SELECT * WHERE { ?s ?p ?o }")));
    let request = client.last_request();
    assert_eq!(request.header("Accept"), Some("text/csv"));
    assert_eq!(request.header("Authorization"), Some("Bearer secret"));
    let (last_name, _) = request.headers.last().unwrap();
    assert_eq!(last_name, "Authorization");
}

#[test]
fn credentials_are_sent_with_every_request() {
    let client = FakeClient::new();
    client.respond_with(|_| Scripted::ok("text/plain", "0"));
    let session = session(&client);
    session.set_username_and_password("Aladdin", "open sesame");

    session.size(&[]).unwrap();
    session.size(&[]).unwrap();
    for request in client.requests() {
        assert_eq!(
            request.header("Authorization"),
            Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
        );
    }

    session.set_additional_headers([("Authorization".to_owned(), "Bearer secret".to_owned())]);
    session.size(&[]).unwrap();
    assert_eq!(
        client.last_request().header("Authorization"),
        Some("Bearer secret")
    );

    session.set_additional_headers(Vec::new());
    session.clear_username_and_password();
    session.size(&[]).unwrap();
    assert_eq!(client.last_request().header("Authorization"), None);
}

#[test]
fn close_cancels_open_results() {
    let client = FakeClient::new();
    let values = (0..1000)
        .map(|i| format!("http://example.com/{i}"))
        .collect::<Vec<_>>();
    let values = values.iter().map(String::as_str).collect::<Vec<_>>();
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&values)));
    let session = session_with_config(
        &client,
        SessionConfig {
            queue_capacity: 1,
            ..SessionConfig::default()
        },
    );

    let mut result = session
        .tuple_query(&QueryRequest::new("SELECT ?s WHERE { ?s ?p ?o }"))
        .unwrap();
    assert!(result.metadata().is_ok());
    session.close();
    session.close();
    assert!(session.is_closed());

    assert!(matches!(
        result.next(),
        Some(Err(ProtocolError::Cancelled))
    ));
    assert!(result.next().is_none());
    wait_until(|| client.releases() == [ReleaseReason::Aborted]);

    assert!(!client.is_closed());
    let requests = client.request_count();
    assert!(matches!(
        session.tuple_query(&QueryRequest::new("SELECT * WHERE { ?s ?p ?o }")),
        Err(ProtocolError::Closed)
    ));
    assert_eq!(client.request_count(), requests);
}

#[test]
fn bindings_are_sent_in_turtle_syntax() {
    let client = FakeClient::new();
    client.push(Scripted::ok(SPARQL_JSON, json_solutions(&[])));
    let session = session(&client);

    drop(
        session
            .tuple_query(
                &QueryRequest::new("SELECT * WHERE { ?s ?p ?o }")
                    .with_binding("s", Term::from(NamedNode::new_unchecked("http://example.com/s")))
                    .with_binding("o", Literal::new_language_tagged_literal_unchecked("chat", "fr")),
            )
            .unwrap(),
    );
    let request = client.last_request();
    assert_eq!(
        request.param("$s").as_deref(),
        Some("<http://example.com/s>")
    );
    assert_eq!(request.param("$o").as_deref(), Some("\"chat\"@fr"));
}
