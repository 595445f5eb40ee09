//! The HTTP surface: `POST /` for queries and mutations (single, batch and
//! multipart bodies), `GET /` for the playground or a `graphql-ws` upgrade.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response as AxumResponse;
use axum::routing::post;
use axum::Router;

use crate::error::RequestError;
use crate::fanout::async_map_reduce;
use crate::gateway::Gateway;
use crate::graphql::FileUpload;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Value;
use crate::protocols::websocket::GRAPHQL_WS_PROTOCOL;
use crate::subscription;

/// Builds the axum router serving the gateway at `/`.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", post(graphql_post).get(graphql_get))
        .with_state(gateway)
}

async fn graphql_post(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> AxumResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let parsed = match parse_requests(&content_type, body).await {
        Ok(parsed) => parsed,
        Err(error) => {
            let response = Response::from_errors(vec![crate::graphql::Error::new(
                crate::graphql::ERROR_CODE_UNDEFINED,
                error.to_string(),
            )]);
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                axum::Json(response),
            )
                .into_response();
        }
    };

    let ParsedRequests { requests, is_batch } = parsed;

    let results = async_map_reduce(
        requests.into_iter().enumerate().collect::<Vec<_>>(),
        Vec::new(),
        |(index, request)| {
            let gateway = gateway.clone();
            async move { Ok::<_, Infallible>((index, gateway.execute(&request).await)) }
        },
        |mut acc: Vec<(usize, Response)>, value| {
            acc.push(value);
            acc
        },
    )
    .await;

    let mut results = match results {
        Ok(results) => results,
        Err(_) => Vec::new(),
    };
    results.sort_by_key(|(index, _)| *index);
    let mut responses: Vec<Response> = results.into_iter().map(|(_, response)| response).collect();

    if is_batch {
        axum::Json(responses).into_response()
    } else {
        let single = responses.pop().unwrap_or_else(|| Response {
            data: Some(Value::Null),
            errors: Vec::new(),
        });
        axum::Json(single).into_response()
    }
}

async fn graphql_get(State(gateway): State<Arc<Gateway>>, request: axum::extract::Request) -> AxumResponse {
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &gateway).await.ok();

    if let Some(upgrade) = upgrade {
        return upgrade
            .protocols([GRAPHQL_WS_PROTOCOL])
            .on_upgrade(move |socket| subscription::handle_socket(gateway, socket))
            .into_response();
    }

    if gateway.playground {
        return Html(crate::playground::playground_html()).into_response();
    }

    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

#[derive(Debug)]
pub(crate) struct ParsedRequests {
    pub(crate) requests: Vec<Request>,
    pub(crate) is_batch: bool,
}

/// Parses a POST body per its content type: JSON or text bodies directly,
/// multipart bodies per the GraphQL multipart request spec.
pub(crate) async fn parse_requests(
    content_type: &str,
    body: Bytes,
) -> Result<ParsedRequests, RequestError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "" | "text/plain" | "application/json" => parse_body(&body),
        "multipart/form-data" => parse_multipart(content_type, body).await,
        other => Err(RequestError::UnknownContentType(other.to_string())),
    }
}

/// Batch mode is detected by the first structural byte.
pub(crate) fn is_batch_mode(body: &[u8]) -> bool {
    for byte in body {
        match byte {
            b'[' => return true,
            b'{' => return false,
            _ => {}
        }
    }
    false
}

fn parse_body(body: &[u8]) -> Result<ParsedRequests, RequestError> {
    if is_batch_mode(body) {
        let requests: Vec<Request> =
            serde_json::from_slice(body).map_err(|error| RequestError::ParseFailure {
                reason: error.to_string(),
            })?;
        for request in &requests {
            if request.query.is_empty() {
                return Err(RequestError::MissingQuery);
            }
        }
        return Ok(ParsedRequests {
            requests,
            is_batch: true,
        });
    }

    let request: Request =
        serde_json::from_slice(body).map_err(|error| RequestError::ParseFailure {
            reason: error.to_string(),
        })?;
    if request.query.is_empty() {
        return Err(RequestError::MissingQuery);
    }
    Ok(ParsedRequests {
        requests: vec![request],
        is_batch: false,
    })
}

async fn parse_multipart(content_type: &str, body: Bytes) -> Result<ParsedRequests, RequestError> {
    let boundary =
        multer::parse_boundary(content_type).map_err(|error| RequestError::ParseFailure {
            reason: error.to_string(),
        })?;
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut operations: Option<Bytes> = None;
    let mut file_map: Option<String> = None;
    let mut files: HashMap<String, (String, Bytes)> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| RequestError::ParseFailure {
            reason: error.to_string(),
        })?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|error| RequestError::ParseFailure {
                reason: error.to_string(),
            })?;

        match name.as_str() {
            "operations" => operations = Some(content),
            "map" => file_map = Some(String::from_utf8_lossy(&content).to_string()),
            _ => {
                files.insert(name, (filename, content));
            }
        }
    }

    let operations = operations.ok_or(RequestError::ParseFailure {
        reason: "missing operations field".to_string(),
    })?;
    let mut parsed = parse_body(&operations)?;

    let file_map: HashMap<String, Vec<String>> = serde_json::from_str(
        file_map
            .as_deref()
            .ok_or(RequestError::InvalidFileMap {
                reason: "missing map field".to_string(),
            })?,
    )
    .map_err(|error| RequestError::InvalidFileMap {
        reason: error.to_string(),
    })?;
    if file_map.is_empty() {
        return Err(RequestError::InvalidFileMap {
            reason: "file map is empty".to_string(),
        });
    }

    for (file_index, paths) in file_map {
        let (filename, content) =
            files
                .get(&file_index)
                .cloned()
                .ok_or(RequestError::MissingFilePart {
                    index: file_index.clone(),
                })?;
        for path in paths {
            inject_file(
                &mut parsed.requests,
                parsed.is_batch,
                &path,
                &filename,
                content.clone(),
            )?;
        }
    }

    Ok(parsed)
}

/// Attaches one file to the request addressed by `path`, after checking
/// the path lands on a null variable slot.
fn inject_file(
    requests: &mut [Request],
    is_batch: bool,
    path: &str,
    filename: &str,
    content: Bytes,
) -> Result<(), RequestError> {
    let invalid = || RequestError::InvalidFilePath {
        path: path.to_string(),
    };

    let mut segments: Vec<&str> = path.split('.').collect();

    let mut request_index = 0usize;
    if is_batch {
        let first = segments.first().ok_or_else(invalid)?;
        request_index = first.parse().map_err(|_| invalid())?;
        segments.remove(0);
    }

    if segments.first() != Some(&"variables") || segments.len() < 2 {
        return Err(invalid());
    }
    let variable_segments = &segments[1..];

    let request = requests.get_mut(request_index).ok_or_else(invalid)?;
    let root = request
        .variables
        .get(variable_segments[0])
        .ok_or_else(invalid)?;
    validate_upload_slot(root, &variable_segments[1..], path)?;

    request.uploads.push(FileUpload {
        variable_path: variable_segments.join("."),
        filename: filename.to_string(),
        content,
    });
    Ok(())
}

fn validate_upload_slot(value: &Value, rest: &[&str], path: &str) -> Result<(), RequestError> {
    let invalid = || RequestError::InvalidFilePath {
        path: path.to_string(),
    };

    if rest.is_empty() {
        return value.is_null().then_some(()).ok_or_else(invalid);
    }

    match value {
        Value::Object(object) => {
            let next = object.get(rest[0]).ok_or_else(invalid)?;
            validate_upload_slot(next, &rest[1..], path)
        }
        Value::Array(items) => {
            let index: usize = rest[0].parse().map_err(|_| invalid())?;
            let next = items.get(index).ok_or_else(invalid)?;
            validate_upload_slot(next, &rest[1..], path)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_mode_detection() {
        assert!(is_batch_mode(b"  [ {\"query\": \"{ a }\"} ]"));
        assert!(!is_batch_mode(b"  { \"query\": \"{ a }\" }"));
        assert!(!is_batch_mode(b""));
    }

    #[tokio::test]
    async fn parses_a_single_json_request() {
        let parsed = parse_requests(
            "application/json",
            Bytes::from_static(br#"{"query": "{ a }", "variables": {"x": 1}}"#),
        )
        .await
        .unwrap();
        assert!(!parsed.is_batch);
        assert_eq!(parsed.requests.len(), 1);
        assert_eq!(parsed.requests[0].query, "{ a }");
    }

    #[tokio::test]
    async fn parses_a_batch() {
        let parsed = parse_requests(
            "text/plain",
            Bytes::from_static(br#"[{"query": "{ a }"}, {"query": "{ b }"}]"#),
        )
        .await
        .unwrap();
        assert!(parsed.is_batch);
        assert_eq!(parsed.requests.len(), 2);
    }

    #[tokio::test]
    async fn missing_query_is_rejected() {
        let error = parse_requests("application/json", Bytes::from_static(br#"{"query": ""}"#))
            .await
            .unwrap_err();
        assert!(matches!(error, RequestError::MissingQuery));
    }

    #[tokio::test]
    async fn unknown_content_types_are_rejected() {
        let error = parse_requests("application/yaml", Bytes::from_static(b"query: nope"))
            .await
            .unwrap_err();
        assert!(matches!(error, RequestError::UnknownContentType(_)));
    }

    fn multipart_body(operations: &str, map: &str) -> (String, Bytes) {
        let boundary = "trellis-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"operations\"\r\n\r\n\
             {operations}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"map\"\r\n\r\n\
             {map}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"0\"; filename=\"cat.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             PNGDATA\r\n\
             --{boundary}--\r\n"
        );
        (
            format!("multipart/form-data; boundary={boundary}"),
            Bytes::from(body),
        )
    }

    #[tokio::test]
    async fn multipart_uploads_attach_to_null_variables() {
        let (content_type, body) = multipart_body(
            r#"{"query": "mutation ($file: Upload) { upload(file: $file) }", "variables": {"file": null}}"#,
            r#"{"0": ["variables.file"]}"#,
        );
        let parsed = parse_requests(&content_type, body).await.unwrap();
        let request = &parsed.requests[0];
        assert_eq!(request.uploads.len(), 1);
        assert_eq!(request.uploads[0].variable_path, "file");
        assert_eq!(request.uploads[0].filename, "cat.png");
        assert_eq!(request.uploads[0].content.as_ref(), b"PNGDATA");
    }

    #[tokio::test]
    async fn multipart_uploads_address_list_slots() {
        let (content_type, body) = multipart_body(
            r#"{"query": "mutation ($files: [Upload]) { uploads(files: $files) }", "variables": {"files": [null, null]}}"#,
            r#"{"0": ["variables.files.1"]}"#,
        );
        let parsed = parse_requests(&content_type, body).await.unwrap();
        assert_eq!(parsed.requests[0].uploads[0].variable_path, "files.1");
    }

    #[tokio::test]
    async fn multipart_rejects_non_null_slots() {
        let (content_type, body) = multipart_body(
            r#"{"query": "mutation ($file: Upload) { upload(file: $file) }", "variables": {"file": "already set"}}"#,
            r#"{"0": ["variables.file"]}"#,
        );
        let error = parse_requests(&content_type, body).await.unwrap_err();
        assert!(matches!(error, RequestError::InvalidFilePath { .. }));
    }

    #[tokio::test]
    async fn multipart_rejects_an_empty_map() {
        let (content_type, body) = multipart_body(
            r#"{"query": "{ a }", "variables": {}}"#,
            r#"{}"#,
        );
        let error = parse_requests(&content_type, body).await.unwrap_err();
        assert!(matches!(error, RequestError::InvalidFileMap { .. }));
    }

    #[tokio::test]
    async fn serves_single_and_batch_posts() {
        use crate::gateway::Gateway;
        use crate::json_ext::Object;
        use crate::services::Queryer;
        use crate::test_utils::MockQueryer;
        use crate::test_utils::StaticIntrospector;

        let upstream = MockQueryer::new(
            "http://svc",
            Box::new(|_| {
                let mut data = Object::default();
                data.insert("hello", serde_json_bytes::json!("world"));
                Ok(data)
            }),
        );
        let gateway = Gateway::builder()
            .service("http://svc")
            .introspector(Arc::new(StaticIntrospector {
                schemas: vec!["type Query { hello: String }"],
            }))
            .queryer_factory(Arc::new(move |_| upstream.clone() as Arc<dyn Queryer>))
            .build()
            .await
            .unwrap();

        let app = router(Arc::new(gateway));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = format!("http://{addr}/");
        let client = reqwest::Client::new();

        // single mode: one object back
        let single: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({"query": "{ hello }"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(single, serde_json::json!({"data": {"hello": "world"}}));

        // batch mode: an array back, in request order
        let batch: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!([
                {"query": "{ hello }"},
                {"query": "{ hello }"}
            ]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(batch.as_array().unwrap().len(), 2);

        // unparseable bodies are a 422
        let status = client
            .post(&url)
            .header("content-type", "application/json")
            .body("not json at all")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 422);
    }

    #[tokio::test]
    async fn multipart_batch_paths_carry_the_request_index() {
        let boundary = "trellis-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"operations\"\r\n\r\n\
             [{{\"query\": \"mutation ($f: Upload) {{ up(f: $f) }}\", \"variables\": {{\"f\": null}}}}, {{\"query\": \"{{ b }}\"}}]\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"map\"\r\n\r\n\
             {{\"0\": [\"0.variables.f\"]}}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"0\"; filename=\"a.bin\"\r\n\r\n\
             DATA\r\n\
             --{boundary}--\r\n"
        );
        let parsed = parse_requests(
            &format!("multipart/form-data; boundary={boundary}"),
            Bytes::from(body),
        )
        .await
        .unwrap();
        assert!(parsed.is_batch);
        assert_eq!(parsed.requests[0].uploads.len(), 1);
        assert!(parsed.requests[1].uploads.is_empty());
    }
}
