//! The default queryer: batched HTTP POSTs plus `graphql-ws` subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::SinkExt;
use futures::StreamExt;
use http::header::HeaderValue;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::protocols::websocket::ClientMessage;
use crate::protocols::websocket::ServerMessage;
use crate::protocols::websocket::GRAPHQL_WS_PROTOCOL;
use crate::services::Queryer;

/// Talks to one upstream service over HTTP, batching requests into JSON
/// arrays (chunked at `max_batch_size`) and forwarding file uploads as
/// multipart bodies.
pub struct HttpQueryer {
    url: Arc<str>,
    client: reqwest::Client,
    max_batch_size: usize,
}

const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl HttpQueryer {
    pub fn new(url: Arc<str>, max_batch_size: usize) -> Self {
        HttpQueryer {
            url,
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn http_error(&self, status: Option<u16>, reason: impl Into<String>) -> FetchError {
        FetchError::SubrequestHttpError {
            status_code: status,
            service: self.url.to_string(),
            reason: reason.into(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<bytes::Bytes, FetchError> {
        let response = request
            .send()
            .await
            .map_err(|error| self.http_error(None, error.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| self.http_error(Some(status.as_u16()), error.to_string()))?;

        if !status.is_success() {
            return Err(self.http_error(
                Some(status.as_u16()),
                format!("response was not successful with status code: {}", status.as_u16()),
            ));
        }
        Ok(body)
    }

    /// POST a JSON array of requests, expecting an array of responses.
    async fn fetch(&self, inputs: &[Request]) -> Result<Vec<Response>, FetchError> {
        let body = serde_json::to_vec(inputs)
            .map_err(|error| FetchError::MalformedRequest {
                reason: error.to_string(),
            })?;
        let bytes = self
            .send(
                self.client
                    .post(self.url.as_ref())
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(body),
            )
            .await?;

        Response::batch_from_bytes(self.url.as_ref(), bytes)
    }

    /// POST a single request carrying uploads, per the GraphQL multipart
    /// request spec: an `operations` field, a `map` field, one part per
    /// file.
    async fn fetch_multipart(&self, request: &Request) -> Result<Response, FetchError> {
        let operations =
            serde_json::to_string(request).map_err(|error| FetchError::MalformedRequest {
                reason: error.to_string(),
            })?;

        let mut map = serde_json::Map::new();
        for (index, upload) in request.uploads.iter().enumerate() {
            map.insert(
                index.to_string(),
                serde_json::json!([format!("variables.{}", upload.variable_path)]),
            );
        }
        let map = serde_json::Value::Object(map).to_string();

        let mut form = reqwest::multipart::Form::new()
            .text("operations", operations)
            .text("map", map);
        for (index, upload) in request.uploads.iter().enumerate() {
            form = form.part(
                index.to_string(),
                reqwest::multipart::Part::bytes(upload.content.to_vec())
                    .file_name(upload.filename.clone()),
            );
        }

        let bytes = self
            .send(self.client.post(self.url.as_ref()).multipart(form))
            .await?;

        Response::from_bytes(self.url.as_ref(), bytes)
    }

    fn data_object(&self, response: Response) -> Result<Object, FetchError> {
        if !response.errors.is_empty() {
            return Err(FetchError::SubrequestErrors {
                service: self.url.to_string(),
                errors: response.errors,
            });
        }
        match response.data {
            Some(Value::Object(object)) => Ok(object),
            Some(Value::Null) | None => Ok(Object::default()),
            Some(other) => Err(FetchError::SubrequestMalformedResponse {
                service: self.url.to_string(),
                reason: format!("data was not an object: {other:?}"),
            }),
        }
    }

    async fn query_batch(&self, inputs: Vec<Request>) -> Result<Vec<Object>, FetchError> {
        let mut results: Vec<Option<Object>> = vec![None; inputs.len()];
        let mut to_fetch = Vec::new();
        let mut fetch_slots = Vec::new();

        for (index, input) in inputs.into_iter().enumerate() {
            if input.uploads.is_empty() {
                fetch_slots.push(index);
                to_fetch.push(input);
            } else {
                let response = self.fetch_multipart(&input).await?;
                results[index] = Some(self.data_object(response)?);
            }
        }

        if !to_fetch.is_empty() {
            let responses = self.fetch(&to_fetch).await?;
            if responses.len() != to_fetch.len() {
                return Err(FetchError::SubrequestMalformedResponse {
                    service: self.url.to_string(),
                    reason: "not all requests were fetched".to_string(),
                });
            }
            for (slot, response) in fetch_slots.into_iter().zip(responses) {
                results[slot] = Some(self.data_object(response)?);
            }
        }

        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }
}

#[async_trait]
impl Queryer for HttpQueryer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, requests: Vec<Request>) -> Result<Vec<Object>, FetchError> {
        if requests.len() <= self.max_batch_size {
            return self.query_batch(requests).await;
        }

        let mut chunks = Vec::new();
        let mut rest = requests;
        while !rest.is_empty() {
            let tail = rest.split_off(rest.len().min(self.max_batch_size));
            chunks.push(rest);
            rest = tail;
        }

        let responses =
            try_join_all(chunks.into_iter().map(|chunk| self.query_batch(chunk))).await?;
        Ok(responses.into_iter().flatten().collect())
    }

    async fn subscribe(
        &self,
        request: Request,
        mut close: oneshot::Receiver<()>,
        responses: mpsc::Sender<Response>,
    ) -> Result<(), FetchError> {
        let ws_error = |reason: String| FetchError::SubrequestWsError {
            service: self.url.to_string(),
            reason,
        };

        let mut ws_url = url::Url::parse(&self.url).map_err(|error| ws_error(error.to_string()))?;
        let scheme = match ws_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| ws_error("cannot derive websocket url".to_string()))?;

        let mut ws_request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|error| ws_error(error.to_string()))?;
        ws_request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(GRAPHQL_WS_PROTOCOL),
        );

        let (mut stream, _) = connect_async(ws_request)
            .await
            .map_err(|error| ws_error(error.to_string()))?;

        let init = serde_json::to_string(&ClientMessage::ConnectionInit { payload: None })
            .map_err(|error| ws_error(error.to_string()))?;
        stream
            .send(Message::text(init))
            .await
            .map_err(|error| ws_error(error.to_string()))?;

        let start = serde_json::to_string(&ClientMessage::Start {
            id: "1".to_string(),
            payload: request,
        })
        .map_err(|error| ws_error(error.to_string()))?;
        stream
            .send(Message::text(start))
            .await
            .map_err(|error| ws_error(error.to_string()))?;

        let service = self.url.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close => {
                        let _ = stream.close(None).await;
                        break;
                    }
                    message = stream.next() => {
                        let Some(Ok(message)) = message else {
                            break;
                        };
                        let text = match message {
                            Message::Text(text) => text.to_string(),
                            Message::Binary(bytes) => {
                                String::from_utf8_lossy(&bytes).to_string()
                            }
                            Message::Close(_) => break,
                            _ => continue,
                        };
                        let Ok(server_message) = serde_json::from_str::<ServerMessage>(&text)
                        else {
                            tracing::trace!(
                                service = %service,
                                "unparseable websocket frame from upstream"
                            );
                            continue;
                        };
                        match server_message {
                            ServerMessage::Data { payload, .. } => {
                                if responses.send(payload).await.is_err() {
                                    break;
                                }
                            }
                            ServerMessage::Error { payload, .. } => {
                                let errors = serde_json_bytes::from_value(payload)
                                    .unwrap_or_default();
                                let _ = responses
                                    .send(Response::from_errors(errors))
                                    .await;
                                break;
                            }
                            ServerMessage::Complete { .. }
                            | ServerMessage::ConnectionError { .. } => break,
                            ServerMessage::ConnectionAck | ServerMessage::KeepAlive => {}
                        }
                    }
                }
            }
            // dropping `responses` signals completion to the listener
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::Json;
    use axum::Router;
    use serde_json_bytes::json;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn sends_batches_and_preserves_order() {
        let app = Router::new().route(
            "/",
            post(|Json(body): Json<serde_json::Value>| async move {
                let requests = body.as_array().unwrap();
                let responses: Vec<serde_json::Value> = requests
                    .iter()
                    .map(|request| {
                        serde_json::json!({"data": {"echo": request["query"]}})
                    })
                    .collect();
                Json(serde_json::Value::Array(responses))
            }),
        );
        let url = serve(app).await;

        let queryer = HttpQueryer::new(Arc::from(url.as_str()), 2);
        let results = queryer
            .query(vec![
                Request::new("{ one }"),
                Request::new("{ two }"),
                Request::new("{ three }"),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].get("echo"), Some(&json!("{ one }")));
        assert_eq!(results[1].get("echo"), Some(&json!("{ two }")));
        assert_eq!(results[2].get("echo"), Some(&json!("{ three }")));
    }

    #[tokio::test]
    async fn upstream_errors_fail_the_batch() {
        let app = Router::new().route(
            "/",
            post(|| async {
                Json(serde_json::json!([
                    {"data": null, "errors": [{"message": "nope"}]}
                ]))
            }),
        );
        let url = serve(app).await;

        let queryer = HttpQueryer::new(Arc::from(url.as_str()), 10);
        let error = queryer
            .query(vec![Request::new("{ one }")])
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::SubrequestErrors { .. }));
    }

    #[tokio::test]
    async fn http_failures_name_the_status() {
        let app = Router::new().route(
            "/",
            post(|| async { (http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let url = serve(app).await;

        let queryer = HttpQueryer::new(Arc::from(url.as_str()), 10);
        let error = queryer
            .query(vec![Request::new("{ one }")])
            .await
            .unwrap_err();
        match error {
            FetchError::SubrequestHttpError { status_code, .. } => {
                assert_eq!(status_code, Some(500));
            }
            other => panic!("expected an http error, got {other:?}"),
        }
    }
}
