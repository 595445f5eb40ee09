//! Shared test doubles.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::FetchError;
use crate::error::SchemaError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::introspection::RemoteSchemaIntrospector;
use crate::json_ext::Object;
use crate::services::Queryer;

type QueryHandler = Box<dyn Fn(&Request) -> Result<Object, FetchError> + Send + Sync>;

/// A scriptable upstream service: a handler for queries and a canned event
/// stream for subscriptions.
pub(crate) struct MockQueryer {
    url: String,
    handler: QueryHandler,
    subscription_events: Vec<Response>,
    requests: Mutex<Vec<Request>>,
}

impl MockQueryer {
    pub(crate) fn new(url: &str, handler: QueryHandler) -> Arc<Self> {
        Arc::new(MockQueryer {
            url: url.to_string(),
            handler,
            subscription_events: Vec::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_subscription_events(url: &str, events: Vec<Response>) -> Arc<Self> {
        Arc::new(MockQueryer {
            url: url.to_string(),
            handler: Box::new(|_| Ok(Object::default())),
            subscription_events: events,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn seen_requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Queryer for MockQueryer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn query(&self, requests: Vec<Request>) -> Result<Vec<Object>, FetchError> {
        let mut seen = self.requests.lock().unwrap();
        seen.extend(requests.iter().cloned());
        drop(seen);
        requests
            .iter()
            .map(|request| (self.handler)(request))
            .collect()
    }

    async fn subscribe(
        &self,
        request: Request,
        mut close: oneshot::Receiver<()>,
        responses: mpsc::Sender<Response>,
    ) -> Result<(), FetchError> {
        self.requests.lock().unwrap().push(request);
        let events = self.subscription_events.clone();
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = &mut close => return,
                    sent = responses.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

/// Hands prepared schemas back instead of hitting the network.
pub(crate) struct StaticIntrospector {
    pub(crate) schemas: Vec<&'static str>,
}

#[async_trait]
impl RemoteSchemaIntrospector for StaticIntrospector {
    async fn introspect(
        &self,
        urls: &[Arc<str>],
    ) -> Result<Vec<apollo_compiler::Schema>, SchemaError> {
        assert_eq!(urls.len(), self.schemas.len());
        Ok(self
            .schemas
            .iter()
            .map(|sdl| apollo_compiler::Schema::parse(sdl, "static.graphql").unwrap())
            .collect())
    }
}
