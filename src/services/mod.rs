//! Adapters to upstream GraphQL services.

mod http;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

pub use http::HttpQueryer;

use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Object;

/// One upstream GraphQL service.
///
/// `query` is batched: implementations must return exactly one data object
/// per request, in request order. `subscribe` opens the upstream stream and
/// returns once it is established; events are delivered on `responses`
/// until the upstream completes or `close` fires, then the sender is
/// dropped.
#[async_trait]
pub trait Queryer: Send + Sync {
    fn url(&self) -> &str;

    async fn query(&self, requests: Vec<Request>) -> Result<Vec<Object>, FetchError>;

    async fn subscribe(
        &self,
        request: Request,
        close: oneshot::Receiver<()>,
        responses: mpsc::Sender<Response>,
    ) -> Result<(), FetchError>;
}
