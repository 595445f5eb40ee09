//! The subscription orchestrator.
//!
//! A subscription plan is exactly one root step plus dependent steps. The
//! root stream is delegated to the owning service; each event it emits
//! seeds a re-run of the dependent steps through the executor, and one
//! stitched `data` frame goes back to the client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::execution::ExecutionContext;
use crate::execution::insertion::find_insertion_points;
use crate::gateway::Gateway;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Value;
use crate::protocols::websocket::ClientMessage;
use crate::protocols::websocket::ServerMessage;
use crate::query_planner::QueryPlan;
use crate::query_planner::QueryPlanStep;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(4);
const WRITER_QUEUE: usize = 32;

/// One active subscription: dropping the close sender tears the upstream
/// stream down; the listener ends when the event channel drains.
struct SubscriptionEntry {
    close: Option<oneshot::Sender<()>>,
    listener: JoinHandle<()>,
}

impl SubscriptionEntry {
    fn close(mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        self.listener.abort();
    }
}

/// Drives one client socket: handles the `graphql-ws` control frames,
/// multiplexes active subscriptions by client-supplied id, and emits the
/// keep-alive heartbeat.
pub(crate) async fn handle_socket(gateway: Arc<Gateway>, socket: WebSocket) {
    let (sink, mut receiver) = socket.split();

    // all frames funnel through one writer task
    let (writer, writer_rx) = mpsc::channel::<ServerMessage>(WRITER_QUEUE);
    let writer_task = tokio::spawn(write_frames(sink, writer_rx));

    let mut heartbeat: Option<JoinHandle<()>> = None;
    let mut subscriptions: HashMap<String, SubscriptionEntry> = HashMap::new();

    while let Some(Ok(message)) = receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) else {
            tracing::error!("unknown subscription message: {text}");
            break;
        };

        match client_message {
            ClientMessage::ConnectionInit { .. } => {
                if writer.send(ServerMessage::ConnectionAck).await.is_err() {
                    break;
                }
                if heartbeat.is_none() {
                    let writer = writer.clone();
                    heartbeat = Some(tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            if writer.send(ServerMessage::KeepAlive).await.is_err() {
                                return;
                            }
                        }
                    }));
                }
            }
            ClientMessage::Start { id, payload } => {
                match start_subscription(&gateway, id.clone(), payload, writer.clone()).await {
                    Ok(entry) => {
                        if let Some(previous) = subscriptions.insert(id, entry) {
                            previous.close();
                        }
                    }
                    Err(errors) => {
                        if writer
                            .send(ServerMessage::error(Some(id), errors))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            ClientMessage::Stop { id } => {
                if let Some(entry) = subscriptions.remove(&id) {
                    entry.close();
                }
            }
            ClientMessage::ConnectionTerminate => break,
        }
    }

    for (_, entry) in subscriptions {
        entry.close();
    }
    if let Some(heartbeat) = heartbeat {
        heartbeat.abort();
    }
    drop(writer);
    let _ = writer_task.await;
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerMessage>,
) {
    while let Some(frame) = frames.recv().await {
        let Ok(text) = serde_json::to_string(&frame) else {
            continue;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Plans the operation, opens the upstream stream for its single root step
/// and spawns the listener that re-runs dependent steps per event.
async fn start_subscription(
    gateway: &Arc<Gateway>,
    id: String,
    request: Request,
    writer: mpsc::Sender<ServerMessage>,
) -> Result<SubscriptionEntry, Vec<graphql::Error>> {
    let plan = gateway.plan_request(&request)?;

    if plan.root_steps.len() != 1 {
        return Err(graphql::Error::validation("too many root operations").into_graphql_errors());
    }

    // the dependent sub-plan re-runs per event; the root step streams
    let mut root_step = plan.root_steps[0].clone();
    let dependents: Vec<QueryPlanStep> = std::mem::take(&mut root_step.then);

    let Some(url) = root_step.service.as_url() else {
        return Err(
            graphql::Error::validation("subscriptions cannot target introspection")
                .into_graphql_errors(),
        );
    };
    let queryer = gateway
        .queryers
        .get(url)
        .cloned()
        .ok_or_else(|| {
            graphql::Error::validation(format!("unable to find queryer for: {url}"))
                .into_graphql_errors()
        })?;

    let root_request = Request {
        query: root_step.query_string.clone(),
        variables: request.variables.clone(),
        operation_name: request.operation_name.clone(),
        uploads: Vec::new(),
    };

    let (close, close_rx) = oneshot::channel();
    // bounded to one in-flight event: a slow re-run back-pressures upstream
    let (events, mut events_rx) = mpsc::channel::<Response>(1);

    queryer
        .subscribe(root_request, close_rx, events)
        .await
        .map_err(|error| error.into_graphql_errors())?;

    let gateway = gateway.clone();
    let variables = request.variables.clone();
    let listener = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let payload =
                prepare_response(&gateway, &plan, &root_step, &dependents, &variables, event)
                    .await;
            let frame = ServerMessage::Data {
                id: id.clone(),
                payload,
            };
            if writer.send(frame).await.is_err() {
                return;
            }
        }
        // upstream completed; close the client stream
        let _ = writer.send(ServerMessage::Complete { id }).await;
    });

    Ok(SubscriptionEntry {
        close: Some(close),
        listener,
    })
}

/// Stitch one upstream event: locate the dependent steps' insertion points
/// in the payload, execute them with the payload as the initial result,
/// scrub, and hand back a single response.
async fn prepare_response(
    gateway: &Gateway,
    plan: &QueryPlan,
    root_step: &QueryPlanStep,
    dependents: &[QueryPlanStep],
    variables: &crate::json_ext::Object,
    event: Response,
) -> Response {
    let Some(Value::Object(data)) = event.data.clone() else {
        return scrubbed(plan, event);
    };
    if !event.errors.is_empty() || dependents.is_empty() {
        return scrubbed(plan, event);
    }

    let mut event_steps = Vec::new();
    for step in dependents {
        let points = match find_insertion_points(
            &step.insertion_point,
            &root_step.selection_set,
            &data,
            vec![root_step.insertion_point.clone()],
        ) {
            Ok(points) => points,
            Err(error) => return Response::from_errors(error.into_graphql_errors()),
        };
        for insertion_point in points {
            let mut event_step = step.clone();
            event_step.insertion_point = insertion_point;
            event_steps.push(event_step);
        }
    }

    let event_plan = QueryPlan {
        root_steps: event_steps,
        scrub_fields: plan.scrub_fields.clone(),
    };
    let ctx = ExecutionContext {
        plan: &event_plan,
        variables,
        queryers: &gateway.queryers,
        initial_result: Some(data),
        get_parent_type_from_id: gateway.get_parent_type_from_id.clone(),
    };

    match gateway.executor.execute(&ctx).await {
        Ok(mut result) => {
            event_plan.scrub_fields.clean(&mut result);
            Response::from_data(Value::Object(result))
        }
        Err(errors) => Response { data: None, errors },
    }
}

fn scrubbed(plan: &QueryPlan, mut response: Response) -> Response {
    if let Some(Value::Object(data)) = &mut response.data {
        plan.scrub_fields.clean(data);
    }
    response
}
