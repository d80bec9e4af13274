use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Serialize;
use service::{Channel, ChannelEvent};
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::config::Config;

#[derive(Clone)]
struct ApiState {
    channel: Channel,
}

#[derive(Serialize)]
struct Info {
    host_port: String,
}

/// Binds `config.api.listen` and serves `/info` and `/events` (an SSE feed
/// of [`ChannelEvent`]s).
pub async fn start_server(config: Arc<Config>, channel: Channel) -> anyhow::Result<()> {
    let Some(api) = config.api.clone() else {
        return Ok(());
    };

    let state = ApiState { channel };
    let app = Router::new()
        .route("/info", get(info))
        .route("/events", get(events))
        .with_state(state);

    let listener = TcpListener::bind(api.listen).await?;
    log::info!("api server listening on {}", api.listen);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            log::error!("api server failed: {err}");
        }
    });

    Ok(())
}

async fn info(State(state): State<ApiState>) -> Json<Info> {
    Json(Info {
        host_port: state.channel.host_port().to_string(),
    })
}

async fn events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.channel.subscribe()).filter_map(|event| {
        event.ok().map(|event| Ok(Event::default().data(describe(&event))))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn describe(event: &ChannelEvent) -> String {
    match event {
        ChannelEvent::Listening { host_port } => format!("listening {host_port}"),
        ChannelEvent::Identified { host_port } => format!("identified {host_port}"),
        ChannelEvent::SocketClose { host_port, error } => {
            format!("socket-close {host_port:?} {error:?}")
        }
        ChannelEvent::Endpoint { name } => format!("endpoint {name:?}"),
        ChannelEvent::EndpointMissing { name } => format!("endpoint-missing {name:?}"),
    }
}
