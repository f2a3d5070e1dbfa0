use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_core::Stream;
use keith_schema::BusMessage;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stream", get(event_stream))
}

fn to_event(msg: &BusMessage) -> Option<Event> {
    serde_json::to_string(msg)
        .ok()
        .map(|json| Event::default().data(json))
}

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.bus.subscribe_all().await;

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;

            while let Ok(msg) = rx.try_recv() {
                if let Some(event) = to_event(&msg) {
                    yield Ok(event);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
