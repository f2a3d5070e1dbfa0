pub mod events;
pub mod health;
pub mod room;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/room", room::router())
        .nest("/events", events::router())
        .nest("/health", health::router())
}
