pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

pub use middleware::{idempotency_middleware, track_http_metrics};
pub use routes::{create_router, AppState};
