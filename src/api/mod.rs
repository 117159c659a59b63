pub mod handlers;
pub mod middleware;
pub mod orders;
pub mod requests;
pub mod responses;
pub mod routes;

pub use middleware::{idempotency_middleware, IdempotencyState};
pub use orders::OrderBook;
pub use routes::{create_router, AppState};
