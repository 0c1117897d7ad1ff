//! HTTP API: routes, handlers and the error envelope

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::ApiError;
pub use handlers::AppState;
pub use routes::build_router;
