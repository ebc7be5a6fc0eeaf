//! HTTP surface: health, entity inspection and the WebSocket upgrade

pub mod routes;

pub use routes::{build_router, AppError};
