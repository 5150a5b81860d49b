//! HTTP and SSE front end for the chatloop agent.

pub mod config;
pub mod error;
pub mod routes;
pub mod sse;

pub use config::Cli;
pub use error::ApiError;
pub use routes::{router, AppState};
