//! JSON surface for the home-automation platform.
//!
//! Every read is answered from the engine's cache; no request ever
//! triggers an upstream rail fetch.

mod dto;
mod routes;
mod state;

pub use dto::*;
pub use routes::{AppError, create_router};
pub use state::AppState;
