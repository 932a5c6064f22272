//! HTTP query surface for the boundary store.
//!
//! `routes::build_router` is the single entry point; `main.rs` attaches
//! middleware and starts the server.  Handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the router directly.

pub mod api_types;
pub mod routes;
pub mod state;
