//! HTTP front end.
//!
//! Accepts OpenAI-compatible completion requests, forwards them to the
//! configured upstream and hands the response to the relay.

mod handlers;
mod server;
pub mod types;

pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use types::RequestView;
