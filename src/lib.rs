//! trickle - response relay for OpenAI-compatible gateways
//!
//! Relays upstream completions to clients, re-pacing event streams into
//! per-character events and reconciling token usage for both streamed and
//! buffered responses.

pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod tokens;

pub use config::Config;
pub use error::Error;
