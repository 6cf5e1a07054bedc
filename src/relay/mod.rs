//! Response relay between an upstream completion provider and the client.
//!
//! Two paths share the wire types and usage reconciliation:
//! - [`relay_stream`] frames the upstream event stream into lines, decodes
//!   and paces them, and delivers one event at a time.
//! - [`relay_full`] buffers a complete body, surfaces embedded error
//!   envelopes and replays the rest with its status and headers.

pub mod delivery;
pub mod extract;
pub mod filter;
pub mod frame;
pub mod full;
pub mod pacing;
pub mod stream;
pub mod types;
pub mod upstream;
pub mod usage;

pub use delivery::{EventSink, EventStream, TERMINAL_EVENT};
pub use full::{relay_full, FullRelayOutcome, FullRelayRequest, HeaderCopy};
pub use pacing::Pacer;
pub use stream::{relay_stream, StreamOutcome};
pub use types::{RelayMode, Usage};
pub use upstream::{UpstreamBody, UpstreamResponse};
pub use usage::{reconcile_usage, TokenCounter};
