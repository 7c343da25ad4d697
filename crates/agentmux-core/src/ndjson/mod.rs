//! NDJSON codec for the agent's stream-json protocol.
//!
//! Parses newline-delimited JSON from the agent's stdout into canonical
//! frame types (tolerant reader pattern) and encodes outbound frames for
//! its stdin.

mod outbound;
mod parser;
mod types;

pub use outbound::UpstreamCommand;
pub use parser::{parse_line, parse_value};
pub use types::*;
