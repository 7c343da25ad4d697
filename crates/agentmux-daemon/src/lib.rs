//! agentmux daemon library
//!
//! Relays one agent session to many subscribers:
//! - Stream reassembly of the agent's stream-json frames
//! - Sequenced session state with replay for late subscribers
//! - Bounded per-subscriber fan-out
//! - Permission prompt correlation (first answer wins)
//! - Serialized upstream command writes with an interrupt lane
//! - Upstream process supervision and a newline-delimited JSON server

pub mod permission;
pub mod relay;
pub mod server;
pub mod session;
pub mod stream;
pub mod upstream;
