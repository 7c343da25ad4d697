//! Relay module: one upstream agent session, many subscribers.
//!
//! This is the glue that connects:
//! - the stream reassembler (frames to logical events)
//! - the session store and fan-out bus (sequencing, replay, delivery)
//! - the permission correlator (first answer wins)
//! - the command sink (serialized upstream writes)

mod handle;
mod pipeline;
mod sink;
mod types;

pub use handle::RelayHandle;
pub use pipeline::SessionRelay;
pub use sink::{CommandSink, SinkError, UpstreamWriter};
pub use types::{CommandOutcome, RelayError, RelayOptions, RelayStats, SubscribeRequest};
