//! Permission prompts raised by the agent and answered by subscribers.
//!
//! Every prompt is fanned out to all subscribers; the first answer wins and is
//! the only one forwarded upstream.

mod correlator;
mod types;

pub use correlator::Correlator;
pub use types::{CorrelatorConfig, CorrelatorError, OpenRequest, PendingRequest, Resolution};
