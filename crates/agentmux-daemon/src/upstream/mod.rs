//! Upstream connection management.
//!
//! The supervisor owns the reconnect state machine; a connector decides what
//! a connection is (an agent child process in production, in-memory pipes in
//! tests).

mod policy;
mod process;
mod supervisor;
mod types;

pub use policy::ReconnectPolicy;
pub use process::{ProcessConfig, ProcessConnector};
pub use supervisor::UpstreamSupervisor;
pub use types::{
    ConnectContext, UpstreamConnection, UpstreamConnector, UpstreamError, UpstreamReader,
};
