//! Session state and subscriber fan-out.
//!
//! The store assigns sequence numbers and keeps the replay backlog; the bus
//! delivers sequenced events to every connected subscriber.

mod fanout;
mod store;
mod types;

pub use fanout::FanoutBus;
pub use store::SessionStore;
pub use types::{
    Delivery, DeliveryStream, FanoutConfig, FanoutStats, ReplayGap, SubscribeError, Subscription,
};
