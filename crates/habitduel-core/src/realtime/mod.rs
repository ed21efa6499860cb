//! Realtime timer state for the opponent's client.

mod broadcaster;
mod endpoint;
mod message;

pub use broadcaster::RealtimeBroadcaster;
pub use endpoint::LiveEndpoint;
pub use message::{LiveAction, LiveRequest, Principal, SignalStatus, TimerMessage};
