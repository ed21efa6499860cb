mod coordinator;
mod registry;

pub use coordinator::{TimerCoordinator, TimerStarted, TimerStatus, TimerStopped};
pub use registry::{SessionKey, SessionRegistry, StoppedSession};
