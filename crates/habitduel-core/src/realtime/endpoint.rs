//! Live action endpoint.
//!
//! Message-oriented entry point keyed by challenge: a connected client sends
//! `{"action": "START" | "STOP"}` and the outcome is broadcast on the
//! challenge channel. The sender is the connection's [`Principal`].
//!
//! There is no reply path on this transport, so state conflicts and
//! malformed payloads become `ERROR` broadcasts. Authorization, missing
//! records, and persistence failures are returned to the caller.

use std::sync::Arc;
use tracing::warn;

use super::broadcaster::RealtimeBroadcaster;
use super::message::{LiveAction, LiveRequest, Principal, TimerMessage};
use crate::challenge::ChallengeId;
use crate::error::{CoreError, Result};
use crate::timer::TimerCoordinator;

pub struct LiveEndpoint {
    coordinator: Arc<TimerCoordinator>,
    broadcaster: Arc<RealtimeBroadcaster>,
}

impl LiveEndpoint {
    pub fn new(coordinator: Arc<TimerCoordinator>, broadcaster: Arc<RealtimeBroadcaster>) -> Self {
        Self {
            coordinator,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &RealtimeBroadcaster {
        &self.broadcaster
    }

    /// Decode a raw payload and handle it.
    pub fn handle_raw(
        &self,
        challenge_id: ChallengeId,
        principal: Principal,
        payload: &str,
    ) -> Result<TimerMessage> {
        match LiveRequest::from_json(payload) {
            Ok(request) => self.handle(challenge_id, principal, request),
            Err(err) => {
                let err = CoreError::from(err);
                Ok(self.publish_error(challenge_id, principal, &err))
            }
        }
    }

    /// Run the action and publish its outcome.
    ///
    /// Returns the message that was published.
    pub fn handle(
        &self,
        challenge_id: ChallengeId,
        principal: Principal,
        request: LiveRequest,
    ) -> Result<TimerMessage> {
        let user_id = principal.user_id;
        let outcome = match request.action {
            LiveAction::Start => self
                .coordinator
                .start(challenge_id, user_id)
                .map(|started| TimerMessage::on(user_id, started.started_at)),
            LiveAction::Stop => self
                .coordinator
                .stop(challenge_id, user_id)
                .map(|stopped| TimerMessage::off(user_id, stopped.accumulated_secs)),
        };

        match outcome {
            Ok(message) => {
                // The coordinator has committed by now.
                self.broadcaster.publish(challenge_id, message.clone());
                Ok(message)
            }
            Err(err) if err.is_state_conflict() => {
                Ok(self.publish_error(challenge_id, principal, &err))
            }
            Err(err) => Err(err),
        }
    }

    fn publish_error(
        &self,
        challenge_id: ChallengeId,
        principal: Principal,
        err: &CoreError,
    ) -> TimerMessage {
        warn!(challenge_id, user_id = principal.user_id, error = %err, "live action rejected");
        let message = TimerMessage::error(principal.user_id, err.to_string());
        self.broadcaster.publish(challenge_id, message.clone());
        message
    }
}
