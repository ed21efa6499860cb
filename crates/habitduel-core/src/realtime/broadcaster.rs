//! Per-challenge fan-out of timer state.
//!
//! Delivery is best-effort and at-most-once: a message published while no
//! one is subscribed is dropped, and a receiver that falls more than the
//! channel capacity behind loses the oldest messages. There is no replay.
//!
//! A channel is dropped by the first publish that finds no receivers left,
//! so abandoned challenges do not accumulate senders.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::message::TimerMessage;
use crate::challenge::ChallengeId;

pub struct RealtimeBroadcaster {
    channels: DashMap<ChallengeId, broadcast::Sender<TimerMessage>>,
    capacity: usize,
}

impl RealtimeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a challenge's channel, creating it on first use.
    pub fn subscribe(&self, challenge_id: ChallengeId) -> broadcast::Receiver<TimerMessage> {
        self.channels
            .entry(challenge_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a challenge's channel. Never fails.
    ///
    /// Returns the number of receivers the message was handed to.
    pub fn publish(&self, challenge_id: ChallengeId, message: TimerMessage) -> usize {
        trace!(challenge_id, message = ?message, "publishing timer message");
        let delivered = match self.channels.get(&challenge_id) {
            // Err only means every receiver is gone.
            Some(sender) => sender.send(message).unwrap_or(0),
            None => {
                debug!(challenge_id, "no channel; message dropped");
                return 0;
            }
        };

        if delivered == 0 {
            // Under the shard lock, so a concurrent subscribe either lands
            // first and keeps the channel or creates a fresh one after.
            let removed = self
                .channels
                .remove_if(&challenge_id, |_, sender| sender.receiver_count() == 0)
                .is_some();
            debug!(challenge_id, removed, "no subscribers left; message dropped");
        } else {
            debug!(challenge_id, delivered, "timer message published");
        }
        delivered
    }

    pub fn subscriber_count(&self, challenge_id: ChallengeId) -> usize {
        self.channels
            .get(&challenge_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Challenges that currently hold a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for RealtimeBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::message::SignalStatus;

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let hub = RealtimeBroadcaster::new(8);
        let mut rx = hub.subscribe(1);

        assert_eq!(hub.publish(1, TimerMessage::off(10, 5)), 1);
        assert_eq!(hub.publish(1, TimerMessage::off(10, 9)), 1);

        assert_eq!(rx.recv().await.unwrap().accumulated_time, Some(5));
        assert_eq!(rx.recv().await.unwrap().accumulated_time, Some(9));
    }

    #[tokio::test]
    async fn channels_are_isolated_per_challenge() {
        let hub = RealtimeBroadcaster::new(8);
        let mut one = hub.subscribe(1);
        let mut two = hub.subscribe(2);

        hub.publish(2, TimerMessage::error(3, "nope"));

        assert!(one.try_recv().is_err());
        let msg = two.recv().await.unwrap();
        assert_eq!(msg.status, SignalStatus::Error);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let hub = RealtimeBroadcaster::new(8);
        assert_eq!(hub.publish(1, TimerMessage::off(1, 1)), 0);
        assert_eq!(hub.subscriber_count(1), 0);
    }

    #[test]
    fn publish_drops_abandoned_channel() {
        let hub = RealtimeBroadcaster::new(8);
        let keep = hub.subscribe(1);
        drop(hub.subscribe(2));
        assert_eq!(hub.channel_count(), 2);

        assert_eq!(hub.publish(2, TimerMessage::off(1, 1)), 0);
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.publish(1, TimerMessage::off(1, 1)), 1);
        assert_eq!(hub.channel_count(), 1);

        // A later subscriber gets a fresh channel.
        let mut again = hub.subscribe(2);
        assert_eq!(hub.publish(2, TimerMessage::off(1, 7)), 1);
        assert_eq!(again.try_recv().unwrap().accumulated_time, Some(7));
        drop(keep);
    }
}
