//! Timer notification broadcasting.
//!
//! Every timer transition the core applies is published as a
//! [`TimerNotification`] on a tokio broadcast channel. WebSocket clients
//! (the banner and notification layer) subscribe through `GET /ws`.
//!
//! # Example
//!
//! ```rust
//! use kanbantime_server::broadcast::{TimerBroadcaster, TimerNotification};
//!
//! let broadcaster = TimerBroadcaster::new();
//! let mut rx = broadcaster.subscribe();
//!
//! let receivers = broadcaster.broadcast(TimerNotification::TimersCleared { count: 2 });
//! assert_eq!(receivers, 1);
//! assert_eq!(rx.try_recv().unwrap(), TimerNotification::TimersCleared { count: 2 });
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::types::{Service, TimeLog, Timer};

/// Default channel capacity.
///
/// Notifications are rare (one per transition), so a small buffer is
/// enough; slow receivers get `RecvError::Lagged`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Timer transition published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimerNotification {
    #[serde(rename_all = "camelCase")]
    TimerStarted {
        task_id: String,
        timer_key: String,
        task_title: String,
        service: Service,
        tab_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    TimerStopped {
        task_id: String,
        timer_key: String,
        task_title: String,
        service: Service,
        /// Milliseconds.
        duration: u64,
    },
    #[serde(rename_all = "camelCase")]
    TimersCleared { count: usize },
}

impl TimerNotification {
    #[must_use]
    pub fn started(timer: &Timer) -> Self {
        Self::TimerStarted {
            task_id: timer.task_id.clone(),
            timer_key: timer.key.clone(),
            task_title: timer.task_title.clone(),
            service: timer.service,
            tab_id: timer.tab_id,
        }
    }

    #[must_use]
    pub fn stopped(key: &str, log: &TimeLog) -> Self {
        Self::TimerStopped {
            task_id: log.task_id.clone(),
            timer_key: key.to_string(),
            task_title: log.task_title.clone(),
            service: log.service,
            duration: log.duration,
        }
    }
}

/// Distributes timer notifications to all subscribers.
#[derive(Debug, Clone)]
pub struct TimerBroadcaster {
    sender: Sender<TimerNotification>,
}

impl TimerBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created timer broadcaster");
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> Receiver<TimerNotification> {
        let rx = self.sender.subscribe();
        debug!(subscriber_count = self.subscriber_count(), "New subscriber added");
        rx
    }

    /// Publishes a notification. Returns the number of receivers, 0 when
    /// nobody is listening.
    pub fn broadcast(&self, notification: TimerNotification) -> usize {
        match self.sender.send(notification) {
            Ok(receivers) => {
                trace!(receivers, "Notification broadcast");
                receivers
            }
            Err(_) => {
                trace!("No subscribers for notification");
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TimerBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broadcast_without_subscribers_returns_zero() {
        let broadcaster = TimerBroadcaster::new();
        assert_eq!(broadcaster.broadcast(TimerNotification::TimersCleared { count: 0 }), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives() {
        let broadcaster = TimerBroadcaster::with_capacity(4);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.broadcast(TimerNotification::TimersCleared { count: 3 });
        assert_eq!(a.recv().await.unwrap(), TimerNotification::TimersCleared { count: 3 });
        assert_eq!(b.recv().await.unwrap(), TimerNotification::TimersCleared { count: 3 });
    }

    #[test]
    fn dropped_subscribers_are_not_counted() {
        let broadcaster = TimerBroadcaster::new();
        let rx = broadcaster.subscribe();
        drop(rx);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn notification_wire_shape() {
        let value = serde_json::to_value(TimerNotification::TimerStopped {
            task_id: "acme_TEST-4".to_string(),
            timer_key: "acme_TEST-4".to_string(),
            task_title: "Fix login".to_string(),
            service: Service::Backlog,
            duration: 1000,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "timerStopped",
                "taskId": "acme_TEST-4",
                "timerKey": "acme_TEST-4",
                "taskTitle": "Fix login",
                "service": "backlog",
                "duration": 1000
            })
        );
    }
}
