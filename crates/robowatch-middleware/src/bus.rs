//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Fleet`] | A reconciliation tick published a new snapshot |
//! | [`Topic::Alarms`] | Alarm admission, expiry and dismissal |
//! | [`Topic::Commands`] | Outcome of registry write commands |

use robowatch_types::{Event, WatchError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Snapshot refresh notifications from the fleet reconciler.
    Fleet,
    /// Alarm lifecycle notifications from the alarm engine.
    Alarms,
    /// Success / failure of registry write commands.
    Commands,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    fleet: broadcast::Sender<Event>,
    alarms: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (fleet, _) = broadcast::channel(capacity);
        let (alarms, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        Self {
            fleet,
            alarms,
            commands,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`WatchError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, WatchError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| WatchError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Fleet => &self.fleet,
            Topic::Alarms => &self.alarms,
            Topic::Commands => &self.commands,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv] for polling consumers.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robowatch_types::EventPayload;

    fn make_event(alarm_id: &str) -> Event {
        Event::new(
            "robowatch-middleware::test",
            EventPayload::AlarmExpired {
                alarm_id: alarm_id.to_string(),
            },
        )
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Alarms, make_event("a1"));
        assert!(matches!(result, Err(WatchError::Channel(_))));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::Alarms);
        let mut second = bus.subscribe_to(Topic::Alarms);

        let event = make_event("a1");
        assert_eq!(bus.publish_to(Topic::Alarms, event.clone())?, 2);

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        Ok(())
    }

    /// A subscriber on `Commands` must not receive events published to
    /// `Alarms` because they are routed through separate channels.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut commands = bus.subscribe_to(Topic::Commands);
        let _alarms = bus.subscribe_to(Topic::Alarms);

        bus.publish_to(Topic::Alarms, make_event("a1"))?;

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), commands.recv()).await;
        assert!(result.is_err(), "Commands subscriber must not receive an Alarms event");
        assert_eq!(commands.topic(), Topic::Commands);
        Ok(())
    }

    #[test]
    fn try_recv_reports_empty_channel() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Fleet);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        const CAPACITY: usize = 16;
        let bus = EventBus::new(CAPACITY);
        let mut slow = bus.subscribe_to(Topic::Fleet);

        for i in 0..1_000 {
            let _ = bus.publish_to(Topic::Fleet, make_event(&i.to_string()));
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
