//! Change-event fabric: typed pub/sub between publishers (CAS ingest, the
//! executor) and watch subscribers.
//!
//! Two decisions matter here. Publishing never blocks: a publisher with no
//! live subscriber must not stall a blob upload, so delivery rides a
//! broadcast channel. And each topic keeps a bounded ring of recent events
//! that is replayed to new subscribers, closing the window where an event
//! published just before `subscribe` would otherwise be unobservable.
//! Events are idempotent (content-addressed elements reaching `Exists`), so
//! a subscriber seeing one twice across the replay/live seam is harmless.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use sawproto::Change;

/// Replay ring capacity per topic.
const REPLAY_CAPACITY: usize = 256;

/// Live channel capacity; a lagging subscriber skips ahead rather than
/// applying backpressure to publishers.
const CHANNEL_CAPACITY: usize = 1024;

/// The two event channels of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Action-cache side changes.
    Action,
    /// Content-store side changes, including execution completions.
    Cas,
}

struct TopicState {
    tx: broadcast::Sender<Change>,
    recent: RwLock<VecDeque<Change>>,
}

impl TopicState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
        }
    }
}

/// Shared pub/sub hub. Cheap to clone; all clones publish into the same
/// topics.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

struct Inner {
    action: TopicState,
    cas: TopicState,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                action: TopicState::new(),
                cas: TopicState::new(),
            }),
        }
    }

    fn topic(&self, topic: Topic) -> &TopicState {
        match topic {
            Topic::Action => &self.inner.action,
            Topic::Cas => &self.inner.cas,
        }
    }

    /// Publish a change. Never blocks; subscribers that cannot keep up lag
    /// and resume at the live edge.
    pub fn publish(&self, topic: Topic, change: Change) {
        let state = self.topic(topic);
        {
            let mut recent = state.recent.write().expect("replay ring lock poisoned");
            if recent.len() >= REPLAY_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(change.clone());
        }
        let delivered = state.tx.send(change).unwrap_or(0);
        debug!(?topic, subscribers = delivered, "published change event");
    }

    /// Subscribe to a topic: recent events first, then the live stream.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let state = self.topic(topic);
        // Attach to the live stream before snapshotting the ring, so no
        // event can fall between the two.
        let rx = state.tx.subscribe();
        let replay = state
            .recent
            .read()
            .expect("replay ring lock poisoned")
            .clone();
        Subscription { replay, rx }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of a topic.
#[derive(Debug)]
pub struct Subscription {
    replay: VecDeque<Change>,
    rx: broadcast::Receiver<Change>,
}

impl Subscription {
    /// Pop the next replayed change without touching the live stream.
    pub fn try_replay(&mut self) -> Option<Change> {
        self.replay.pop_front()
    }

    /// Next live change. Cancel-safe, so it can sit inside a `select!`
    /// without losing events; lagging skips to the live edge.
    pub async fn recv_live(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "watch subscriber lagged, resuming at live edge");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next change, replayed or live. `None` once the broker is gone and
    /// the live channel has drained.
    pub async fn recv(&mut self) -> Option<Change> {
        if let Some(change) = self.try_replay() {
            return Some(change);
        }
        self.recv_live().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sawproto::{Change, Packed};

    fn change(element: &str) -> Change {
        Change::exists(element, Packed::default())
    }

    #[tokio::test]
    async fn live_delivery() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(Topic::Cas);

        broker.publish(Topic::Cas, change("abc"));
        let got = sub.recv().await.unwrap();
        assert_eq!(got.element, "abc");
    }

    #[tokio::test]
    async fn late_subscriber_sees_recent_events() {
        let broker = Broker::new();
        broker.publish(Topic::Cas, change("published-first"));

        let mut sub = broker.subscribe(Topic::Cas);
        let got = sub.recv().await.unwrap();
        assert_eq!(got.element, "published-first");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = Broker::new();
        broker.publish(Topic::Action, change("action-side"));
        broker.publish(Topic::Cas, change("cas-side"));

        let mut cas_sub = broker.subscribe(Topic::Cas);
        let got = cas_sub.recv().await.unwrap();
        assert_eq!(got.element, "cas-side");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let broker = Broker::new();
        for i in 0..2 * REPLAY_CAPACITY {
            broker.publish(Topic::Cas, change(&format!("event-{i}")));
        }
        // Ring holds only the newest REPLAY_CAPACITY events.
        let mut sub = broker.subscribe(Topic::Cas);
        let first = sub.recv().await.unwrap();
        assert_eq!(first.element, format!("event-{REPLAY_CAPACITY}"));
    }

    #[tokio::test]
    async fn replay_then_live_ordering() {
        let broker = Broker::new();
        broker.publish(Topic::Cas, change("old"));
        let mut sub = broker.subscribe(Topic::Cas);
        broker.publish(Topic::Cas, change("new"));

        assert_eq!(sub.recv().await.unwrap().element, "old");
        assert_eq!(sub.recv().await.unwrap().element, "new");
    }
}
