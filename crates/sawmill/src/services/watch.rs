//! Watch service: long-lived subscriptions to per-element state changes.

use tracing::info;

use sawproto::{ChangeBatch, Status, WatchRequest};

use crate::broker::{Broker, Subscription, Topic};

pub struct WatchService {
    broker: Broker,
}

impl WatchService {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Open a subscription for one target element across both channels.
    pub fn watch(&self, request: WatchRequest) -> Result<WatchStream, Status> {
        if request.target.is_empty() {
            return Err(Status::invalid_argument("empty watch target"));
        }
        info!(target = %request.target, "starting watch");
        Ok(WatchStream {
            target: request.target,
            action: self.broker.subscribe(Topic::Action),
            cas: self.broker.subscribe(Topic::Cas),
        })
    }
}

/// A single subscriber's event stream. Only `Exists` changes for the
/// watched element are delivered; everything else is dropped.
#[derive(Debug)]
pub struct WatchStream {
    target: String,
    action: Subscription,
    cas: Subscription,
}

impl WatchStream {
    /// Block for the next matching change, framed as a one-change batch.
    /// `None` when the broker has shut down.
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        loop {
            // Drain replayed events before selecting on the live streams;
            // `select!` may drop the computation of the losing branch, so
            // only cancel-safe receives belong inside it.
            let change = if let Some(change) = self.action.try_replay() {
                change
            } else if let Some(change) = self.cas.try_replay() {
                change
            } else {
                tokio::select! {
                    change = self.action.recv_live() => change?,
                    change = self.cas.recv_live() => change?,
                }
            };

            if change.element == self.target && change.is_exists() {
                return Some(ChangeBatch {
                    changes: vec![change],
                });
            }
        }
    }
}
