//! services/api/src/adapters/location.rs
//!
//! A `LocationService` fed by the client. Fixes arriving over the live-walk socket are
//! pushed into an unbounded channel whose receiving half is the subscription stream.

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use pawtrack_core::domain::GeoPoint;
use pawtrack_core::ports::{LocationService, LocationSubscription, PortError, PortResult};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct ActiveFeed {
    subscription_id: Uuid,
    sender: UnboundedSender<GeoPoint>,
}

/// One instance per connection. At most one subscription is live at a time.
#[derive(Default)]
pub struct ChannelLocationAdapter {
    feed: Mutex<Option<ActiveFeed>>,
    closed: Mutex<bool>,
}

impl ChannelLocationAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards a fix to the live subscription. Returns `false` when nobody is subscribed.
    pub async fn push(&self, point: GeoPoint) -> bool {
        let feed = self.feed.lock().await;
        match feed.as_ref() {
            Some(active) => active.sender.unbounded_send(point).is_ok(),
            None => false,
        }
    }

    /// Refuses further subscriptions and ends the current one, if any.
    pub async fn close(&self) {
        *self.closed.lock().await = true;
        self.feed.lock().await.take();
    }
}

#[async_trait]
impl LocationService for ChannelLocationAdapter {
    async fn start(&self) -> PortResult<LocationSubscription> {
        if *self.closed.lock().await {
            return Err(PortError::Unavailable(
                "location feed is closed".to_string(),
            ));
        }
        let (sender, receiver) = mpsc::unbounded();
        let subscription_id = Uuid::new_v4();
        // Replacing an older feed drops its sender, which ends that stream.
        *self.feed.lock().await = Some(ActiveFeed {
            subscription_id,
            sender,
        });
        debug!(subscription_id = %subscription_id, "Location feed opened");
        Ok(LocationSubscription {
            id: subscription_id,
            points: Box::pin(receiver),
        })
    }

    async fn stop(&self, subscription_id: Uuid) -> PortResult<()> {
        let mut feed = self.feed.lock().await;
        if feed
            .as_ref()
            .is_some_and(|active| active.subscription_id == subscription_id)
        {
            feed.take();
            debug!(subscription_id = %subscription_id, "Location feed closed");
        }
        Ok(())
    }
}
