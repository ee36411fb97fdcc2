use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, instrument, warn};

use crate::event::LevelChange;
use crate::platform::{ChannelId, ChatPort, MessageId, OutboundMessage, UserId};

use super::templates::{template_for, Direction, FeedSource};

pub const DEFAULT_COALESCE_WINDOW: std::time::Duration = std::time::Duration::from_secs(1);

/// Posts level transitions to the feed channel, coalescing bursts.
///
/// Coalescing is by overwrite: the first event for a `(user, source)` key
/// schedules a dispatch and later events only replace the stashed snapshot.
/// Nothing is ever cancelled.
pub struct LevelFeedRouter {
    port: Arc<dyn ChatPort>,
    channel: ChannelId,
    window: std::time::Duration,
    pending: Mutex<HashMap<(UserId, FeedSource), LevelChange>>,
    bet_chain: Mutex<HashMap<(UserId, Direction), MessageId>>,
    coalesced: AtomicU64,
    skipped_no_channel: AtomicU64,
}

impl LevelFeedRouter {
    pub fn new(port: Arc<dyn ChatPort>, channel: ChannelId, window: std::time::Duration) -> Self {
        Self {
            port,
            channel,
            window,
            pending: Mutex::new(HashMap::new()),
            bet_chain: Mutex::new(HashMap::new()),
            coalesced: AtomicU64::new(0),
            skipped_no_channel: AtomicU64::new(0),
        }
    }

    /// Consumes the bus until it closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<LevelChange>) {
        loop {
            match events.recv().await {
                Ok(event) => self.clone().accept(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "level feed lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Stashes one event and schedules its dispatch. Sources outside the
    /// feed set are dropped here.
    #[instrument(skip(self, event), fields(user = event.user, source = %event.source))]
    pub async fn accept(self: Arc<Self>, event: LevelChange) {
        let Ok(source) = event.source.parse::<FeedSource>() else {
            debug!("source not in the feed set");
            return;
        };

        let key = (event.user, source);
        {
            let mut pending = self.pending.lock().await;
            if pending.insert(key, event).is_some() {
                // a dispatch for this key is already on its way
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let router = self;
        tokio::spawn(async move {
            tokio::time::sleep(router.window).await;
            router.dispatch(key).await;
        });
    }

    async fn dispatch(&self, key: (UserId, FeedSource)) {
        let Some(event) = self.pending.lock().await.remove(&key) else {
            return;
        };

        let direction = Direction::of(&event);
        let Some(template) = template_for(key.1, direction) else {
            warn!(source = %key.1, ?direction, "no template for this transition, dropped");
            return;
        };

        let message = OutboundMessage::embed(template.render(&event));
        match key.1 {
            FeedSource::PariXp => self.send_bet_chain(event.user, direction, message).await,
            _ => {
                self.send(message).await;
            }
        }
    }

    /// Betting transitions chain: repeats in the same direction edit the
    /// last message instead of flooding the feed.
    async fn send_bet_chain(&self, user: UserId, direction: Direction, message: OutboundMessage) {
        let key = (user, direction);
        let previous = self.bet_chain.lock().await.get(&key).copied();

        if let Some(previous) = previous {
            match self
                .port
                .edit_message(self.channel, previous, message.clone())
                .await
            {
                Ok(()) => return,
                Err(error) => {
                    debug!(%error, "could not edit the last bet message, sending fresh")
                }
            }
        }

        if let Some(id) = self.send(message).await {
            self.bet_chain.lock().await.insert(key, id);
        }
    }

    async fn send(&self, message: OutboundMessage) -> Option<MessageId> {
        match self.port.send_message(self.channel, message).await {
            Ok(id) => Some(id),
            Err(error) => {
                self.skipped_no_channel.fetch_add(1, Ordering::Relaxed);
                debug!(%error, "feed channel unavailable, update skipped");
                None
            }
        }
    }

    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn skipped_no_channel_count(&self) -> u64 {
        self.skipped_no_channel.load(Ordering::Relaxed)
    }
}
