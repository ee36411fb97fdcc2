use tokio::sync::broadcast;
use tracing::debug;

use super::events::LevelChange;

const DEFAULT_CAPACITY: usize = 256;

/// Event bus distributing level changes throughout the engine.
///
/// One broadcast channel is enough here: the engine serves a single guild and
/// every subscriber (the level feed, tests) filters on its own.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LevelChange>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emits an event to all current subscribers. Lagging or absent
    /// subscribers are not an error.
    pub fn emit(&self, event: LevelChange) {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(receivers, "level change emitted");
            }
            Err(_) => {
                debug!("level change emitted with no receivers");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LevelChange> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(user: u64) -> LevelChange {
        LevelChange {
            user,
            guild: 1,
            source: "message".to_string(),
            old_level: 1,
            new_level: 2,
            old_xp: 390,
            new_xp: 405,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(change(100));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.user, 100);
        assert!(received.is_level_up());
        assert_eq!(received.xp_gained(), 15);
    }

    #[tokio::test]
    async fn emitting_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(change(100));
    }
}
