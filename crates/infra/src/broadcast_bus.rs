//! In-process broadcast adapter for the change signal.
//!
//! A [`BroadcastChannel`] is the shared medium: a `tokio::sync::broadcast`
//! channel carrying the publisher's endpoint id and nothing else. Each
//! application instance holds one [`BroadcastChangeBus`] endpoint created
//! from the shared channel. Publishing sends the endpoint's own id; every
//! endpoint filters its own id out on receive, so a publisher never reacts
//! to its own signal.
//!
//! Delivery is best-effort. A lagged receiver skips the missed messages and
//! keeps going, since the signal carries no payload and the next refresh
//! catches the cache up anyway.

use async_trait::async_trait;
use shoebox_core::{ChangeBus, ChangeHandler};
use shoebox_domain::{FlagError, Result};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffered signals per receiver before lagging kicks in.
const CHANNEL_CAPACITY: usize = 16;

/// Shared broadcast medium connecting a set of [`BroadcastChangeBus`]
/// endpoints within one process.
#[derive(Clone)]
pub struct BroadcastChannel {
    sender: broadcast::Sender<Uuid>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create an endpoint for one application instance.
    pub fn endpoint(&self) -> BroadcastChangeBus {
        BroadcastChangeBus {
            id: Uuid::new_v4(),
            sender: self.sender.clone(),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance's endpoint on a [`BroadcastChannel`].
///
/// Dropping the endpoint (or calling [`close`](Self::close)) cancels all
/// listener tasks spawned by `subscribe`.
pub struct BroadcastChangeBus {
    id: Uuid,
    sender: broadcast::Sender<Uuid>,
    cancel: CancellationToken,
}

impl BroadcastChangeBus {
    /// Identifier used to filter out this endpoint's own publishes.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tear down all listener tasks for this endpoint.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ChangeBus for BroadcastChangeBus {
    async fn publish(&self) -> Result<()> {
        // A send error only means there are no receivers right now, which is
        // fine for a fire-and-forget signal.
        match self.sender.send(self.id) {
            Ok(receivers) => {
                debug!(endpoint = %self.id, receivers, "change signal published");
                Ok(())
            }
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    fn subscribe(&self, handler: ChangeHandler) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FlagError::Signaling("endpoint is closed".into()));
        }

        let mut receiver = self.sender.subscribe();
        let own_id = self.id;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(endpoint = %own_id, "change signal listener stopped");
                        break;
                    }
                    received = receiver.recv() => match received {
                        Ok(publisher) if publisher == own_id => {}
                        Ok(publisher) => {
                            debug!(endpoint = %own_id, %publisher, "change signal received");
                            handler().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Missed signals self-heal at the next refresh.
                            warn!(endpoint = %own_id, skipped, "change signal receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(endpoint = %own_id, "change signal channel closed");
                            break;
                        }
                    },
                }
            }
        });

        Ok(())
    }
}

impl Drop for BroadcastChangeBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
