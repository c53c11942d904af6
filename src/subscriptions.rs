use crate::{
    Result,
    codec::AccountCodec,
    error::LedgerError,
    pubsub::{
        PubSub,
        SubscriptionId,
        SubscriptionKind,
    },
    types::{
        Address,
        GameState,
    },
};
use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    warn,
};

#[cfg(test)]
mod tests;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Released,
}

type Release = Box<dyn FnOnce() -> Result<(), LedgerError> + Send>;

/// One live push registration. Cancelling releases the remote id exactly once;
/// dropping the handle cancels it.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    kind: SubscriptionKind,
    released: Arc<AtomicBool>,
    release: Mutex<Option<Release>>,
    forwarder: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn state(&self) -> SubscriptionState {
        if self.released.load(Ordering::Acquire) {
            SubscriptionState::Released
        } else {
            SubscriptionState::Active
        }
    }

    /// Stop delivery and release the remote subscription. Safe to call any
    /// number of times.
    pub fn cancel(&self) {
        let release = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(release) = release else {
            return;
        };
        self.released.store(true, Ordering::Release);
        self.forwarder.abort();
        match release() {
            Ok(()) => debug!(id = %self.id, kind = ?self.kind, "subscription released"),
            Err(err) => warn!(id = %self.id, kind = ?self.kind, %err, "failed to release subscription"),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

pub struct SubscriptionManager<P, C> {
    pubsub: Arc<P>,
    codec: Arc<C>,
    program_id: Address,
    game: Address,
}

impl<P, C> SubscriptionManager<P, C>
where
    P: PubSub + Send + Sync + 'static,
    C: AccountCodec + Send + Sync + 'static,
{
    pub fn new(pubsub: Arc<P>, codec: Arc<C>, program_id: Address, game: Address) -> Self {
        Self {
            pubsub,
            codec,
            program_id,
            game,
        }
    }

    /// Invoke `on_change` with the new lamport balance on every push for
    /// `address`. Identical consecutive values are all forwarded.
    pub async fn subscribe_balance<F>(
        &self,
        address: &Address,
        mut on_change: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let subscription = self.pubsub.account_subscribe(address).await?;
        Ok(self.spawn(
            subscription.id,
            SubscriptionKind::Account,
            subscription.notifications,
            move |notification| on_change(notification.lamports),
        ))
    }

    /// Invoke `on_change` with the decoded game state whenever the game
    /// account changes. The transport only offers program-wide notifications,
    /// so other accounts of the program are filtered out here.
    pub async fn subscribe_game_state<F>(&self, mut on_change: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(GameState) + Send + 'static,
    {
        let subscription = self.pubsub.program_subscribe(&self.program_id).await?;
        let game = self.game;
        let codec = self.codec.clone();
        Ok(self.spawn(
            subscription.id,
            SubscriptionKind::Program,
            subscription.notifications,
            move |notification| {
                if notification.address != game {
                    return;
                }
                let Some(data) = notification.data.filter(|data| !data.is_empty()) else {
                    return;
                };
                match codec.decode(&data) {
                    Ok(state) => on_change(state),
                    Err(err) => warn!(%game, %err, "skipping undecodable game account update"),
                }
            },
        ))
    }

    fn spawn<T, H>(
        &self,
        id: SubscriptionId,
        kind: SubscriptionKind,
        mut notifications: mpsc::UnboundedReceiver<T>,
        mut handle: H,
    ) -> SubscriptionHandle
    where
        T: Send + 'static,
        H: FnMut(T) + Send + 'static,
    {
        let released = Arc::new(AtomicBool::new(false));
        let forwarder = tokio::spawn({
            let released = released.clone();
            async move {
                while let Some(notification) = notifications.recv().await {
                    if released.load(Ordering::Acquire) {
                        break;
                    }
                    handle(notification);
                }
            }
        });
        let pubsub = self.pubsub.clone();
        let release: Release = Box::new(move || pubsub.unsubscribe(id, kind));
        SubscriptionHandle {
            id,
            kind,
            released,
            release: Mutex::new(Some(release)),
            forwarder,
        }
    }
}
