use crate::{
    Result,
    chain::GameAccounts,
    codec::AccountCodec,
    connector::Connector,
    control_plane::{
        AccountModification,
        ControlPlane,
        ControlPlaneFactory,
        CreateSnapshotOptions,
        DeletedSnapshots,
        RestoreOptions,
        RestoredSnapshot,
        SnapshotFilter,
    },
    notify::Notifier,
    types::{
        GameState,
        Signature,
    },
};
use std::sync::{
    Arc,
    atomic::{
        AtomicU64,
        Ordering,
    },
};
use tracing::{
    debug,
    info,
};


/// Snapshot, restore and mutation of the game's accounts through the control
/// plane. Every snapshot this client creates or queries is scoped to one
/// isolation group.
pub struct SnapshotClient<F: ControlPlaneFactory, N, C> {
    connector: Connector<F, N>,
    codec: Arc<C>,
    accounts: GameAccounts,
    group: String,
    next_label: AtomicU64,
}

impl<F, N, C> SnapshotClient<F, N, C>
where
    F: ControlPlaneFactory,
    N: Notifier,
    C: AccountCodec,
{
    pub fn new(
        connector: Connector<F, N>,
        codec: Arc<C>,
        accounts: GameAccounts,
        group: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            codec,
            accounts,
            group: group.into(),
            next_label: AtomicU64::new(0),
        }
    }

    pub fn connector(&self) -> &Connector<F, N> {
        &self.connector
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Snapshot both players and the game account. The label number is
    /// consumed even when the request fails.
    pub async fn take_snapshot(&self) -> Result<String> {
        let connection = self.connector.get_connection().await?;
        let label = format!("Snapshot {}", self.next_label.fetch_add(1, Ordering::SeqCst));
        let options = CreateSnapshotOptions {
            description: Some(format!("Game: TicTacToe ({})", self.accounts.game)),
            group: Some(self.group.clone()),
        };
        let created = connection
            .client()
            .create_snapshot(&label, &self.accounts.members(), &options)
            .await?;
        info!(%label, snapshot_id = %created.snapshot_id, group = %self.group, "snapshot taken");
        Ok(created.snapshot_id)
    }

    /// Restore the most recently updated snapshot of the group and delete it.
    pub async fn restore_last_updated_snapshot(&self) -> Result<RestoredSnapshot> {
        let connection = self.connector.get_connection().await?;
        let options = RestoreOptions {
            delete_snapshot_after_restore: true,
            filter: SnapshotFilter::group(self.group.as_str()),
        };
        let restored = connection
            .client()
            .restore_last_updated_snapshot(&options)
            .await?;
        info!(snapshot_id = %restored.snapshot_id, group = %self.group, "snapshot restored");
        Ok(restored)
    }

    /// Overwrite the game account with `state`, bypassing the program.
    pub async fn modify_game_state(&self, state: &GameState) -> Result<()> {
        let connection = self.connector.get_connection().await?;
        let data = self.codec.encode(state)?;
        let modification = AccountModification::for_addr(self.accounts.game)
            .set_data(data, self.codec.account_size());
        connection.client().modify_account(&modification).await?;
        debug!(game = %self.accounts.game, "game account overwritten");
        Ok(())
    }

    pub async fn delete_app_snapshots(&self) -> Result<DeletedSnapshots> {
        let connection = self.connector.get_connection().await?;
        let deleted = connection
            .client()
            .delete_snapshots_matching(&SnapshotFilter::group(self.group.as_str()))
            .await?;
        info!(count = deleted.deleted.len(), group = %self.group, "snapshots deleted");
        Ok(deleted)
    }

    pub async fn label_transaction(&self, signature: &Signature, label: &str) -> Result<()> {
        let connection = self.connector.get_connection().await?;
        connection.client().label_transaction(signature, label).await?;
        Ok(())
    }
}
