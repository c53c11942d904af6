use crate::{
    Result,
    chain::{
        ChainStateClient,
        GameAccounts,
        Submission,
    },
    codec::{
        AccountCodec,
        AnchorGameCodec,
    },
    config::SessionConfig,
    connector::{
        ConnectionHandle,
        Connector,
        NegotiationState,
    },
    control_plane::{
        ControlPlaneFactory,
        DeletedSnapshots,
        HttpControlPlaneFactory,
        RestoredSnapshot,
    },
    ledger::{
        GameProgram,
        JsonRpcLedger,
        LedgerRpc,
    },
    notify::Notifier,
    pubsub::{
        PubSub,
        WsPubSub,
    },
    snapshots::SnapshotClient,
    subscriptions::{
        SubscriptionHandle,
        SubscriptionManager,
    },
    types::{
        Address,
        GameState,
        Signature,
    },
};
use std::sync::Arc;
use tracing::info;

/// One game wired to its control plane, ledger and push transport.
pub struct GameSession<F: ControlPlaneFactory, N, L, P, S, C> {
    snapshots: SnapshotClient<F, N, C>,
    chain: ChainStateClient<L, P, C>,
    subscriptions: SubscriptionManager<S, C>,
}

/// A session against live services over HTTP and WebSocket.
pub type RemoteSession<N, P> =
    GameSession<HttpControlPlaneFactory, N, JsonRpcLedger, P, WsPubSub, AnchorGameCodec>;

impl<N, P> RemoteSession<N, P>
where
    N: Notifier,
    P: GameProgram,
{
    /// Build the live adapters from `config`. Only the push transport is
    /// connected eagerly; the control plane is negotiated on first use.
    pub async fn connect(config: &SessionConfig, notifier: N, program: P) -> Result<Self> {
        let accounts = config.game_accounts()?;
        let program_id = config.program_id()?;
        let codec = Arc::new(AnchorGameCodec::new());
        let connector = Connector::new(
            HttpControlPlaneFactory::new(config.request_timeout()),
            notifier,
            config.modern_endpoint(),
            config.legacy_endpoint(),
        );
        let ledger = JsonRpcLedger::new(config.ledger.rpc_url.as_str(), config.request_timeout())?;
        let pubsub = WsPubSub::connect(config.ledger.ws_url.as_str()).await?;
        info!(
            game = %accounts.game,
            rpc = %ledger,
            ws = %pubsub,
            group = %config.isolation_group,
            "session ready"
        );
        Ok(GameSession::new(
            SnapshotClient::new(
                connector,
                codec.clone(),
                accounts,
                config.isolation_group.as_str(),
            ),
            ChainStateClient::new(ledger, program, codec.clone(), accounts, config.chain_config()),
            SubscriptionManager::new(Arc::new(pubsub), codec, program_id, accounts.game),
        ))
    }
}

impl<F, N, L, P, S, C> GameSession<F, N, L, P, S, C>
where
    F: ControlPlaneFactory,
    N: Notifier,
    L: LedgerRpc,
    P: GameProgram,
    S: PubSub + Send + Sync + 'static,
    C: AccountCodec + Send + Sync + 'static,
{
    pub fn new(
        snapshots: SnapshotClient<F, N, C>,
        chain: ChainStateClient<L, P, C>,
        subscriptions: SubscriptionManager<S, C>,
    ) -> Self {
        Self {
            snapshots,
            chain,
            subscriptions,
        }
    }

    pub fn accounts(&self) -> &GameAccounts {
        self.chain.accounts()
    }

    pub fn snapshots(&self) -> &SnapshotClient<F, N, C> {
        &self.snapshots
    }

    pub fn chain(&self) -> &ChainStateClient<L, P, C> {
        &self.chain
    }

    pub fn subscriptions(&self) -> &SubscriptionManager<S, C> {
        &self.subscriptions
    }

    pub fn control_plane_state(&self) -> NegotiationState {
        self.snapshots.connector().state()
    }

    pub async fn get_connection(&self) -> Result<&ConnectionHandle<F::Client>> {
        self.snapshots.connector().get_connection().await
    }

    pub async fn take_snapshot(&self) -> Result<String> {
        self.snapshots.take_snapshot().await
    }

    pub async fn restore_last_updated_snapshot(&self) -> Result<RestoredSnapshot> {
        self.snapshots.restore_last_updated_snapshot().await
    }

    pub async fn modify_game_state(&self, state: &GameState) -> Result<()> {
        self.snapshots.modify_game_state(state).await
    }

    pub async fn delete_app_snapshots(&self) -> Result<DeletedSnapshots> {
        self.snapshots.delete_app_snapshots().await
    }

    pub async fn label_transaction(&self, signature: &Signature, label: &str) -> Result<()> {
        self.snapshots.label_transaction(signature, label).await
    }

    pub async fn fetch_game_state(&self) -> Result<GameState> {
        self.chain.fetch_game_state().await
    }

    pub async fn setup_game(&self) -> Result<Submission> {
        self.chain.setup_game().await
    }

    pub async fn play(&self, player: &Address, row: u8, column: u8) -> Result<Submission> {
        self.chain.play(player, row, column).await
    }

    pub async fn fund_account(&self, address: &Address) -> Result<Signature> {
        self.chain.fund_account(address).await
    }

    pub async fn get_account_funds(&self, address: &Address) -> Result<u64> {
        self.chain.get_account_funds(address).await
    }

    pub async fn subscribe_balance<Cb>(
        &self,
        address: &Address,
        on_change: Cb,
    ) -> Result<SubscriptionHandle>
    where
        Cb: FnMut(u64) + Send + 'static,
    {
        self.subscriptions.subscribe_balance(address, on_change).await
    }

    pub async fn subscribe_game_state<Cb>(&self, on_change: Cb) -> Result<SubscriptionHandle>
    where
        Cb: FnMut(GameState) + Send + 'static,
    {
        self.subscriptions.subscribe_game_state(on_change).await
    }
}
