//! In-memory stand-ins for the remote collaborators.
//!
//! The ledger, control plane, program and push transport here share one account
//! table, so a mutation made through the control plane is what the ledger returns
//! on the next fetch.

use crate::{
    codec::AccountCodec,
    connector::LEDGER_REJECTION_MARKER,
    control_plane::{
        AccountModification,
        Cluster,
        ControlPlane,
        ControlPlaneFactory,
        CreateSnapshotOptions,
        CreatedSnapshot,
        DeletedSnapshots,
        Endpoint,
        RestoreOptions,
        RestoredSnapshot,
        SnapshotFilter,
    },
    error::{
        ControlPlaneError,
        LedgerError,
    },
    ledger::{
        Account,
        ConfirmationStatus,
        GameProgram,
        LedgerRpc,
        SignatureStatus,
    },
    pubsub::{
        AccountNotification,
        ProgramNotification,
        PubSub,
        Subscription,
        SubscriptionId,
        SubscriptionKind,
    },
    types::{
        Address,
        Board,
        GameState,
        GameStatus,
        Sign,
        Signature,
        Tile,
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn arb_address(seed: u8) -> Address {
    Address::new([seed; 32])
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, Account>,
    statuses: HashMap<Signature, SignatureStatus>,
    next_signature: u64,
    hold_confirmations: bool,
}

impl LedgerState {
    fn record_signature(&mut self, err: Option<String>) -> Signature {
        self.next_signature += 1;
        let signature = Signature::new(format!("sig-{}", self.next_signature));
        let confirmation = if self.hold_confirmations {
            ConfirmationStatus::Processed
        } else {
            ConfirmationStatus::Finalized
        };
        self.statuses.insert(
            signature.clone(),
            SignatureStatus {
                confirmation: Some(confirmation),
                err,
            },
        );
        signature
    }
}

/// Ledger whose accounts live in a shared in-process table.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, address: Address, account: Account) {
        lock(&self.state).accounts.insert(address, account);
    }

    pub fn account(&self, address: &Address) -> Option<Account> {
        lock(&self.state).accounts.get(address).cloned()
    }

    pub fn remove_account(&self, address: &Address) {
        lock(&self.state).accounts.remove(address);
    }

    /// Keep new signatures at `Processed` so finalization never arrives.
    pub fn hold_confirmations(&self, hold: bool) {
        lock(&self.state).hold_confirmations = hold;
    }

    fn credit(&self, address: &Address, lamports: u64) -> Signature {
        let mut state = lock(&self.state);
        state
            .accounts
            .entry(*address)
            .or_insert_with(|| Account {
                lamports: 0,
                data: Vec::new(),
                owner: Address::SYSTEM_PROGRAM,
            })
            .lamports += lamports;
        state.record_signature(None)
    }

    fn record_signature(&self, err: Option<String>) -> Signature {
        lock(&self.state).record_signature(err)
    }
}

impl LedgerRpc for InMemoryLedger {
    async fn get_account(&self, address: &Address) -> Result<Option<Account>, LedgerError> {
        Ok(self.account(address))
    }

    async fn get_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        Ok(self.account(address).map(|a| a.lamports).unwrap_or(0))
    }

    async fn request_airdrop(
        &self,
        address: &Address,
        lamports: u64,
    ) -> Result<Signature, LedgerError> {
        Ok(self.credit(address, lamports))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        Ok(lock(&self.state).statuses.get(signature).cloned())
    }
}

/// Tic-tac-toe program executing against an [`InMemoryLedger`].
#[derive(Clone)]
pub struct InMemoryProgram<C> {
    ledger: InMemoryLedger,
    codec: Arc<C>,
    program_id: Address,
}

impl<C: AccountCodec> InMemoryProgram<C> {
    pub fn new(ledger: InMemoryLedger, codec: Arc<C>, program_id: Address) -> Self {
        Self {
            ledger,
            codec,
            program_id,
        }
    }

    fn write_state(&self, game: &Address, state: &GameState) -> Result<(), LedgerError> {
        let mut data = self
            .codec
            .encode(state)
            .map_err(|e| LedgerError::InstructionRejected(e.to_string()))?;
        data.resize(self.codec.account_size(), 0);
        let lamports = self.ledger.account(game).map(|a| a.lamports).unwrap_or(0);
        self.ledger.set_account(
            *game,
            Account {
                lamports,
                data,
                owner: self.program_id,
            },
        );
        Ok(())
    }

    fn read_state(&self, game: &Address) -> Result<GameState, LedgerError> {
        let account = self
            .ledger
            .account(game)
            .ok_or(LedgerError::AccountNotFound(*game))?;
        self.codec
            .decode(&account.data)
            .map_err(|e| LedgerError::InstructionRejected(e.to_string()))
    }
}

impl<C: AccountCodec> GameProgram for InMemoryProgram<C> {
    async fn setup_game(
        &self,
        game: &Address,
        player_one: &Address,
        player_two: &Address,
    ) -> Result<Signature, LedgerError> {
        if self.ledger.account(game).is_some_and(|a| !a.data.is_empty()) {
            return Err(LedgerError::InstructionRejected(
                "game account already in use".to_string(),
            ));
        }
        let state = GameState {
            players: [*player_one, *player_two],
            turn: 1,
            board: Board::default(),
            status: GameStatus::Active,
        };
        self.write_state(game, &state)?;
        Ok(self.ledger.record_signature(None))
    }

    async fn play(
        &self,
        game: &Address,
        player: &Address,
        tile: Tile,
    ) -> Result<Signature, LedgerError> {
        let mut state = self.read_state(game)?;
        if state.is_over() {
            return Err(LedgerError::InstructionRejected("GameAlreadyOver".to_string()));
        }
        if state.current_player() != *player {
            return Err(LedgerError::InstructionRejected("NotPlayersTurn".to_string()));
        }
        let (row, column) = (usize::from(tile.row), usize::from(tile.column));
        let cell = state
            .board
            .get_mut(row)
            .and_then(|r| r.get_mut(column))
            .ok_or_else(|| LedgerError::InstructionRejected("TileOutOfBounds".to_string()))?;
        if cell.is_some() {
            return Err(LedgerError::InstructionRejected("TileAlreadySet".to_string()));
        }
        let sign = if state.turn % 2 == 1 { Sign::X } else { Sign::O };
        *cell = Some(sign);
        state.status = if has_line(&state.board, sign) {
            GameStatus::Won { winner: *player }
        } else if state.board.iter().flatten().all(Option::is_some) {
            GameStatus::Tie
        } else {
            GameStatus::Active
        };
        if !state.is_over() {
            state.turn += 1;
        }
        self.write_state(game, &state)?;
        Ok(self.ledger.record_signature(None))
    }
}

fn has_line(board: &Board, sign: Sign) -> bool {
    let at = |r: usize, c: usize| board[r][c] == Some(sign);
    (0..3).any(|i| (0..3).all(|j| at(i, j)) || (0..3).all(|j| at(j, i)))
        || (0..3).all(|i| at(i, i))
        || (0..3).all(|i| at(i, 2 - i))
}

struct StoredSnapshot {
    id: String,
    label: String,
    group: Option<String>,
    accounts: Vec<(Address, Option<Account>)>,
    updated: u64,
}

#[derive(Default)]
struct ControlPlaneState {
    snapshots: Vec<StoredSnapshot>,
    next_snapshot: u64,
    created_labels: Vec<String>,
    create_requests: Vec<(String, Vec<Address>, CreateSnapshotOptions)>,
    restore_requests: Vec<RestoreOptions>,
    delete_requests: Vec<SnapshotFilter>,
    modifications: Vec<AccountModification>,
    transaction_labels: Vec<(Signature, String)>,
    reject_snapshots: Option<ControlPlaneError>,
}

/// Control plane operating on an [`InMemoryLedger`]'s account table.
#[derive(Clone)]
pub struct InMemoryControlPlane {
    ledger: InMemoryLedger,
    state: Arc<Mutex<ControlPlaneState>>,
}

impl InMemoryControlPlane {
    pub fn new(ledger: InMemoryLedger) -> Self {
        Self {
            ledger,
            state: Arc::new(Mutex::new(ControlPlaneState::default())),
        }
    }

    /// Fail every snapshot creation with `err` until cleared.
    pub fn reject_snapshots(&self, err: Option<ControlPlaneError>) {
        lock(&self.state).reject_snapshots = err;
    }

    pub fn create_requests(&self) -> Vec<(String, Vec<Address>, CreateSnapshotOptions)> {
        lock(&self.state).create_requests.clone()
    }

    pub fn restore_requests(&self) -> Vec<RestoreOptions> {
        lock(&self.state).restore_requests.clone()
    }

    pub fn delete_requests(&self) -> Vec<SnapshotFilter> {
        lock(&self.state).delete_requests.clone()
    }

    pub fn modifications(&self) -> Vec<AccountModification> {
        lock(&self.state).modifications.clone()
    }

    pub fn transaction_labels(&self) -> Vec<(Signature, String)> {
        lock(&self.state).transaction_labels.clone()
    }

    /// Labels of the snapshots currently stored, oldest first.
    pub fn stored_labels(&self) -> Vec<String> {
        lock(&self.state)
            .snapshots
            .iter()
            .map(|s| s.label.clone())
            .collect()
    }

    pub fn created_labels(&self) -> Vec<String> {
        lock(&self.state).created_labels.clone()
    }
}

fn group_matches(filter: &SnapshotFilter, group: &Option<String>) -> bool {
    match &filter.group {
        Some(wanted) => group.as_ref() == Some(wanted),
        None => true,
    }
}

impl ControlPlane for InMemoryControlPlane {
    async fn ping(&self) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn request_airdrop(
        &self,
        _cluster: Cluster,
        address: &Address,
        lamports: u64,
    ) -> Result<Signature, ControlPlaneError> {
        if *address == Address::SYSTEM_PROGRAM {
            return Err(ControlPlaneError::Rejected {
                status: 500,
                message: format!(
                    "{LEDGER_REJECTION_MARKER}(InvalidAccountForFee)"
                ),
            });
        }
        Ok(self.ledger.credit(address, lamports))
    }

    async fn create_snapshot(
        &self,
        label: &str,
        addresses: &[Address],
        options: &CreateSnapshotOptions,
    ) -> Result<CreatedSnapshot, ControlPlaneError> {
        let mut state = lock(&self.state);
        state.create_requests.push((
            label.to_string(),
            addresses.to_vec(),
            options.clone(),
        ));
        if let Some(err) = state.reject_snapshots.clone() {
            return Err(err);
        }
        state.next_snapshot += 1;
        let id = format!("snapshot-{}", state.next_snapshot);
        let updated = state.next_snapshot;
        let accounts = addresses
            .iter()
            .map(|address| (*address, self.ledger.account(address)))
            .collect();
        state.created_labels.push(label.to_string());
        state.snapshots.push(StoredSnapshot {
            id: id.clone(),
            label: label.to_string(),
            group: options.group.clone(),
            accounts,
            updated,
        });
        Ok(CreatedSnapshot { snapshot_id: id })
    }

    async fn restore_last_updated_snapshot(
        &self,
        options: &RestoreOptions,
    ) -> Result<RestoredSnapshot, ControlPlaneError> {
        let mut state = lock(&self.state);
        state.restore_requests.push(options.clone());
        let position = state
            .snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| group_matches(&options.filter, &s.group))
            .max_by_key(|(_, s)| s.updated)
            .map(|(i, _)| i)
            .ok_or_else(|| ControlPlaneError::Rejected {
                status: 404,
                message: "no snapshot matches filter".to_string(),
            })?;
        let snapshot = &state.snapshots[position];
        for (address, account) in &snapshot.accounts {
            match account {
                Some(account) => self.ledger.set_account(*address, account.clone()),
                None => self.ledger.remove_account(address),
            }
        }
        let restored = RestoredSnapshot {
            snapshot_id: snapshot.id.clone(),
            restored_accounts: snapshot.accounts.iter().map(|(a, _)| *a).collect(),
        };
        if options.delete_snapshot_after_restore {
            state.snapshots.remove(position);
        }
        Ok(restored)
    }

    async fn delete_snapshots_matching(
        &self,
        filter: &SnapshotFilter,
    ) -> Result<DeletedSnapshots, ControlPlaneError> {
        let mut state = lock(&self.state);
        state.delete_requests.push(filter.clone());
        let mut deleted = Vec::new();
        state.snapshots.retain(|s| {
            let matches = group_matches(filter, &s.group);
            if matches {
                deleted.push(s.id.clone());
            }
            !matches
        });
        Ok(DeletedSnapshots { deleted })
    }

    async fn modify_account(
        &self,
        modification: &AccountModification,
    ) -> Result<(), ControlPlaneError> {
        lock(&self.state).modifications.push(modification.clone());
        let existing = self.ledger.account(&modification.address);
        if let Some(account) = &existing
            && !account.data.is_empty()
            && account.data.len() != modification.size
        {
            return Err(ControlPlaneError::Rejected {
                status: 400,
                message: format!(
                    "size {} does not match account data length {}",
                    modification.size,
                    account.data.len()
                ),
            });
        }
        if modification.data.len() > modification.size {
            return Err(ControlPlaneError::Rejected {
                status: 400,
                message: "data exceeds declared size".to_string(),
            });
        }
        let mut data = modification.data.clone();
        data.resize(modification.size, 0);
        let (lamports, owner) = existing
            .map(|a| (a.lamports, a.owner))
            .unwrap_or((0, Address::SYSTEM_PROGRAM));
        self.ledger.set_account(
            modification.address,
            Account {
                lamports,
                data,
                owner,
            },
        );
        Ok(())
    }

    async fn label_transaction(
        &self,
        signature: &Signature,
        label: &str,
    ) -> Result<(), ControlPlaneError> {
        lock(&self.state)
            .transaction_labels
            .push((signature.clone(), label.to_string()));
        Ok(())
    }
}

/// How a probe call should behave on a given endpoint.
#[derive(Clone, Debug)]
pub enum ProbeBehavior {
    Succeed,
    Fail(ControlPlaneError),
}

impl ProbeBehavior {
    fn refused() -> Self {
        ProbeBehavior::Fail(ControlPlaneError::Transport(
            "connection refused".to_string(),
        ))
    }
}

#[derive(Default)]
struct ProbeState {
    pings: HashMap<Endpoint, ProbeBehavior>,
    airdrops: HashMap<Endpoint, ProbeBehavior>,
    connect_calls: HashMap<Endpoint, usize>,
    ping_calls: HashMap<Endpoint, usize>,
    airdrop_calls: HashMap<Endpoint, usize>,
}

/// Shared view of the probes a [`FakeControlPlaneFactory`] has served.
#[derive(Clone, Default)]
pub struct ProbeLog {
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeLog {
    pub fn connects(&self, endpoint: &Endpoint) -> usize {
        lock(&self.state).connect_calls.get(endpoint).copied().unwrap_or(0)
    }

    pub fn pings(&self, endpoint: &Endpoint) -> usize {
        lock(&self.state).ping_calls.get(endpoint).copied().unwrap_or(0)
    }

    pub fn airdrops(&self, endpoint: &Endpoint) -> usize {
        lock(&self.state).airdrop_calls.get(endpoint).copied().unwrap_or(0)
    }

    pub fn set_ping(&self, endpoint: &Endpoint, behavior: ProbeBehavior) {
        lock(&self.state).pings.insert(endpoint.clone(), behavior);
    }

    pub fn set_airdrop(&self, endpoint: &Endpoint, behavior: ProbeBehavior) {
        lock(&self.state).airdrops.insert(endpoint.clone(), behavior);
    }
}

/// Hands out [`FakeControlPlane`]s whose probe outcome is scripted per endpoint.
/// Endpoints without a script behave as if nothing is listening.
#[derive(Clone)]
pub struct FakeControlPlaneFactory {
    log: ProbeLog,
    backend: InMemoryControlPlane,
}

impl FakeControlPlaneFactory {
    pub fn new() -> Self {
        Self::with_backend(InMemoryControlPlane::new(InMemoryLedger::new()))
    }

    pub fn with_backend(backend: InMemoryControlPlane) -> Self {
        Self {
            log: ProbeLog::default(),
            backend,
        }
    }

    pub fn with_ping(self, endpoint: &Endpoint, behavior: ProbeBehavior) -> Self {
        self.log.set_ping(endpoint, behavior);
        self
    }

    pub fn with_airdrop(self, endpoint: &Endpoint, behavior: ProbeBehavior) -> Self {
        self.log.set_airdrop(endpoint, behavior);
        self
    }

    pub fn calls(&self) -> ProbeLog {
        self.log.clone()
    }
}

impl Default for FakeControlPlaneFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlaneFactory for FakeControlPlaneFactory {
    type Client = FakeControlPlane;

    fn connect(&self, endpoint: &Endpoint) -> Result<FakeControlPlane, ControlPlaneError> {
        *lock(&self.log.state)
            .connect_calls
            .entry(endpoint.clone())
            .or_default() += 1;
        Ok(FakeControlPlane {
            endpoint: endpoint.clone(),
            log: self.log.clone(),
            backend: self.backend.clone(),
        })
    }
}

pub struct FakeControlPlane {
    endpoint: Endpoint,
    log: ProbeLog,
    backend: InMemoryControlPlane,
}

impl FakeControlPlane {
    pub fn backend(&self) -> &InMemoryControlPlane {
        &self.backend
    }
}

impl ControlPlane for FakeControlPlane {
    async fn ping(&self) -> Result<(), ControlPlaneError> {
        let behavior = {
            let mut state = lock(&self.log.state);
            *state.ping_calls.entry(self.endpoint.clone()).or_default() += 1;
            state
                .pings
                .get(&self.endpoint)
                .cloned()
                .unwrap_or_else(ProbeBehavior::refused)
        };
        match behavior {
            ProbeBehavior::Succeed => Ok(()),
            ProbeBehavior::Fail(err) => Err(err),
        }
    }

    async fn request_airdrop(
        &self,
        cluster: Cluster,
        address: &Address,
        lamports: u64,
    ) -> Result<Signature, ControlPlaneError> {
        let behavior = {
            let mut state = lock(&self.log.state);
            *state.airdrop_calls.entry(self.endpoint.clone()).or_default() += 1;
            state
                .airdrops
                .get(&self.endpoint)
                .cloned()
                .unwrap_or_else(ProbeBehavior::refused)
        };
        match behavior {
            ProbeBehavior::Succeed if *address == Address::SYSTEM_PROGRAM => {
                Ok(Signature::new("probe"))
            }
            ProbeBehavior::Succeed => {
                self.backend.request_airdrop(cluster, address, lamports).await
            }
            ProbeBehavior::Fail(err) => Err(err),
        }
    }

    async fn create_snapshot(
        &self,
        label: &str,
        addresses: &[Address],
        options: &CreateSnapshotOptions,
    ) -> Result<CreatedSnapshot, ControlPlaneError> {
        self.backend.create_snapshot(label, addresses, options).await
    }

    async fn restore_last_updated_snapshot(
        &self,
        options: &RestoreOptions,
    ) -> Result<RestoredSnapshot, ControlPlaneError> {
        self.backend.restore_last_updated_snapshot(options).await
    }

    async fn delete_snapshots_matching(
        &self,
        filter: &SnapshotFilter,
    ) -> Result<DeletedSnapshots, ControlPlaneError> {
        self.backend.delete_snapshots_matching(filter).await
    }

    async fn modify_account(
        &self,
        modification: &AccountModification,
    ) -> Result<(), ControlPlaneError> {
        self.backend.modify_account(modification).await
    }

    async fn label_transaction(
        &self,
        signature: &Signature,
        label: &str,
    ) -> Result<(), ControlPlaneError> {
        self.backend.label_transaction(signature, label).await
    }
}

#[derive(Default)]
struct PubSubState {
    next_id: u64,
    accounts: HashMap<SubscriptionId, (Address, mpsc::UnboundedSender<AccountNotification>)>,
    programs: HashMap<SubscriptionId, (Address, mpsc::UnboundedSender<ProgramNotification>)>,
    released: Vec<(SubscriptionId, SubscriptionKind)>,
}

/// Push transport whose notifications are injected by the test.
#[derive(Clone, Default)]
pub struct InMemoryPubSub {
    state: Arc<Mutex<PubSubState>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a balance change to every live subscription on `address`.
    /// Returns the number of subscriptions reached.
    pub fn push_account(&self, address: &Address, lamports: u64) -> usize {
        lock(&self.state)
            .accounts
            .values()
            .filter(|(target, _)| target == address)
            .filter(|(_, tx)| tx.send(AccountNotification { lamports }).is_ok())
            .count()
    }

    /// Deliver a program-account change to every live subscription on `program`.
    pub fn push_program(&self, program: &Address, notification: ProgramNotification) -> usize {
        lock(&self.state)
            .programs
            .values()
            .filter(|(target, _)| target == program)
            .filter(|(_, tx)| tx.send(notification.clone()).is_ok())
            .count()
    }

    pub fn active(&self) -> usize {
        let state = lock(&self.state);
        state.accounts.len() + state.programs.len()
    }

    pub fn released(&self) -> Vec<(SubscriptionId, SubscriptionKind)> {
        lock(&self.state).released.clone()
    }
}

impl PubSub for InMemoryPubSub {
    async fn account_subscribe(
        &self,
        address: &Address,
    ) -> Result<Subscription<AccountNotification>, LedgerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.accounts.insert(id, (*address, tx));
        Ok(Subscription {
            id,
            notifications: rx,
        })
    }

    async fn program_subscribe(
        &self,
        program: &Address,
    ) -> Result<Subscription<ProgramNotification>, LedgerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.programs.insert(id, (*program, tx));
        Ok(Subscription {
            id,
            notifications: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId, kind: SubscriptionKind) -> Result<(), LedgerError> {
        let mut state = lock(&self.state);
        let removed = match kind {
            SubscriptionKind::Account => state.accounts.remove(&id).is_some(),
            SubscriptionKind::Program => state.programs.remove(&id).is_some(),
        };
        state.released.push((id, kind));
        if removed {
            Ok(())
        } else {
            Err(LedgerError::Subscription(format!("unknown subscription {id}")))
        }
    }
}

/// Notifier that keeps every message for later inspection.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Arc<Mutex<Vec<String>>> {
        self.messages.clone()
    }
}

impl crate::notify::Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }
}
