use crate::{
    Result,
    codec::AccountCodec,
    error::LedgerError,
    ledger::{
        ConfirmationStatus,
        GameProgram,
        LedgerRpc,
    },
    types::{
        Address,
        GameState,
        Signature,
        Tile,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};
use tracing::debug;


#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub airdrop_lamports: u64,
    pub confirm_timeout: Duration,
    pub confirm_poll_interval: Duration,
    /// Fetch and return the game state after each submitted instruction.
    pub refresh_after_submit: bool,
}

/// Outcome of a submitted game instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub signature: Signature,
    pub state: Option<GameState>,
}

/// Participants of one game.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAccounts {
    pub game: Address,
    pub player_one: Address,
    pub player_two: Address,
}

impl GameAccounts {
    pub fn members(&self) -> [Address; 3] {
        [self.player_one, self.player_two, self.game]
    }
}

pub struct ChainStateClient<L, P, C> {
    ledger: L,
    program: P,
    codec: Arc<C>,
    accounts: GameAccounts,
    config: ChainConfig,
}

impl<L, P, C> ChainStateClient<L, P, C>
where
    L: LedgerRpc,
    P: GameProgram,
    C: AccountCodec,
{
    pub fn new(
        ledger: L,
        program: P,
        codec: Arc<C>,
        accounts: GameAccounts,
        config: ChainConfig,
    ) -> Self {
        Self {
            ledger,
            program,
            codec,
            accounts,
            config,
        }
    }

    pub fn accounts(&self) -> &GameAccounts {
        &self.accounts
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn fetch_game_state(&self) -> Result<GameState> {
        let game = self.accounts.game;
        let account = self
            .ledger
            .get_account(&game)
            .await?
            .ok_or(LedgerError::AccountNotFound(game))?;
        Ok(self.codec.decode(&account.data)?)
    }

    pub async fn setup_game(&self) -> Result<Submission> {
        let GameAccounts {
            game,
            player_one,
            player_two,
        } = self.accounts;
        let signature = self
            .program
            .setup_game(&game, &player_one, &player_two)
            .await?;
        self.wait_for_finalization(&signature).await?;
        self.submission(signature).await
    }

    /// Submit a move for `player`. Whose turn it is, cell occupancy and win
    /// detection are the program's concern.
    pub async fn play(&self, player: &Address, row: u8, column: u8) -> Result<Submission> {
        let signature = self
            .program
            .play(&self.accounts.game, player, Tile { row, column })
            .await?;
        self.wait_for_finalization(&signature).await?;
        self.submission(signature).await
    }

    pub async fn fund_account(&self, address: &Address) -> Result<Signature> {
        let signature = self
            .ledger
            .request_airdrop(address, self.config.airdrop_lamports)
            .await?;
        self.wait_for_finalization(&signature).await?;
        Ok(signature)
    }

    /// Balance of `address`, zero for accounts that do not exist yet.
    pub async fn get_account_funds(&self, address: &Address) -> Result<u64> {
        Ok(self.ledger.get_balance(address).await?)
    }

    async fn submission(&self, signature: Signature) -> Result<Submission> {
        let state = if self.config.refresh_after_submit {
            Some(self.fetch_game_state().await?)
        } else {
            None
        };
        Ok(Submission { signature, state })
    }

    async fn wait_for_finalization(&self, signature: &Signature) -> Result<()> {
        let deadline = Instant::now() + self.config.confirm_timeout;
        loop {
            if let Some(status) = self.ledger.signature_status(signature).await? {
                if let Some(reason) = status.err {
                    return Err(LedgerError::TransactionFailed {
                        signature: signature.clone(),
                        reason,
                    }
                    .into());
                }
                if status.confirmation == Some(ConfirmationStatus::Finalized) {
                    return Ok(());
                }
                debug!(%signature, confirmation = ?status.confirmation, "awaiting finalization");
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout(signature.clone()).into());
            }
            time::sleep(self.config.confirm_poll_interval).await;
        }
    }
}
