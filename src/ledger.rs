use crate::{
    error::LedgerError,
    types::{
        Address,
        Signature,
        Tile,
    },
};
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::{
    fmt,
    future::Future,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub lamports: u64,
    pub data: Vec<u8>,
    pub owner: Address,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Processed,
    Confirmed,
    Finalized,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureStatus {
    pub confirmation: Option<ConfirmationStatus>,
    /// Set when the transaction landed but failed.
    pub err: Option<String>,
}

/// The slice of the ledger RPC this crate depends on.
pub trait LedgerRpc {
    /// fetch account at finalized commitment; `None` when it does not exist
    fn get_account(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Option<Account>, LedgerError>>;

    /// lamports held by `address`; zero for accounts that do not exist
    fn get_balance(&self, address: &Address) -> impl Future<Output = Result<u64, LedgerError>>;

    fn request_airdrop(
        &self,
        address: &Address,
        lamports: u64,
    ) -> impl Future<Output = Result<Signature, LedgerError>>;

    fn signature_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<SignatureStatus>, LedgerError>>;
}

/// Instruction submission for the game program. Implementations own the
/// signers for the accounts they are asked to act for.
pub trait GameProgram {
    /// Initialize `game` with `player_one` as first mover. Signed by the game
    /// account and player one.
    fn setup_game(
        &self,
        game: &Address,
        player_one: &Address,
        player_two: &Address,
    ) -> impl Future<Output = Result<Signature, LedgerError>>;

    fn play(
        &self,
        game: &Address,
        player: &Address,
        tile: Tile,
    ) -> impl Future<Output = Result<Signature, LedgerError>>;
}

/// A program handle with no signers attached. Every submission is refused.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedProgram;

impl GameProgram for DetachedProgram {
    async fn setup_game(
        &self,
        _game: &Address,
        _player_one: &Address,
        _player_two: &Address,
    ) -> Result<Signature, LedgerError> {
        Err(LedgerError::InstructionRejected(
            "no signer available for setup_game".to_string(),
        ))
    }

    async fn play(
        &self,
        _game: &Address,
        player: &Address,
        _tile: Tile,
    ) -> Result<Signature, LedgerError> {
        Err(LedgerError::InstructionRejected(format!(
            "no signer available for {player}"
        )))
    }
}

/// JSON-RPC 2.0 ledger client over HTTP.
pub struct JsonRpcLedger {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                LedgerError::Transport(format!("failed to build HTTP client for ledger: {e}"))
            })?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let res = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(LedgerError::Transport(format!(
                "ledger responded with {status} to {method}: {body}"
            )));
        }
        let envelope: RpcResponseDto<T> = serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::InvalidResponse(format!("{method}: {e}")))?;
        match (envelope.result, envelope.error) {
            (_, Some(err)) => Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(LedgerError::InvalidResponse(format!(
                "{method}: response carried neither result nor error"
            ))),
        }
    }
}

impl fmt::Display for JsonRpcLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[derive(Deserialize)]
struct RpcResponseDto<T> {
    result: Option<T>,
    error: Option<RpcErrorDto>,
}

#[derive(Deserialize)]
pub(crate) struct RpcErrorDto {
    pub(crate) code: i64,
    pub(crate) message: String,
}

#[derive(Deserialize)]
struct ContextualDto<T> {
    value: T,
}

#[derive(Deserialize)]
pub(crate) struct AccountDto {
    pub(crate) lamports: u64,
    /// `[payload, encoding]`
    pub(crate) data: (String, String),
    pub(crate) owner: Address,
}

impl TryFrom<AccountDto> for Account {
    type Error = LedgerError;

    fn try_from(dto: AccountDto) -> Result<Self, Self::Error> {
        let (payload, encoding) = dto.data;
        if encoding != "base64" {
            return Err(LedgerError::InvalidResponse(format!(
                "unexpected account encoding {encoding}"
            )));
        }
        let data = base64::decode(payload)
            .map_err(|e| LedgerError::InvalidResponse(format!("account data: {e}")))?;
        Ok(Account {
            lamports: dto.lamports,
            data,
            owner: dto.owner,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatusDto {
    confirmation_status: Option<ConfirmationStatus>,
    err: Option<Value>,
}

impl LedgerRpc for JsonRpcLedger {
    async fn get_account(&self, address: &Address) -> Result<Option<Account>, LedgerError> {
        let res: ContextualDto<Option<AccountDto>> = self
            .call(
                "getAccountInfo",
                json!([address, {"encoding": "base64", "commitment": "finalized"}]),
            )
            .await?;
        res.value.map(Account::try_from).transpose()
    }

    async fn get_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let res: ContextualDto<u64> = self
            .call("getBalance", json!([address, {"commitment": "finalized"}]))
            .await?;
        Ok(res.value)
    }

    async fn request_airdrop(
        &self,
        address: &Address,
        lamports: u64,
    ) -> Result<Signature, LedgerError> {
        self.call("requestAirdrop", json!([address, lamports])).await
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        let res: ContextualDto<Vec<Option<SignatureStatusDto>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;
        Ok(res.value.into_iter().next().flatten().map(|dto| SignatureStatus {
            confirmation: dto.confirmation_status,
            err: dto.err.map(|err| err.to_string()),
        }))
    }
}
