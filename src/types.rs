use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::{
    fmt,
    str::FromStr,
};

pub const ADDRESS_LEN: usize = 32;

/// 32-byte account address, rendered as base58.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// The system program. Airdrops to it can never succeed.
    pub const SYSTEM_PROGRAM: Address = Address([0u8; ADDRESS_LEN]);

    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {input:?}: {reason}")]
pub struct ParseAddressError {
    input: String,
    reason: String,
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|e| ParseAddressError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; ADDRESS_LEN] =
            bytes.try_into().map_err(|b: Vec<u8>| ParseAddressError {
                input: s.to_string(),
                reason: format!("expected {ADDRESS_LEN} bytes, got {}", b.len()),
            })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction signature as returned by the ledger, kept in its textual form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    X,
    O,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Active,
    Tie,
    Won { winner: Address },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub row: u8,
    pub column: u8,
}

pub type Board = [[Option<Sign>; 3]; 3];

/// Decoded contents of the on-chain game account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub players: [Address; 2],
    /// 1-based move counter.
    pub turn: u8,
    pub board: Board,
    pub status: GameStatus,
}

impl GameState {
    pub fn current_player(&self) -> Address {
        let index = usize::from(self.turn.saturating_sub(1) % 2);
        self.players[index]
    }

    pub fn is_over(&self) -> bool {
        !matches!(self.status, GameStatus::Active)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.board {
            let cells: Vec<&str> = row
                .iter()
                .map(|cell| match cell {
                    Some(Sign::X) => "X",
                    Some(Sign::O) => "O",
                    None => ".",
                })
                .collect();
            writeln!(f, "{}", cells.join(" "))?;
        }
        match self.status {
            GameStatus::Active => {
                write!(f, "turn {} ({})", self.turn, self.current_player())
            }
            GameStatus::Tie => write!(f, "tie"),
            GameStatus::Won { winner } => write!(f, "won by {winner}"),
        }
    }
}
