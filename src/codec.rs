use crate::{
    error::CodecError,
    types::{
        ADDRESS_LEN,
        Address,
        Board,
        GameState,
        GameStatus,
        Sign,
    },
};
use sha2::{
    Digest,
    Sha256,
};

pub const DISCRIMINATOR_LEN: usize = 8;

/// discriminator + players + turn + 9 optional signs + status (tag + winner)
pub const GAME_ACCOUNT_SIZE: usize =
    DISCRIMINATOR_LEN + 2 * ADDRESS_LEN + 1 + 9 * 2 + 1 + ADDRESS_LEN;

/// Converts between the raw game account bytes and [`GameState`].
pub trait AccountCodec {
    fn encode(&self, state: &GameState) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, data: &[u8]) -> Result<GameState, CodecError>;

    /// Size the program allocates for the game account.
    fn account_size(&self) -> usize;
}

/// Codec for the Anchor `Game` account of the tic-tac-toe program.
#[derive(Clone, Debug)]
pub struct AnchorGameCodec {
    discriminator: [u8; DISCRIMINATOR_LEN],
}

impl AnchorGameCodec {
    pub fn new() -> Self {
        Self::for_account("Game")
    }

    pub fn for_account(name: &str) -> Self {
        let digest = Sha256::digest(format!("account:{name}").as_bytes());
        let mut discriminator = [0u8; DISCRIMINATOR_LEN];
        discriminator.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
        Self { discriminator }
    }

    pub fn discriminator(&self) -> [u8; DISCRIMINATOR_LEN] {
        self.discriminator
    }
}

impl Default for AnchorGameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountCodec for AnchorGameCodec {
    fn encode(&self, state: &GameState) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(GAME_ACCOUNT_SIZE);
        out.extend_from_slice(&self.discriminator);
        for player in &state.players {
            out.extend_from_slice(player.as_bytes());
        }
        out.push(state.turn);
        for cell in state.board.iter().flatten() {
            match cell {
                None => out.push(0),
                Some(sign) => {
                    out.push(1);
                    out.push(match sign {
                        Sign::X => 0,
                        Sign::O => 1,
                    });
                }
            }
        }
        match state.status {
            GameStatus::Active => out.push(0),
            GameStatus::Tie => out.push(1),
            GameStatus::Won { winner } => {
                out.push(2);
                out.extend_from_slice(winner.as_bytes());
            }
        }
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<GameState, CodecError> {
        let mut reader = Reader { data, pos: 0 };
        if reader.take(DISCRIMINATOR_LEN)? != self.discriminator {
            return Err(CodecError::Discriminator);
        }
        let players = [reader.address()?, reader.address()?];
        let turn = reader.byte()?;
        let mut board = Board::default();
        for cell in board.iter_mut().flatten() {
            *cell = match reader.byte()? {
                0 => None,
                1 => Some(match reader.byte()? {
                    0 => Sign::X,
                    1 => Sign::O,
                    tag => return Err(CodecError::InvalidTag { field: "sign", tag }),
                }),
                tag => return Err(CodecError::InvalidTag { field: "cell", tag }),
            };
        }
        let status = match reader.byte()? {
            0 => GameStatus::Active,
            1 => GameStatus::Tie,
            2 => GameStatus::Won {
                winner: reader.address()?,
            },
            tag => return Err(CodecError::InvalidTag { field: "status", tag }),
        };
        Ok(GameState {
            players,
            turn,
            board,
            status,
        })
    }

    fn account_size(&self) -> usize {
        GAME_ACCOUNT_SIZE
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + len;
        let slice = self.data.get(self.pos..end).ok_or(CodecError::TooShort {
            needed: end,
            actual: self.data.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn address(&mut self) -> Result<Address, CodecError> {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(self.take(ADDRESS_LEN)?);
        Ok(Address::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn arb_state() -> GameState {
        let one = Address::new([1u8; ADDRESS_LEN]);
        let two = Address::new([2u8; ADDRESS_LEN]);
        let mut board = Board::default();
        board[0][0] = Some(Sign::X);
        board[1][1] = Some(Sign::O);
        GameState {
            players: [one, two],
            turn: 3,
            board,
            status: GameStatus::Active,
        }
    }

    #[test]
    fn encode__won_game__fills_whole_account() {
        // given
        let codec = AnchorGameCodec::new();
        let mut state = arb_state();
        state.status = GameStatus::Won {
            winner: state.players[0],
        };
        for cell in state.board.iter_mut().flatten() {
            *cell = Some(Sign::X);
        }

        // when
        let bytes = codec.encode(&state).unwrap();

        // then
        assert_eq!(bytes.len(), codec.account_size());
        assert_eq!(codec.decode(&bytes).unwrap(), state);
    }

    #[test]
    fn decode__zero_padded_account__ignores_trailing_bytes() {
        // given
        let codec = AnchorGameCodec::new();
        let state = arb_state();
        let mut bytes = codec.encode(&state).unwrap();
        bytes.resize(codec.account_size(), 0);

        // when
        let decoded = codec.decode(&bytes).unwrap();

        // then
        assert_eq!(decoded, state);
    }

    #[test]
    fn decode__foreign_discriminator__is_rejected() {
        let game = AnchorGameCodec::new();
        let other = AnchorGameCodec::for_account("Other");
        let bytes = other.encode(&arb_state()).unwrap();

        assert_eq!(game.decode(&bytes), Err(CodecError::Discriminator));
    }

    #[test]
    fn decode__truncated_account__reports_size() {
        let codec = AnchorGameCodec::new();
        let bytes = codec.encode(&arb_state()).unwrap();

        let err = codec.decode(&bytes[..20]).unwrap_err();

        assert!(matches!(err, CodecError::TooShort { actual: 20, .. }));
    }

    proptest! {
        #[test]
        fn decode__arbitrary_payload__never_panics(
            tail in proptest::collection::vec(any::<u8>(), 0..200)
        ) {
            let codec = AnchorGameCodec::new();
            let mut bytes = codec.discriminator().to_vec();
            bytes.extend(tail);
            let _ = codec.decode(&bytes);
        }
    }
}
