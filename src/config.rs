use crate::{
    Error,
    Result,
    chain::{
        ChainConfig,
        GameAccounts,
    },
    control_plane::{
        DEFAULT_HOST,
        DEFAULT_LEGACY_PORT,
        DEFAULT_MODERN_PORT,
        Endpoint,
    },
    ledger::LAMPORTS_PER_SOL,
    types::Address,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_ISOLATION_GROUP: &str = "tictac-sync";
pub const DEFAULT_RPC_URL: &str = "http://localhost:8899";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8900";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub host: String,
    pub modern_port: u16,
    pub legacy_port: u16,
    pub request_timeout_ms: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            modern_port: DEFAULT_MODERN_PORT,
            legacy_port: DEFAULT_LEGACY_PORT,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub airdrop_lamports: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_interval_ms: u64,
    pub refresh_after_submit: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            airdrop_lamports: LAMPORTS_PER_SOL,
            confirm_timeout_ms: 60_000,
            confirm_poll_interval_ms: 500,
            refresh_after_submit: true,
        }
    }
}

/// Everything a [`GameSession`](crate::session::GameSession) needs to know
/// about its surroundings. Every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub control_plane: ControlPlaneConfig,
    pub ledger: LedgerConfig,
    /// Tag carried by every snapshot this session creates or queries.
    pub isolation_group: String,
    pub program_id: Option<Address>,
    pub game: Option<GameAccounts>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_plane: ControlPlaneConfig::default(),
            ledger: LedgerConfig::default(),
            isolation_group: DEFAULT_ISOLATION_GROUP.to_string(),
            program_id: None,
            game: None,
        }
    }
}

impl SessionConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn modern_endpoint(&self) -> Endpoint {
        Endpoint::new(self.control_plane.host.as_str(), self.control_plane.modern_port)
    }

    pub fn legacy_endpoint(&self) -> Endpoint {
        Endpoint::new(self.control_plane.host.as_str(), self.control_plane.legacy_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.control_plane.request_timeout_ms)
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            airdrop_lamports: self.ledger.airdrop_lamports,
            confirm_timeout: Duration::from_millis(self.ledger.confirm_timeout_ms),
            confirm_poll_interval: Duration::from_millis(self.ledger.confirm_poll_interval_ms),
            refresh_after_submit: self.ledger.refresh_after_submit,
        }
    }

    pub fn program_id(&self) -> Result<Address> {
        self.program_id
            .ok_or_else(|| Error::Config("program_id is not set".to_string()))
    }

    pub fn game_accounts(&self) -> Result<GameAccounts> {
        self.game
            .ok_or_else(|| Error::Config("game accounts are not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use tempdir::TempDir;

    fn write_config(temp_dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = temp_dir.path().join("session.json");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn default__control_plane__uses_known_ports() {
        let config = SessionConfig::default();

        assert_eq!(config.modern_endpoint(), Endpoint::new("localhost", 60001));
        assert_eq!(config.legacy_endpoint(), Endpoint::new("localhost", 50051));
        assert_eq!(config.isolation_group, "tictac-sync");
    }

    #[test]
    fn default__chain_config__airdrops_one_sol_and_refreshes() {
        let chain = SessionConfig::default().chain_config();

        assert_eq!(chain.airdrop_lamports, 1_000_000_000);
        assert!(chain.refresh_after_submit);
    }

    #[test]
    fn load__partial_file__fills_in_defaults() {
        // given
        let temp_dir = TempDir::new("tictac_sync_config").unwrap();
        let path = write_config(
            &temp_dir,
            r#"{
                "isolation_group": "demo",
                "control_plane": { "modern_port": 7000 },
                "ledger": { "refresh_after_submit": false },
                "program_id": "11111111111111111111111111111111"
            }"#,
        );

        // when
        let config = SessionConfig::load(&path).unwrap();

        // then
        assert_eq!(config.isolation_group, "demo");
        assert_eq!(config.control_plane.modern_port, 7000);
        assert_eq!(config.control_plane.legacy_port, DEFAULT_LEGACY_PORT);
        assert!(!config.ledger.refresh_after_submit);
        assert_eq!(config.program_id().unwrap(), Address::SYSTEM_PROGRAM);
        assert!(config.game_accounts().is_err());
    }

    #[test]
    fn load__malformed_file__is_a_config_error() {
        let temp_dir = TempDir::new("tictac_sync_config").unwrap();
        let path = write_config(&temp_dir, "{ not json");

        let result = SessionConfig::load(&path);

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load__missing_file__is_a_config_error() {
        let result = SessionConfig::load("/nonexistent/tictac-sync.json");

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
