use crate::{
    control_plane::Endpoint,
    types::{
        Address,
        Signature,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("control plane unreachable (tried {modern} and {legacy})")]
    ControlPlaneUnreachable { modern: Endpoint, legacy: Endpoint },
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by a control-plane call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneError {
    /// The request never reached the service (refused, reset, timed out).
    #[error("control plane transport failure: {0}")]
    Transport(String),
    /// The service processed the request and refused it.
    #[error("control plane rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid control plane response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger transport failure: {0}")]
    Transport(String),
    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
    #[error("account {0} not found")]
    AccountNotFound(Address),
    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: Signature, reason: String },
    #[error("transaction {0} was not finalized in time")]
    ConfirmationTimeout(Signature),
    #[error("instruction rejected: {0}")]
    InstructionRejected(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("account data too short: needed {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("account discriminator mismatch")]
    Discriminator,
    #[error("invalid {field} tag {tag}")]
    InvalidTag { field: &'static str, tag: u8 },
}
