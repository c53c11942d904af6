use crate::{
    Result,
    control_plane::{
        Cluster,
        ControlPlane,
        ControlPlaneFactory,
        Endpoint,
    },
    error::{
        ControlPlaneError,
        Error,
    },
    notify::Notifier,
    types::Address,
};
use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        Ordering,
    },
};
use tokio::sync::OnceCell;
use tracing::{
    debug,
    info,
    warn,
};

#[cfg(test)]
mod tests;

pub const UNREACHABLE_MESSAGE: &str = "Failed to connect to control plane";

/// Marker only produced once a request got past the service front door and was
/// refused by ledger processing.
pub const LEDGER_REJECTION_MARKER: &str = "SolanaSdkTransactionError";

/// Lamports requested by the legacy liveness probe.
const LEGACY_PROBE_LAMPORTS: u64 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Modern,
    Legacy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Unresolved,
    Modern,
    Legacy,
    /// Last attempt failed. The next resolution probes again.
    Failed,
}

/// Decides whether a failed legacy probe still proves the service is alive.
pub trait ProbeClassifier {
    fn is_liveness_signal(&self, err: &ControlPlaneError) -> bool;
}

#[derive(Clone, Debug)]
pub struct LedgerRejectionClassifier {
    marker: String,
}

impl LedgerRejectionClassifier {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for LedgerRejectionClassifier {
    fn default() -> Self {
        Self::new(LEDGER_REJECTION_MARKER)
    }
}

impl ProbeClassifier for LedgerRejectionClassifier {
    fn is_liveness_signal(&self, err: &ControlPlaneError) -> bool {
        is_ledger_rejection(err, &self.marker)
    }
}

/// True when `err` is a rejection raised by ledger semantics rather than by
/// transport or the service front door.
pub fn is_ledger_rejection(err: &ControlPlaneError, marker: &str) -> bool {
    match err {
        ControlPlaneError::Rejected { message, .. } => message.contains(marker),
        ControlPlaneError::Transport(_) | ControlPlaneError::InvalidResponse(_) => false,
    }
}

/// A negotiated control-plane session.
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    endpoint: Endpoint,
    tier: Tier,
    client: C,
}

impl<C> ConnectionHandle<C> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Lazily negotiates and memoizes the control-plane connection.
pub struct Connector<F: ControlPlaneFactory, N> {
    factory: F,
    notifier: N,
    classifier: Arc<dyn ProbeClassifier + Send + Sync>,
    modern: Endpoint,
    legacy: Endpoint,
    connection: OnceCell<ConnectionHandle<F::Client>>,
    failed: AtomicBool,
}

impl<F, N> Connector<F, N>
where
    F: ControlPlaneFactory,
    N: Notifier,
{
    pub fn new(factory: F, notifier: N, modern: Endpoint, legacy: Endpoint) -> Self {
        Self {
            factory,
            notifier,
            classifier: Arc::new(LedgerRejectionClassifier::default()),
            modern,
            legacy,
            connection: OnceCell::new(),
            failed: AtomicBool::new(false),
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: impl ProbeClassifier + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn state(&self) -> NegotiationState {
        match self.connection.get().map(ConnectionHandle::tier) {
            Some(Tier::Modern) => NegotiationState::Modern,
            Some(Tier::Legacy) => NegotiationState::Legacy,
            None if self.failed.load(Ordering::Acquire) => NegotiationState::Failed,
            None => NegotiationState::Unresolved,
        }
    }

    /// Returns the memoized connection, negotiating it on first use.
    pub async fn get_connection(&self) -> Result<&ConnectionHandle<F::Client>> {
        self.connection.get_or_try_init(|| self.negotiate()).await
    }

    async fn negotiate(&self) -> Result<ConnectionHandle<F::Client>> {
        match self.probe_modern().await {
            Ok(handle) => return self.resolved(handle),
            Err(err) => debug!(endpoint = %self.modern, %err, "modern probe failed"),
        }
        match self.probe_legacy().await {
            Ok(handle) => self.resolved(handle),
            Err(err) => {
                warn!(
                    modern = %self.modern,
                    legacy = %self.legacy,
                    %err,
                    "control plane negotiation failed"
                );
                self.failed.store(true, Ordering::Release);
                self.notifier.notify(UNREACHABLE_MESSAGE);
                Err(Error::ControlPlaneUnreachable {
                    modern: self.modern.clone(),
                    legacy: self.legacy.clone(),
                })
            }
        }
    }

    fn resolved(
        &self,
        handle: ConnectionHandle<F::Client>,
    ) -> Result<ConnectionHandle<F::Client>> {
        info!(endpoint = %handle.endpoint, tier = ?handle.tier, "connected to control plane");
        self.failed.store(false, Ordering::Release);
        Ok(handle)
    }

    async fn probe_modern(&self) -> Result<ConnectionHandle<F::Client>, ControlPlaneError> {
        let client = self.factory.connect(&self.modern)?;
        client.ping().await?;
        Ok(ConnectionHandle {
            endpoint: self.modern.clone(),
            tier: Tier::Modern,
            client,
        })
    }

    async fn probe_legacy(&self) -> Result<ConnectionHandle<F::Client>, ControlPlaneError> {
        let client = self.factory.connect(&self.legacy)?;
        // Airdrops to the system program are refused by the ledger, so a ledger
        // rejection proves the request went all the way through.
        let outcome = client
            .request_airdrop(
                Cluster::Development,
                &Address::SYSTEM_PROGRAM,
                LEGACY_PROBE_LAMPORTS,
            )
            .await;
        match outcome {
            Ok(_) => {}
            // Only raised after a 2xx status, when the body fails to parse.
            Err(ControlPlaneError::InvalidResponse(reason)) => {
                debug!(endpoint = %self.legacy, %reason, "legacy airdrop answered with unexpected body");
            }
            Err(err) if self.classifier.is_liveness_signal(&err) => {
                debug!(endpoint = %self.legacy, %err, "legacy probe rejected by ledger");
            }
            Err(err) => return Err(err),
        }
        Ok(ConnectionHandle {
            endpoint: self.legacy.clone(),
            tier: Tier::Legacy,
            client,
        })
    }
}
