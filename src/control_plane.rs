use crate::{
    error::ControlPlaneError,
    types::{
        Address,
        Signature,
    },
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::{
    fmt,
    future::Future,
    time::Duration,
};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_MODERN_PORT: u16 = 60001;
/// Older deployments listen here and have no ping endpoint.
pub const DEFAULT_LEGACY_PORT: u16 = 50051;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    #[default]
    Development,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub group: Option<String>,
}

impl SnapshotFilter {
    pub fn group(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSnapshotOptions {
    pub description: Option<String>,
    pub group: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOptions {
    pub delete_snapshot_after_restore: bool,
    pub filter: SnapshotFilter,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSnapshot {
    pub snapshot_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredSnapshot {
    pub snapshot_id: String,
    pub restored_accounts: Vec<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedSnapshots {
    pub deleted: Vec<String>,
}

/// Overwrites the raw data of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountModification {
    pub address: Address,
    pub data: Vec<u8>,
    /// Must match the size the owning program expects for the account.
    pub size: usize,
}

impl AccountModification {
    pub fn for_addr(address: Address) -> Self {
        Self {
            address,
            data: Vec::new(),
            size: 0,
        }
    }

    pub fn set_data(mut self, data: Vec<u8>, size: usize) -> Self {
        self.data = data;
        self.size = size;
        self
    }
}

/// Operations of the environment-control service.
pub trait ControlPlane {
    /// Liveness check. Only modern deployments implement it.
    fn ping(&self) -> impl Future<Output = Result<(), ControlPlaneError>>;

    fn request_airdrop(
        &self,
        cluster: Cluster,
        address: &Address,
        lamports: u64,
    ) -> impl Future<Output = Result<Signature, ControlPlaneError>>;

    fn create_snapshot(
        &self,
        label: &str,
        addresses: &[Address],
        options: &CreateSnapshotOptions,
    ) -> impl Future<Output = Result<CreatedSnapshot, ControlPlaneError>>;

    /// restore accounts from the most recently updated snapshot passing the filter
    fn restore_last_updated_snapshot(
        &self,
        options: &RestoreOptions,
    ) -> impl Future<Output = Result<RestoredSnapshot, ControlPlaneError>>;

    fn delete_snapshots_matching(
        &self,
        filter: &SnapshotFilter,
    ) -> impl Future<Output = Result<DeletedSnapshots, ControlPlaneError>>;

    fn modify_account(
        &self,
        modification: &AccountModification,
    ) -> impl Future<Output = Result<(), ControlPlaneError>>;

    fn label_transaction(
        &self,
        signature: &Signature,
        label: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>>;
}

/// Builds a control-plane client bound to one endpoint.
pub trait ControlPlaneFactory {
    type Client: ControlPlane;

    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, ControlPlaneError>;
}

#[derive(Clone, Debug)]
pub struct HttpControlPlaneFactory {
    request_timeout: Duration,
}

impl HttpControlPlaneFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ControlPlaneFactory for HttpControlPlaneFactory {
    type Client = HttpControlPlane;

    fn connect(&self, endpoint: &Endpoint) -> Result<HttpControlPlane, ControlPlaneError> {
        HttpControlPlane::new(endpoint, self.request_timeout)
    }
}

/// JSON-over-HTTP control-plane client.
#[derive(Clone)]
pub struct HttpControlPlane {
    base_url: String,
    http: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(
        endpoint: &Endpoint,
        request_timeout: Duration,
    ) -> Result<Self, ControlPlaneError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                ControlPlaneError::Transport(format!(
                    "failed to build HTTP client for control plane: {e}"
                ))
            })?;
        Ok(Self {
            base_url: format!("http://{endpoint}"),
            http,
        })
    }

    async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<Res, ControlPlaneError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let bytes = self.send(path, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ControlPlaneError::InvalidResponse(format!("{path}: {e}"))
        })
    }

    async fn send<Req>(&self, path: &str, body: &Req) -> Result<Vec<u8>, ControlPlaneError>
    where
        Req: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(rejection(status, &bytes));
        }
        Ok(bytes.to_vec())
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> ControlPlaneError {
    let message = match serde_json::from_slice::<ErrorDto>(body) {
        Ok(dto) => dto.error,
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    ControlPlaneError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[derive(Deserialize)]
struct ErrorDto {
    error: String,
}

#[derive(Serialize)]
struct AirdropRequestDto<'a> {
    cluster: Cluster,
    address: &'a Address,
    lamports: u64,
}

#[derive(Deserialize)]
struct AirdropResponseDto {
    signature: Signature,
}

#[derive(Serialize)]
struct CreateSnapshotDto<'a> {
    label: &'a str,
    addresses: &'a [Address],
    #[serde(flatten)]
    options: &'a CreateSnapshotOptions,
}

#[derive(Serialize)]
struct ModifyAccountDto {
    address: Address,
    data: String,
    size: usize,
}

#[derive(Serialize)]
struct LabelTransactionDto<'a> {
    signature: &'a Signature,
    label: &'a str,
}

impl ControlPlane for HttpControlPlane {
    async fn ping(&self) -> Result<(), ControlPlaneError> {
        self.send("/ping", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn request_airdrop(
        &self,
        cluster: Cluster,
        address: &Address,
        lamports: u64,
    ) -> Result<Signature, ControlPlaneError> {
        let body = AirdropRequestDto {
            cluster,
            address,
            lamports,
        };
        let dto: AirdropResponseDto = self.post("/rpc/request-airdrop", &body).await?;
        Ok(dto.signature)
    }

    async fn create_snapshot(
        &self,
        label: &str,
        addresses: &[Address],
        options: &CreateSnapshotOptions,
    ) -> Result<CreatedSnapshot, ControlPlaneError> {
        let body = CreateSnapshotDto {
            label,
            addresses,
            options,
        };
        self.post("/snapshot/create", &body).await
    }

    async fn restore_last_updated_snapshot(
        &self,
        options: &RestoreOptions,
    ) -> Result<RestoredSnapshot, ControlPlaneError> {
        self.post("/snapshot/restore-last-updated", options).await
    }

    async fn delete_snapshots_matching(
        &self,
        filter: &SnapshotFilter,
    ) -> Result<DeletedSnapshots, ControlPlaneError> {
        self.post("/snapshot/delete-matching", filter).await
    }

    async fn modify_account(
        &self,
        modification: &AccountModification,
    ) -> Result<(), ControlPlaneError> {
        let body = ModifyAccountDto {
            address: modification.address,
            data: base64::encode(&modification.data),
            size: modification.size,
        };
        self.send("/mutator/modify-account", &body).await?;
        Ok(())
    }

    async fn label_transaction(
        &self,
        signature: &Signature,
        label: &str,
    ) -> Result<(), ControlPlaneError> {
        let body = LabelTransactionDto { signature, label };
        self.send("/transaction/label", &body).await?;
        Ok(())
    }
}

impl fmt::Display for HttpControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url)
    }
}

impl fmt::Debug for HttpControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpControlPlane")
            .field("base_url", &self.base_url)
            .finish()
    }
}
