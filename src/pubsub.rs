use crate::{
    error::LedgerError,
    ledger::{
        Account,
        AccountDto,
        RpcErrorDto,
    },
    types::Address,
};
use futures::{
    SinkExt,
    StreamExt,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use std::{
    collections::HashMap,
    fmt,
    future::Future,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
};
use tracing::{
    debug,
    trace,
    warn,
};

/// Remote subscription id assigned by the transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Account,
    Program,
}

impl SubscriptionKind {
    fn unsubscribe_method(self) -> &'static str {
        match self {
            SubscriptionKind::Account => "accountUnsubscribe",
            SubscriptionKind::Program => "programUnsubscribe",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AccountNotification {
    pub lamports: u64,
}

/// Change of one account owned by the subscribed program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramNotification {
    pub address: Address,
    /// `None` when the transport carried no account data.
    pub data: Option<Vec<u8>>,
}

/// A live registration and the stream of its notifications, in transport order.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: SubscriptionId,
    pub notifications: mpsc::UnboundedReceiver<T>,
}

pub trait PubSub {
    fn account_subscribe(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Subscription<AccountNotification>, LedgerError>>;

    fn program_subscribe(
        &self,
        program: &Address,
    ) -> impl Future<Output = Result<Subscription<ProgramNotification>, LedgerError>>;

    /// Issue the release of `id`. Returns once the request is queued.
    fn unsubscribe(&self, id: SubscriptionId, kind: SubscriptionKind) -> Result<(), LedgerError>;
}

enum Route {
    Account(mpsc::UnboundedSender<AccountNotification>),
    Program(mpsc::UnboundedSender<ProgramNotification>),
}

enum Command {
    Subscribe {
        method: &'static str,
        params: Value,
        route: Route,
        reply: oneshot::Sender<Result<SubscriptionId, LedgerError>>,
    },
    Unsubscribe {
        id: SubscriptionId,
        kind: SubscriptionKind,
    },
}

/// JSON-RPC push subscriptions over a single WebSocket.
pub struct WsPubSub {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
}

impl WsPubSub {
    pub async fn connect(url: impl Into<String>) -> Result<Self, LedgerError> {
        let url = url.into();
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| LedgerError::Transport(format!("websocket connect to {url}: {e}")))?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(stream, command_rx));
        debug!(%url, "pubsub connected");
        Ok(Self {
            url,
            commands,
            driver,
        })
    }

    async fn subscribe(
        &self,
        method: &'static str,
        params: Value,
        route: Route,
    ) -> Result<SubscriptionId, LedgerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                method,
                params,
                route,
                reply,
            })
            .map_err(|_| LedgerError::Subscription("pubsub connection closed".to_string()))?;
        response
            .await
            .map_err(|_| LedgerError::Subscription("pubsub connection closed".to_string()))?
    }
}

impl Drop for WsPubSub {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl fmt::Display for WsPubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl PubSub for WsPubSub {
    async fn account_subscribe(
        &self,
        address: &Address,
    ) -> Result<Subscription<AccountNotification>, LedgerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(
                "accountSubscribe",
                json!([address, {"encoding": "base64", "commitment": "finalized"}]),
                Route::Account(tx),
            )
            .await?;
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
        let id = self
            .subscribe(
                "programSubscribe",
                json!([program, {"encoding": "base64", "commitment": "finalized"}]),
                Route::Program(tx),
            )
            .await?;
        Ok(Subscription {
            id,
            notifications: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId, kind: SubscriptionKind) -> Result<(), LedgerError> {
        self.commands
            .send(Command::Unsubscribe { id, kind })
            .map_err(|_| LedgerError::Subscription("pubsub connection closed".to_string()))
    }
}

#[derive(Deserialize)]
struct IncomingDto {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorDto>,
    method: Option<String>,
    params: Option<NotificationParamsDto>,
}

#[derive(Deserialize)]
struct NotificationParamsDto {
    subscription: u64,
    result: NotificationResultDto,
}

#[derive(Deserialize)]
struct NotificationResultDto {
    value: Value,
}

#[derive(Deserialize)]
struct KeyedAccountDto {
    pubkey: Address,
    account: Option<AccountDto>,
}

type Pending = HashMap<u64, (Route, oneshot::Sender<Result<SubscriptionId, LedgerError>>)>;

async fn drive<S>(stream: S, mut commands: mpsc::UnboundedReceiver<Command>)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    let (mut sink, mut source) = stream.split();
    let mut next_request: u64 = 0;
    let mut pending: Pending = HashMap::new();
    let mut routes: HashMap<SubscriptionId, Route> = HashMap::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                next_request += 1;
                match cmd {
                    Command::Subscribe { method, params, route, reply } => {
                        let request = json!({
                            "jsonrpc": "2.0",
                            "id": next_request,
                            "method": method,
                            "params": params,
                        });
                        match sink.send(Message::Text(request.to_string().into())).await {
                            Ok(()) => {
                                pending.insert(next_request, (route, reply));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(LedgerError::Transport(e.to_string())));
                            }
                        }
                    }
                    Command::Unsubscribe { id, kind } => {
                        routes.remove(&id);
                        let request = json!({
                            "jsonrpc": "2.0",
                            "id": next_request,
                            "method": kind.unsubscribe_method(),
                            "params": [id.0],
                        });
                        if let Err(err) = sink.send(Message::Text(request.to_string().into())).await {
                            warn!(%id, %err, "failed to send unsubscribe");
                        }
                    }
                }
            }
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, &mut pending, &mut routes);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await.ok();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "pubsub socket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "pubsub socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    for (_, (_, reply)) in pending.drain() {
        let _ = reply.send(Err(LedgerError::Subscription(
            "pubsub connection closed".to_string(),
        )));
    }
}

fn handle_text(
    text: &str,
    pending: &mut Pending,
    routes: &mut HashMap<SubscriptionId, Route>,
) {
    let incoming: IncomingDto = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(err) => {
            warn!(%err, "unparseable pubsub frame");
            return;
        }
    };

    if let Some((route, reply)) = incoming.id.and_then(|id| pending.remove(&id)) {
        let outcome = match (incoming.result, incoming.error) {
            (_, Some(err)) => Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(Value::Number(n)), None) => match n.as_u64() {
                Some(raw) => {
                    let id = SubscriptionId(raw);
                    routes.insert(id, route);
                    Ok(id)
                }
                None => Err(LedgerError::InvalidResponse(format!(
                    "subscription id {n}"
                ))),
            },
            (other, None) => Err(LedgerError::InvalidResponse(format!(
                "subscription response {other:?}"
            ))),
        };
        let _ = reply.send(outcome);
        return;
    }

    let (Some(method), Some(params)) = (incoming.method, incoming.params) else {
        return;
    };
    let id = SubscriptionId(params.subscription);
    let Some(route) = routes.get(&id) else {
        trace!(%id, "notification for released subscription");
        return;
    };
    let delivered = match (method.as_str(), route) {
        ("accountNotification", Route::Account(tx)) => {
            match serde_json::from_value::<AccountDto>(params.result.value) {
                Ok(dto) => tx.send(AccountNotification {
                    lamports: dto.lamports,
                })
                .is_ok(),
                Err(err) => {
                    warn!(%id, %err, "malformed account notification");
                    true
                }
            }
        }
        ("programNotification", Route::Program(tx)) => {
            match serde_json::from_value::<KeyedAccountDto>(params.result.value) {
                Ok(keyed) => {
                    let data = keyed
                        .account
                        .and_then(|dto| Account::try_from(dto).ok())
                        .map(|account| account.data);
                    tx.send(ProgramNotification {
                        address: keyed.pubkey,
                        data,
                    })
                    .is_ok()
                }
                Err(err) => {
                    warn!(%id, %err, "malformed program notification");
                    true
                }
            }
        }
        (other, _) => {
            warn!(%id, method = other, "unexpected notification method");
            true
        }
    };
    if !delivered {
        routes.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn address(seed: u8) -> Address {
        Address::new([seed; 32])
    }

    fn subscribed(route: Route, request: u64, remote: u64) -> HashMap<SubscriptionId, Route> {
        let (reply, mut response) = oneshot::channel();
        let mut pending: Pending = HashMap::from([(request, (route, reply))]);
        let mut routes = HashMap::new();
        handle_text(
            &json!({"jsonrpc": "2.0", "result": remote, "id": request}).to_string(),
            &mut pending,
            &mut routes,
        );
        assert_eq!(response.try_recv().unwrap(), Ok(SubscriptionId(remote)));
        routes
    }

    #[test]
    fn handle_text__subscribe_error__is_reported_to_caller() {
        // given
        let (tx, _rx) = mpsc::unbounded_channel();
        let (reply, mut response) = oneshot::channel();
        let mut pending: Pending = HashMap::from([(7, (Route::Account(tx), reply))]);
        let mut routes = HashMap::new();

        // when
        handle_text(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid param"},"id":7}"#,
            &mut pending,
            &mut routes,
        );

        // then
        assert_eq!(
            response.try_recv().unwrap(),
            Err(LedgerError::Rpc {
                code: -32602,
                message: "Invalid param".to_string(),
            })
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn handle_text__account_notification__is_routed_by_subscription_id() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut routes = subscribed(Route::Account(tx), 1, 23);
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "subscription": 23,
                "result": {
                    "context": {"slot": 5},
                    "value": {
                        "lamports": 33,
                        "data": ["", "base64"],
                        "owner": address(0),
                        "executable": false,
                        "rentEpoch": 0
                    }
                }
            }
        });

        // when
        handle_text(&frame.to_string(), &mut HashMap::new(), &mut routes);

        // then
        assert_eq!(rx.try_recv().unwrap(), AccountNotification { lamports: 33 });
    }

    #[test]
    fn handle_text__program_notification__decodes_keyed_account() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut routes = subscribed(Route::Program(tx), 1, 4);
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": {
                "subscription": 4,
                "result": {
                    "context": {"slot": 9},
                    "value": {
                        "pubkey": address(3),
                        "account": {
                            "lamports": 1,
                            "data": [base64::encode([1u8, 2, 3]), "base64"],
                            "owner": address(9)
                        }
                    }
                }
            }
        });

        // when
        handle_text(&frame.to_string(), &mut HashMap::new(), &mut routes);

        // then
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgramNotification {
                address: address(3),
                data: Some(vec![1, 2, 3]),
            }
        );
    }

    #[test]
    fn handle_text__unknown_subscription__is_dropped() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut routes = subscribed(Route::Account(tx), 1, 23);
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "subscription": 24,
                "result": {"value": {"lamports": 1, "data": ["", "base64"], "owner": address(0)}}
            }
        });

        // when
        handle_text(&frame.to_string(), &mut HashMap::new(), &mut routes);

        // then
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handle_text__receiver_gone__forgets_route() {
        // given
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = subscribed(Route::Account(tx), 1, 23);
        drop(rx);
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "subscription": 23,
                "result": {"value": {"lamports": 1, "data": ["", "base64"], "owner": address(0)}}
            }
        });

        // when
        handle_text(&frame.to_string(), &mut HashMap::new(), &mut routes);

        // then
        assert!(routes.is_empty());
    }
}
