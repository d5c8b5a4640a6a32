//! WebSocket JSON-RPC provider with bounded reconnect and re-subscribe.
//!
//! A background task owns the connection. Callers talk to it over a command
//! channel; subscription notifications flow back over per-subscription
//! channels. When the connection drops the task reconnects with exponential
//! backoff, re-issues every active `eth_subscribe`, and rebinds the node's
//! new subscription ids. After `max_reconnect_attempts` failed attempts every
//! subscriber receives a `Lost` message and the task exits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use nftsync_core::{RawLog, SyncError};

use crate::provider::{LogNotification, LogSubscriber, LogSubscription, SubscriptionFilter};
use crate::request::{classify_rpc_error, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::subscriptions::{SubscriptionHandle, SubscriptionId, SubscriptionMessage, SubscriptionRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Reply<T> = oneshot::Sender<Result<T, SyncError>>;
type Subscribed = (SubscriptionHandle, mpsc::UnboundedReceiver<SubscriptionMessage>);

/// Configuration for [`WsProvider`].
#[derive(Debug, Clone)]
pub struct WsProviderConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
    /// Reconnect attempts before subscriptions are declared lost.
    pub max_reconnect_attempts: u32,
    /// Timeout for the connect handshake and for each request.
    pub request_timeout: Duration,
}

impl Default for WsProviderConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Request {
        method: String,
        params: Vec<Value>,
        reply: Reply<Value>,
    },
    Subscribe {
        params: Vec<Value>,
        reply: Reply<Subscribed>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
    Close,
}

/// WebSocket JSON-RPC provider.
pub struct WsProvider {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    request_timeout: Duration,
}

impl WsProvider {
    /// Connect to `url` and start the background task.
    ///
    /// The first connection is made here; failing it is an error rather
    /// than a retry loop.
    pub async fn connect(url: impl Into<String>, config: WsProviderConfig) -> Result<Self, SyncError> {
        let url = url.into();
        let stream = open(&url, config.request_timeout).await?;
        tracing::info!(url = %url, "WebSocket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let request_timeout = config.request_timeout;
        tokio::spawn(ws_task(url.clone(), stream, cmd_rx, config));

        Ok(Self {
            url,
            cmd_tx,
            request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a JSON-RPC request over the socket and deserialize the result.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(WsCommand::Request {
            method: method.to_string(),
            params,
            reply,
        })?;
        let value = self.await_reply(rx).await?;
        serde_json::from_value(value).map_err(|e| SyncError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Issue `eth_subscribe(params...)` and return its handle and receiver.
    pub async fn subscribe(&self, params: Vec<Value>) -> Result<Subscribed, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(WsCommand::Subscribe { params, reply })?;
        self.await_reply(rx).await
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let _ = self.cmd_tx.send(WsCommand::Unsubscribe { handle });
    }

    fn send_command(&self, cmd: WsCommand) -> Result<(), SyncError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SyncError::Connectivity(format!("WebSocket task for {} has stopped", self.url)))
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<Result<T, SyncError>>) -> Result<T, SyncError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => Err(SyncError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(SyncError::Connectivity("WebSocket task dropped the request".into())),
            Ok(Ok(result)) => result,
        }
    }
}

impl Drop for WsProvider {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl LogSubscriber for WsProvider {
    async fn subscribe_logs(&self, filter: &SubscriptionFilter) -> Result<LogSubscription, SyncError> {
        let (handle, mut rx) = self.subscribe(vec![json!("logs"), filter.to_param()]).await?;
        tracing::info!(
            address = %filter.address,
            topics = filter.topics.len(),
            "log subscription opened"
        );

        let (tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let item = match msg {
                    SubscriptionMessage::Notification(value) => match serde_json::from_value::<RawLog>(value) {
                        Ok(log) => LogNotification::Log(log),
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed log notification");
                            continue;
                        }
                    },
                    SubscriptionMessage::Lost { attempts } => LogNotification::Lost { attempts },
                };
                if tx.send(item).is_err() {
                    break;
                }
            }
        });

        let cmd_tx = self.cmd_tx.clone();
        Ok(LogSubscription::new(format!("ws-{}", handle.0), out_rx, move || {
            let _ = cmd_tx.send(WsCommand::Unsubscribe { handle });
        }))
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn open(url: &str, timeout: Duration) -> Result<WsStream, SyncError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Err(_) => Err(SyncError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(SyncError::Connectivity(format!("{url}: {e}"))),
        Ok(Ok((stream, _))) => Ok(stream),
    }
}

enum Pending {
    Request(Reply<Value>),
    Subscribe { params: Vec<Value>, reply: Reply<Subscribed> },
    Resubscribe(SubscriptionHandle),
    Ignore,
}

#[derive(Default)]
struct TaskState {
    next_id: u64,
    pending: HashMap<u64, Pending>,
    registry: SubscriptionRegistry,
}

impl TaskState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Turn a caller command into an outgoing request, recording its reply slot.
    fn outgoing(&mut self, cmd: WsCommand) -> Option<JsonRpcRequest> {
        match cmd {
            WsCommand::Request { method, params, reply } => {
                let id = self.next_id();
                self.pending.insert(id, Pending::Request(reply));
                Some(JsonRpcRequest::new(id, method, params))
            }
            WsCommand::Subscribe { params, reply } => {
                let id = self.next_id();
                let req = JsonRpcRequest::new(id, "eth_subscribe", params.clone());
                self.pending.insert(id, Pending::Subscribe { params, reply });
                Some(req)
            }
            WsCommand::Unsubscribe { handle } => {
                let server_id = self.registry.remove(handle)?;
                let id = self.next_id();
                self.pending.insert(id, Pending::Ignore);
                Some(JsonRpcRequest::new(id, "eth_unsubscribe", vec![json!(server_id.0)]))
            }
            WsCommand::Close => None,
        }
    }

    /// Answer a command that arrives while no connection is open.
    fn reject_offline(&mut self, cmd: WsCommand) {
        let offline = || SyncError::Connectivity("WebSocket is reconnecting".into());
        match cmd {
            WsCommand::Request { reply, .. } => {
                let _ = reply.send(Err(offline()));
            }
            WsCommand::Subscribe { reply, .. } => {
                let _ = reply.send(Err(offline()));
            }
            WsCommand::Unsubscribe { handle } => {
                self.registry.remove(handle);
            }
            WsCommand::Close => {}
        }
    }

    /// Route an incoming frame. Returns a request to send back when the node
    /// holds a subscription nobody is waiting for anymore.
    fn handle_message(&mut self, text: &str) -> Option<JsonRpcRequest> {
        let Ok(val) = serde_json::from_str::<Value>(text) else {
            tracing::debug!("failed to parse WS message as JSON");
            return None;
        };

        if val.get("method").and_then(Value::as_str) == Some("eth_subscription") {
            let params = &val["params"];
            if let Some(id) = params["subscription"].as_str() {
                let server_id = SubscriptionId(id.to_string());
                if !self.registry.dispatch(&server_id, params["result"].clone()) {
                    tracing::debug!(subscription = id, "notification for unknown subscription");
                }
            }
            return None;
        }

        let resp = serde_json::from_value::<JsonRpcResponse>(val).ok()?;
        let RpcId::Number(id) = resp.id else {
            return None;
        };
        let pending = self.pending.remove(&id)?;
        let result = resp.into_result().map_err(|e| classify_rpc_error(&e, None));

        match pending {
            Pending::Request(reply) => {
                let _ = reply.send(result);
            }
            Pending::Subscribe { params, reply } => match result.and_then(subscription_id) {
                Ok(server_id) => {
                    let (handle, rx) = self.registry.register(server_id, params);
                    if reply.send(Ok((handle, rx))).is_err() {
                        // The caller timed out; release the node-side subscription.
                        let server_id = self.registry.remove(handle)?;
                        tracing::debug!(subscription = %server_id, "subscribe reply arrived late, unsubscribing");
                        let id = self.next_id();
                        self.pending.insert(id, Pending::Ignore);
                        return Some(JsonRpcRequest::new(id, "eth_unsubscribe", vec![json!(server_id.0)]));
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Pending::Resubscribe(handle) => match result.and_then(subscription_id) {
                Ok(server_id) => {
                    tracing::info!(subscription = %server_id, handle = handle.0, "re-subscribed after reconnect");
                    self.registry.rebind(handle, server_id);
                }
                Err(e) => {
                    tracing::error!(error = %e, handle = handle.0, "re-subscribe rejected");
                    self.registry.close(handle, 0);
                }
            },
            Pending::Ignore => {}
        }
        None
    }

    /// Fail in-flight calls and forget node-side subscription ids.
    fn on_disconnect(&mut self) {
        for (_, pending) in self.pending.drain() {
            let dropped = || SyncError::Connectivity("WebSocket connection dropped".into());
            match pending {
                Pending::Request(reply) => {
                    let _ = reply.send(Err(dropped()));
                }
                Pending::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(dropped()));
                }
                Pending::Resubscribe(_) | Pending::Ignore => {}
            }
        }
        self.registry.detach_all();
    }
}

fn subscription_id(value: Value) -> Result<SubscriptionId, SyncError> {
    value
        .as_str()
        .map(|s| SubscriptionId(s.to_string()))
        .ok_or_else(|| SyncError::InvalidResponse(format!("eth_subscribe returned {value}")))
}

async fn send_request(sink: &mut WsSink, req: &JsonRpcRequest) -> Result<(), SyncError> {
    let text = serde_json::to_string(req)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| SyncError::Connectivity(e.to_string()))
}

async fn ws_task(
    url: String,
    first: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    config: WsProviderConfig,
) {
    let mut state = TaskState::default();
    let mut next_conn = Some(first);

    loop {
        let ws = match next_conn.take() {
            Some(ws) => ws,
            None => match reconnect(&url, &config, &mut cmd_rx, &mut state).await {
                Some(ws) => ws,
                None => return,
            },
        };
        let (mut sink, mut stream) = ws.split();

        let mut alive = true;
        for (handle, params) in state.registry.active() {
            let id = state.next_id();
            state.pending.insert(id, Pending::Resubscribe(handle));
            if send_request(&mut sink, &JsonRpcRequest::new(id, "eth_subscribe", params))
                .await
                .is_err()
            {
                alive = false;
                break;
            }
        }

        while alive {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.close().await;
                        state.on_disconnect();
                        tracing::debug!(url = %url, "WebSocket task closed");
                        return;
                    }
                    Some(cmd) => {
                        if let Some(req) = state.outgoing(cmd) {
                            if let Err(e) = send_request(&mut sink, &req).await {
                                tracing::warn!(error = %e, "WS send failed");
                                alive = false;
                            }
                        }
                    }
                },
                msg = stream.next() => match msg {
                    None | Some(Ok(Message::Close(_))) => alive = false,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WS receive error");
                        alive = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(req) = state.handle_message(text.as_str()) {
                            if let Err(e) = send_request(&mut sink, &req).await {
                                tracing::warn!(error = %e, "WS send failed");
                                alive = false;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        tracing::warn!(url = %url, subscriptions = state.registry.len(), "WebSocket disconnected");
        state.on_disconnect();
    }
}

/// Reconnect with exponential backoff. Returns `None` when the task should exit.
async fn reconnect(
    url: &str,
    config: &WsProviderConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    state: &mut TaskState,
) -> Option<WsStream> {
    let mut backoff = config.reconnect_initial;

    for attempt in 1..=config.max_reconnect_attempts {
        tracing::warn!(
            url = %url,
            attempt,
            max = config.max_reconnect_attempts,
            delay_ms = backoff.as_millis() as u64,
            "reconnecting WebSocket"
        );

        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(WsCommand::Close) => return None,
                    Some(cmd) => state.reject_offline(cmd),
                },
            }
        }

        match open(url, config.request_timeout).await {
            Ok(ws) => {
                tracing::info!(url = %url, attempt, "WebSocket reconnected");
                return Some(ws);
            }
            Err(e) => tracing::warn!(url = %url, attempt, error = %e, "reconnect failed"),
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }

    tracing::error!(
        url = %url,
        attempts = config.max_reconnect_attempts,
        subscriptions = state.registry.len(),
        "WebSocket reconnect attempts exhausted"
    );
    state.registry.close_all(config.max_reconnect_attempts);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn log_json(block: u64) -> Value {
        json!({
            "address": "0x7ab383c0389eeffe0073838c9016151731136143",
            "topics": ["0x01"],
            "data": "0x",
            "blockNumber": format!("0x{block:x}"),
            "transactionHash": format!("0x{block:064x}"),
            "logIndex": "0x0",
            "removed": false
        })
    }

    /// Accept one connection, confirm the first `eth_subscribe` as `sub_id`,
    /// push one log, and hand back the open socket.
    async fn serve_subscription(listener: &TcpListener, sub_id: &str, block: u64) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            if req["method"] == "eth_subscribe" {
                let ack = json!({"jsonrpc": "2.0", "id": req["id"], "result": sub_id});
                ws.send(Message::Text(ack.to_string().into())).await.unwrap();
                let note = json!({
                    "jsonrpc": "2.0",
                    "method": "eth_subscription",
                    "params": {"subscription": sub_id, "result": log_json(block)}
                });
                ws.send(Message::Text(note.to_string().into())).await.unwrap();
                break;
            }
        }
        ws
    }

    fn fast_config(attempts: u32) -> WsProviderConfig {
        WsProviderConfig {
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
            max_reconnect_attempts: attempts,
            request_timeout: Duration::from_secs(2),
        }
    }

    fn filter() -> SubscriptionFilter {
        SubscriptionFilter {
            address: "0x7ab383c0389eeffe0073838c9016151731136143".into(),
            topics: vec!["0x01".into()],
        }
    }

    async fn next_block(sub: &mut LogSubscription) -> Option<u64> {
        match sub.next().await? {
            LogNotification::Log(log) => log.block_number_u64(),
            LogNotification::Lost { .. } => None,
        }
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let err = WsProvider::connect("ws://127.0.0.1:1", fast_config(1)).await.err().unwrap();
        assert!(matches!(err, SyncError::Connectivity(_) | SyncError::Timeout { .. }));
    }

    #[tokio::test]
    async fn resubscribes_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let first = serve_subscription(&listener, "0xa", 1).await;
            drop(first);
            let mut second = serve_subscription(&listener, "0xb", 2).await;
            while second.next().await.is_some() {}
        });

        let provider = WsProvider::connect(&url, fast_config(3)).await.unwrap();
        let mut sub = provider.subscribe_logs(&filter()).await.unwrap();

        let run = async {
            assert_eq!(next_block(&mut sub).await, Some(1));
            assert_eq!(next_block(&mut sub).await, Some(2));
        };
        tokio::time::timeout(Duration::from_secs(10), run).await.unwrap();

        drop(sub);
        drop(provider);
        server.abort();
    }

    #[test]
    fn late_subscribe_reply_is_unsubscribed() {
        let mut state = TaskState::default();
        let (reply, rx) = oneshot::channel();
        let req = state
            .outgoing(WsCommand::Subscribe { params: vec![json!("logs")], reply })
            .unwrap();
        let RpcId::Number(id) = req.id else { panic!("numeric id expected") };
        drop(rx);

        let ack = json!({"jsonrpc": "2.0", "id": id, "result": "0xlate"});
        let follow_up = state.handle_message(&ack.to_string()).unwrap();
        assert_eq!(follow_up.method, "eth_unsubscribe");
        assert_eq!(follow_up.params, vec![json!("0xlate")]);
        assert_eq!(state.registry.len(), 0);
    }

    #[tokio::test]
    async fn timed_out_subscribe_is_released_on_the_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut seen_tx = Some(seen_tx);
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let req: Value = serde_json::from_str(text.as_str()).unwrap();
                if req["method"] == "eth_subscribe" {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    let ack = json!({"jsonrpc": "2.0", "id": req["id"], "result": "0xlate"});
                    ws.send(Message::Text(ack.to_string().into())).await.unwrap();
                } else if req["method"] == "eth_unsubscribe" {
                    if let Some(tx) = seen_tx.take() {
                        let _ = tx.send(req["params"].clone());
                    }
                }
            }
        });

        let config = WsProviderConfig {
            request_timeout: Duration::from_millis(100),
            ..fast_config(1)
        };
        let provider = WsProvider::connect(&url, config).await.unwrap();
        let err = provider.subscribe_logs(&filter()).await.err().unwrap();
        assert!(matches!(err, SyncError::Timeout { .. }));

        let params = tokio::time::timeout(Duration::from_secs(5), seen_rx).await.unwrap().unwrap();
        assert_eq!(params, json!(["0xlate"]));
    }

    #[tokio::test]
    async fn exhausted_reconnects_report_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let ws = serve_subscription(&listener, "0xa", 7).await;
            drop(listener);
            drop(ws);
        });

        let provider = WsProvider::connect(&url, fast_config(2)).await.unwrap();
        let mut sub = provider.subscribe_logs(&filter()).await.unwrap();

        let run = async {
            assert_eq!(next_block(&mut sub).await, Some(7));
            assert_eq!(sub.next().await, Some(LogNotification::Lost { attempts: 2 }));
            assert_eq!(sub.next().await, None);
        };
        tokio::time::timeout(Duration::from_secs(10), run).await.unwrap();
    }
}
