//! WebSocket transport
//!
//! Request/response calls over WebSocket text frames. Responsibilities:
//! - Accept TCP/WebSocket connections and answer each JSON call frame with
//!   exactly one `Reply` frame (`serve_notification_api`, `serve_callbacks`)
//! - Open outbound connections and issue calls one at a time (`RpcChannel`)
//! - Adapt both directions to the `rpc` traits: `RemoteServer` for clients,
//!   `WsCallbackResolver` for the server, `WsClientTransport` for the client
//!   side connect/listen pair
//!
//! A connection that drops, refuses, or closes before replying turns into
//! `BrokerError::PeerUnreachable`. Nothing here retries.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pushsub_utils::{BrokerError, ClientId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::message::{PushCall, RemoteError, Reply, ServerCall, unexpected};
use crate::rpc::{
    CallbackResolver, ClientCallback, ClientTransport, DeleteMode, NotificationApi, Payload,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One outbound connection. Calls are serialized: a call holds the socket
/// until its reply arrives.
///
/// A call dropped between sending and reading its reply leaves that reply on
/// the socket, so the channel is marked broken and every later call fails
/// with `PeerUnreachable`.
pub struct RpcChannel {
    peer: String,
    stream: Mutex<WsStream>,
    broken: AtomicBool,
}

/// Marks the channel broken unless the call finished.
struct InFlight<'a> {
    broken: &'a AtomicBool,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.broken.store(true, Ordering::SeqCst);
        }
    }
}

impl RpcChannel {
    /// Connect to `addr` given as `host:port`.
    pub async fn connect(addr: &str) -> Result<Self, BrokerError> {
        let url = format!("ws://{addr}");
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| BrokerError::PeerUnreachable(format!("{addr}: {e}")))?;

        debug!("Opened call channel to {addr}");
        Ok(Self {
            peer: addr.to_string(),
            stream: Mutex::new(stream),
            broken: AtomicBool::new(false),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Send one call and wait for its reply. A `Reply::Error` comes back as
    /// the matching `BrokerError`.
    pub async fn call<C: Serialize>(&self, call: &C) -> Result<Reply, BrokerError> {
        let text =
            serde_json::to_string(call).map_err(|e| BrokerError::Protocol(e.to_string()))?;

        let mut stream = self.stream.lock().await;
        if self.is_broken() {
            return Err(BrokerError::PeerUnreachable(format!(
                "{}: channel abandoned mid-call",
                self.peer
            )));
        }

        let mut in_flight = InFlight {
            broken: &self.broken,
            finished: false,
        };
        let outcome = self.exchange(&mut stream, text).await;
        in_flight.finished = true;
        outcome
    }

    async fn exchange(&self, stream: &mut WsStream, text: String) -> Result<Reply, BrokerError> {
        stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| self.unreachable(e))?;

        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(reply))) => {
                    let reply: Reply = serde_json::from_str(reply.as_str())
                        .map_err(|e| BrokerError::Protocol(format!("bad reply from {}: {e}", self.peer)))?;
                    return reply.into_result();
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(BrokerError::PeerUnreachable(format!(
                        "{}: connection closed",
                        self.peer
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.unreachable(e)),
            }
        }
    }

    fn unreachable(&self, err: tungstenite::Error) -> BrokerError {
        BrokerError::PeerUnreachable(format!("{}: {err}", self.peer))
    }
}

/// Accept connections on `listener` until `shutdown` is cancelled, answering
/// every call frame with `handle`.
pub async fn serve<C, F, Fut>(listener: TcpListener, shutdown: CancellationToken, handle: F)
where
    C: DeserializeOwned + Send + 'static,
    F: Fn(C) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, shutdown.clone(), handle.clone()));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {e}");
                }
            }
        }
    }

    debug!("Listener stopped");
}

async fn serve_connection<C, F, Fut>(
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
    handle: F,
) where
    C: DeserializeOwned + Send + 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error from {peer}: {e}");
            return;
        }
    };

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_stream.next() => msg,
        };

        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                let reply = match serde_json::from_str::<C>(text.as_str()) {
                    Ok(call) => handle(call).await,
                    Err(err) => {
                        warn!(
                            "Invalid call from {peer}: {err} | {}",
                            text.chars().take(100).collect::<String>()
                        );
                        Reply::Error {
                            error: RemoteError::Other {
                                message: format!("invalid call: {err}"),
                            },
                        }
                    }
                };

                let text = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize reply for {peer}: {e}");
                        break;
                    }
                };
                if let Err(e) = ws_stream.send(WsMessage::Text(text.into())).await {
                    debug!("Failed to reply to {peer}: {e}");
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("Connection with {peer} failed: {e}");
                break;
            }
        }
    }

    let _ = ws_stream.close(None).await;
}

/// Serve the server-facing API.
pub async fn serve_notification_api(
    listener: TcpListener,
    api: Arc<dyn NotificationApi>,
    shutdown: CancellationToken,
) {
    serve(listener, shutdown, move |call: ServerCall| {
        let api = api.clone();
        async move { dispatch_server_call(api.as_ref(), call).await }
    })
    .await
}

/// Serve pushes for one client.
pub async fn serve_callbacks(
    listener: TcpListener,
    handler: Arc<dyn ClientCallback>,
    shutdown: CancellationToken,
) {
    serve(listener, shutdown, move |call: PushCall| {
        let handler = handler.clone();
        async move {
            let result = match call {
                PushCall::Notification { topic } => handler.receive_notification(&topic).await,
                PushCall::DataNotification { payload, topic } => {
                    handler.receive_data_notification(payload, &topic).await
                }
            };
            match result {
                Ok(()) => Reply::Done {},
                Err(e) => Reply::from_error(e),
            }
        }
    })
    .await
}

pub async fn dispatch_server_call(api: &dyn NotificationApi, call: ServerCall) -> Reply {
    let result = match call {
        ServerCall::RegisterClient { endpoint } => api
            .register_client(&endpoint)
            .await
            .map(|client_id| Reply::Registered { client_id }),
        ServerCall::UnregisterClient { client_id } => {
            api.unregister_client(&client_id).await.map(|_| Reply::Done {})
        }
        ServerCall::Subscribe { topic, client_id } => {
            api.subscribe(&topic, &client_id).await.map(|_| Reply::Done {})
        }
        ServerCall::Unsubscribe { topic, client_id } => {
            api.unsubscribe(&topic, &client_id).await.map(|_| Reply::Done {})
        }
        ServerCall::DeleteTopic { topic, mode } => {
            api.delete_topic(&topic, mode).await.map(|_| Reply::Done {})
        }
        ServerCall::NotifyTopic { topic } => api.notify_topic(&topic).await.map(|_| Reply::Done {}),
        ServerCall::DataNotifyTopic { payload, topic } => api
            .data_notify_topic(payload, &topic)
            .await
            .map(|_| Reply::Done {}),
        ServerCall::Exists { topic } => api
            .exists(&topic)
            .await
            .map(|exists| Reply::Exists { exists }),
        ServerCall::SubscriberCount { topic } => api
            .subscriber_count(&topic)
            .await
            .map(|count| Reply::SubscriberCount { count }),
    };

    result.unwrap_or_else(Reply::from_error)
}

fn expect_done(reply: Reply) -> Result<(), BrokerError> {
    match reply {
        Reply::Done {} => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// The server as seen from a client.
pub struct RemoteServer {
    channel: RpcChannel,
}

impl RemoteServer {
    pub async fn connect(addr: &str) -> Result<Self, BrokerError> {
        Ok(Self {
            channel: RpcChannel::connect(addr).await?,
        })
    }
}

#[async_trait]
impl NotificationApi for RemoteServer {
    async fn register_client(&self, endpoint: &str) -> Result<ClientId, BrokerError> {
        let call = ServerCall::RegisterClient {
            endpoint: endpoint.to_string(),
        };
        match self.channel.call(&call).await? {
            Reply::Registered { client_id } => Ok(client_id),
            other => Err(unexpected(other)),
        }
    }

    async fn unregister_client(&self, client_id: &str) -> Result<(), BrokerError> {
        let call = ServerCall::UnregisterClient {
            client_id: client_id.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn subscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        let call = ServerCall::Subscribe {
            topic: topic.to_string(),
            client_id: client_id.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn unsubscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        let call = ServerCall::Unsubscribe {
            topic: topic.to_string(),
            client_id: client_id.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn delete_topic(&self, topic: &str, mode: DeleteMode) -> Result<(), BrokerError> {
        let call = ServerCall::DeleteTopic {
            topic: topic.to_string(),
            mode,
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn notify_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let call = ServerCall::NotifyTopic {
            topic: topic.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn data_notify_topic(&self, payload: Payload, topic: &str) -> Result<(), BrokerError> {
        let call = ServerCall::DataNotifyTopic {
            payload,
            topic: topic.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn exists(&self, topic: &str) -> Result<bool, BrokerError> {
        let call = ServerCall::Exists {
            topic: topic.to_string(),
        };
        match self.channel.call(&call).await? {
            Reply::Exists { exists } => Ok(exists),
            other => Err(unexpected(other)),
        }
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize, BrokerError> {
        let call = ServerCall::SubscriberCount {
            topic: topic.to_string(),
        };
        match self.channel.call(&call).await? {
            Reply::SubscriberCount { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }
}

/// A client's push endpoint as seen from the server.
pub struct RemoteClient {
    client_id: ClientId,
    channel: RpcChannel,
}

#[async_trait]
impl ClientCallback for RemoteClient {
    async fn receive_notification(&self, topic: &str) -> Result<(), BrokerError> {
        let call = PushCall::Notification {
            topic: topic.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }

    async fn receive_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError> {
        let call = PushCall::DataNotification {
            payload,
            topic: topic.to_string(),
        };
        expect_done(self.channel.call(&call).await?)
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("client_id", &self.client_id)
            .field("peer", &self.channel.peer())
            .finish()
    }
}

/// Resolves client endpoints by opening a call channel to them.
#[derive(Debug, Default, Clone)]
pub struct WsCallbackResolver;

#[async_trait]
impl CallbackResolver for WsCallbackResolver {
    async fn resolve(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<Arc<dyn ClientCallback>, BrokerError> {
        let channel = RpcChannel::connect(endpoint).await?;
        info!("Resolved push channel for {client_id} at {endpoint}");
        Ok(Arc::new(RemoteClient {
            client_id: client_id.to_string(),
            channel,
        }))
    }
}

/// Client side of the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsClientTransport {
    server_address: String,
    port: u16,
    advertise_host: Option<String>,
}

impl WsClientTransport {
    /// `port` 0 picks an ephemeral port for the push listener.
    pub fn new(server_address: &str, port: u16, advertise_host: Option<String>) -> Self {
        Self {
            server_address: server_address.to_string(),
            port,
            advertise_host,
        }
    }

    fn advertised_host(&self) -> String {
        if let Some(host) = &self.advertise_host {
            return host.clone();
        }
        match local_ip_address::local_ip() {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("Could not resolve local address ({e}), advertising loopback");
                IpAddr::V4(Ipv4Addr::LOCALHOST).to_string()
            }
        }
    }
}

#[async_trait]
impl ClientTransport for WsClientTransport {
    async fn connect(&self) -> Result<Arc<dyn NotificationApi>, BrokerError> {
        let server = RemoteServer::connect(&self.server_address).await?;
        Ok(Arc::new(server))
    }

    async fn listen(
        &self,
        handler: Arc<dyn ClientCallback>,
        shutdown: CancellationToken,
    ) -> Result<String, BrokerError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| BrokerError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?
            .port();

        let endpoint = format!("{}:{port}", self.advertised_host());
        info!("Listening for pushes on {bind_addr}, advertised as {endpoint}");

        tokio::spawn(serve_callbacks(listener, handler, shutdown));
        Ok(endpoint)
    }
}
