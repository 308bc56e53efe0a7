//! Process control: start and stop a notification server on a TCP port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pushsub_config::ServerSettings;
use pushsub_transport::websocket::serve_notification_api;
use pushsub_transport::{NotificationApi, Payload, WsCallbackResolver};
use pushsub_utils::BrokerError;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::facade::ServerFacade;
use crate::reaper::LostClientReaper;

pub struct NotificationServer {
    facade: Arc<ServerFacade>,
    local_addr: SocketAddr,
    listener_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
}

impl NotificationServer {
    /// Bind `host:port` and start serving. Failing to bind is fatal and is
    /// returned as `BrokerError::Bind`.
    pub async fn start(settings: &ServerSettings) -> Result<Self, BrokerError> {
        let addr = format!("{}:{}", settings.host, settings.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BrokerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let facade = ServerFacade::new(Arc::new(WsCallbackResolver));

        let interval = Duration::from_secs(settings.reaper_interval_secs.max(1));
        let reaper_task = LostClientReaper::new(interval).spawn(&facade);

        let api: Arc<dyn NotificationApi> = facade.clone();
        let listener_task = tokio::spawn(serve_notification_api(
            listener,
            api,
            facade.shutdown_token(),
        ));

        info!("Notification server started at {local_addr}");

        Ok(Self {
            facade,
            local_addr,
            listener_task,
            reaper_task,
        })
    }

    pub fn facade(&self) -> &Arc<ServerFacade> {
        &self.facade
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving. With `notify`, every subscriber of every topic is told
    /// first (carrying `payload` when given).
    pub async fn stop(self, notify: bool, payload: Option<Payload>) {
        self.facade.stop_server(notify, payload).await;

        if let Err(e) = self.listener_task.await {
            warn!("Listener task ended abnormally: {e}");
        }
        if let Err(e) = self.reaper_task.await {
            warn!("Reaper task ended abnormally: {e}");
        }

        info!("Notification server at {} closed", self.local_addr);
    }

    /// Stop without notifying anyone.
    pub async fn stop_quietly(self) {
        self.stop(false, None).await
    }

    /// Stop, sending `payload` to every subscriber first.
    pub async fn stop_with(self, payload: Payload) {
        self.stop(true, Some(payload)).await
    }
}
