//! Non-blocking wrapper around `ClientFacade`.

use std::future::Future;
use std::sync::Arc;

use pushsub_transport::Payload;
use pushsub_utils::BrokerError;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::facade::ClientFacade;
use crate::subscriber::Subscriber;

/// Every operation is started on its own task and handed back as a
/// `JoinHandle`; the caller can await it, or drop it and let the call finish
/// in the background. `close` waits for everything still in flight before
/// closing the facade.
#[derive(Clone)]
pub struct AsyncClient {
    facade: Arc<ClientFacade>,
    tasks: TaskTracker,
}

impl AsyncClient {
    pub fn new(facade: Arc<ClientFacade>) -> Self {
        Self {
            facade,
            tasks: TaskTracker::new(),
        }
    }

    pub fn facade(&self) -> &Arc<ClientFacade> {
        &self.facade
    }

    /// Calls submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn submit<T, F, Fut>(&self, call: F) -> JoinHandle<Result<T, BrokerError>>
    where
        F: FnOnce(Arc<ClientFacade>) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>> + Send + 'static,
        T: Send + 'static,
    {
        self.tasks.spawn(call(self.facade.clone()))
    }

    /// Start connecting right away.
    pub fn connect(&self) -> JoinHandle<Result<(), BrokerError>> {
        self.submit(|facade| async move { facade.connect().await })
    }

    pub fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> JoinHandle<Result<bool, BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.subscribe(&topic, subscriber).await })
    }

    pub fn unsubscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> JoinHandle<Result<bool, BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.unsubscribe(&topic, &subscriber).await })
    }

    pub fn post_notification(&self, topic: &str) -> JoinHandle<Result<(), BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.post_notification(&topic).await })
    }

    pub fn post_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> JoinHandle<Result<(), BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move {
            facade.post_data_notification(payload, &topic).await
        })
    }

    pub fn delete_topic(&self, topic: &str) -> JoinHandle<Result<(), BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.delete_topic(&topic).await })
    }

    pub fn delete_topic_notify(
        &self,
        topic: &str,
        notify: bool,
    ) -> JoinHandle<Result<(), BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.delete_topic_notify(&topic, notify).await })
    }

    pub fn delete_topic_with_payload(
        &self,
        topic: &str,
        payload: Payload,
    ) -> JoinHandle<Result<(), BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move {
            facade.delete_topic_with_payload(&topic, payload).await
        })
    }

    pub fn exists(&self, topic: &str) -> JoinHandle<Result<bool, BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.exists(&topic).await })
    }

    pub fn subscriber_count(&self, topic: &str) -> JoinHandle<Result<usize, BrokerError>> {
        let topic = topic.to_string();
        self.submit(move |facade| async move { facade.subscriber_count(&topic).await })
    }

    /// Wait for in-flight calls, then close the facade. Calls submitted
    /// afterwards fail with `ClientClosed`.
    pub async fn close(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.facade.close().await;
    }
}
