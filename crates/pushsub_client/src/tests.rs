use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pushsub_server::ServerFacade;
use pushsub_transport::{
    ClientCallback, ClientTransport, DeleteMode, MemoryNetwork, NotificationApi, Payload,
};
use pushsub_utils::{BrokerError, ClientId};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::async_client::AsyncClient;
use crate::facade::{ClientFacade, ConnectionState};
use crate::registry::LocalSubscriptionRegistry;
use crate::subscriber::Subscriber;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Notify(String),
    Data(Payload, String),
}

#[derive(Default)]
struct Recording {
    events: Mutex<Vec<Event>>,
}

impl Recording {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Subscriber for Recording {
    fn on_notify(&self, topic: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Notify(topic.to_string()));
    }

    fn on_data_notify(&self, payload: &Payload, topic: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Data(payload.clone(), topic.to_string()));
    }
}

struct Panicking;

impl Subscriber for Panicking {
    fn on_notify(&self, topic: &str) {
        panic!("subscriber for {topic} blew up");
    }

    fn on_data_notify(&self, _payload: &Payload, topic: &str) {
        panic!("subscriber for {topic} blew up");
    }
}

/// Forwards to the real server and counts subscription traffic.
struct CountingApi {
    inner: Arc<ServerFacade>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

#[async_trait]
impl NotificationApi for CountingApi {
    async fn register_client(&self, endpoint: &str) -> Result<ClientId, BrokerError> {
        self.inner.register_client(endpoint).await
    }
    async fn unregister_client(&self, client_id: &str) -> Result<(), BrokerError> {
        self.inner.unregister_client(client_id).await
    }
    async fn subscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(topic, client_id).await
    }
    async fn unsubscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(topic, client_id).await
    }
    async fn delete_topic(&self, topic: &str, mode: DeleteMode) -> Result<(), BrokerError> {
        self.inner.delete_topic(topic, mode).await
    }
    async fn notify_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.inner.notify_topic(topic).await
    }
    async fn data_notify_topic(&self, payload: Payload, topic: &str) -> Result<(), BrokerError> {
        self.inner.data_notify_topic(payload, topic).await
    }
    async fn exists(&self, topic: &str) -> Result<bool, BrokerError> {
        self.inner.exists(topic).await
    }
    async fn subscriber_count(&self, topic: &str) -> Result<usize, BrokerError> {
        self.inner.subscriber_count(topic).await
    }
}

/// Listens fine but never gets an answer from the server.
#[derive(Default)]
struct StalledTransport {
    listens: AtomicUsize,
}

#[async_trait]
impl ClientTransport for StalledTransport {
    async fn connect(&self) -> Result<Arc<dyn NotificationApi>, BrokerError> {
        std::future::pending().await
    }

    async fn listen(
        &self,
        _handler: Arc<dyn ClientCallback>,
        _shutdown: CancellationToken,
    ) -> Result<String, BrokerError> {
        let n = self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stalled:{n}"))
    }
}

struct Broker {
    network: Arc<MemoryNetwork>,
    server: Arc<ServerFacade>,
}

impl Broker {
    fn start() -> Self {
        let network = MemoryNetwork::new();
        let server = ServerFacade::new(network.clone());
        let api: Arc<dyn NotificationApi> = server.clone();
        network.attach_server(&api);
        Self { network, server }
    }

    /// Route clients through a counting wrapper instead of the bare server.
    fn counted(&self) -> Arc<CountingApi> {
        let counting = Arc::new(CountingApi {
            inner: self.server.clone(),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        });
        let api: Arc<dyn NotificationApi> = counting.clone();
        self.network.attach_server(&api);
        counting
    }

    fn client(&self) -> ClientFacade {
        ClientFacade::new(self.network.clone(), Duration::from_secs(1))
    }
}

fn recording() -> (Arc<Recording>, Arc<dyn Subscriber>) {
    let recording = Arc::new(Recording::default());
    let subscriber: Arc<dyn Subscriber> = recording.clone();
    (recording, subscriber)
}

#[test]
fn local_registry_tracks_subscribers_by_identity() {
    let mut registry = LocalSubscriptionRegistry::new();
    let (_, first) = recording();
    let (_, second) = recording();

    assert!(registry.add("news", first.clone()));
    assert!(!registry.add("news", first.clone()));
    assert!(registry.add("news", second.clone()));
    assert_eq!(registry.subscriber_count("news"), 2);

    let removal = registry.remove("news", &first);
    assert!(removal.removed && !removal.topic_emptied);

    let removal = registry.remove("news", &first);
    assert!(!removal.removed);

    let removal = registry.remove("news", &second);
    assert!(removal.removed && removal.topic_emptied);
    assert!(!registry.has_topic("news"));
    assert!(registry.subscribers("news").is_empty());
}

#[tokio::test]
async fn connect_registers_with_the_server() {
    let broker = Broker::start();
    let client = broker.client();
    assert_eq!(client.state(), ConnectionState::Uninitialized);
    assert_eq!(client.client_id(), None);

    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.client_id().as_deref(), Some("client-0"));
    assert!(broker.server.is_registered("client-0"));
    let endpoint = client.endpoint().unwrap();
    assert!(broker.network.is_listening(&endpoint));
}

#[tokio::test]
async fn notification_reaches_local_subscriber_once() {
    let broker = Broker::start();
    let listener = broker.client();
    let publisher = broker.client();
    let (recording, subscriber) = recording();

    assert!(listener.subscribe("news", subscriber).await.unwrap());
    publisher.post_notification("news").await.unwrap();

    assert_eq!(recording.events(), vec![Event::Notify("news".into())]);
}

#[tokio::test]
async fn server_subscription_is_shared_by_local_subscribers() {
    let broker = Broker::start();
    let counting = broker.counted();
    let client = broker.client();
    let (_, first) = recording();
    let (_, second) = recording();

    assert!(client.subscribe("news", first.clone()).await.unwrap());
    assert!(!client.subscribe("news", first.clone()).await.unwrap());
    assert!(client.subscribe("news", second.clone()).await.unwrap());

    assert_eq!(counting.subscribes.load(Ordering::SeqCst), 1);
    assert_eq!(client.subscriber_count("news").await.unwrap(), 1);
    assert_eq!(client.local_topics(), vec!["news".to_string()]);

    assert!(client.unsubscribe("news", &first).await.unwrap());
    assert_eq!(counting.unsubscribes.load(Ordering::SeqCst), 0);
    assert!(client.exists("news").await.unwrap());

    assert!(client.unsubscribe("news", &second).await.unwrap());
    assert_eq!(counting.unsubscribes.load(Ordering::SeqCst), 1);
    assert!(!client.exists("news").await.unwrap());
}

#[tokio::test]
async fn unsubscribe_edge_cases() {
    let broker = Broker::start();
    let client = broker.client();
    let (_, attached) = recording();
    let (_, stranger) = recording();

    // nothing tracked under this topic
    assert!(client.unsubscribe("ghost", &stranger).await.unwrap());

    client.subscribe("news", attached).await.unwrap();
    assert!(!client.unsubscribe("news", &stranger).await.unwrap());
    assert!(client.exists("news").await.unwrap());
}

#[tokio::test]
async fn data_notification_fans_out_across_clients() {
    let broker = Broker::start();
    let a = broker.client();
    let b = broker.client();
    let publisher = broker.client();
    let (seen_by_a, sub_a) = recording();
    let (seen_by_b, sub_b) = recording();

    a.subscribe("alerts", sub_a).await.unwrap();
    b.subscribe("alerts", sub_b).await.unwrap();
    publisher
        .post_data_notification(json!({"id": 1}), "alerts")
        .await
        .unwrap();

    let expected = vec![Event::Data(json!({"id": 1}), "alerts".into())];
    assert_eq!(seen_by_a.events(), expected);
    assert_eq!(seen_by_b.events(), expected);
    assert_eq!(publisher.subscriber_count("alerts").await.unwrap(), 2);
}

#[tokio::test]
async fn delete_with_payload_reaches_subscribers_then_removes_topic() {
    let broker = Broker::start();
    let listener = broker.client();
    let publisher = broker.client();
    let (recording, subscriber) = recording();

    listener.subscribe("news", subscriber).await.unwrap();
    publisher
        .delete_topic_with_payload("news", json!("bye"))
        .await
        .unwrap();

    assert_eq!(
        recording.events(),
        vec![Event::Data(json!("bye"), "news".into())]
    );
    assert!(!publisher.exists("news").await.unwrap());

    // silent delete of a missing topic is fine
    publisher.delete_topic("news").await.unwrap();
    publisher.delete_topic_notify("news", true).await.unwrap();
}

#[tokio::test]
async fn push_without_local_subscribers_is_ignored() {
    let broker = Broker::start();
    let client = broker.client();
    client.receive_notification("nobody").await.unwrap();
    client
        .receive_data_notification(json!(null), "nobody")
        .await
        .unwrap();
}

#[tokio::test]
async fn panicking_subscriber_does_not_starve_others() {
    let broker = Broker::start();
    let client = broker.client();
    let (recording, subscriber) = recording();

    client.subscribe("jobs", Arc::new(Panicking)).await.unwrap();
    client.subscribe("jobs", subscriber).await.unwrap();

    client.receive_notification("jobs").await.unwrap();
    assert_eq!(recording.events(), vec![Event::Notify("jobs".into())]);
}

#[tokio::test]
async fn unreachable_server_fails_once_and_for_all() {
    let network = MemoryNetwork::new();
    let client = ClientFacade::new(network.clone(), Duration::from_secs(1));
    let (_, subscriber) = recording();

    let err = client.subscribe("news", subscriber).await.unwrap_err();
    assert!(matches!(err, BrokerError::UnreachableServer(_)));
    assert_eq!(client.state(), ConnectionState::Failed);

    // a server showing up later does not revive the client
    let server = ServerFacade::new(network.clone());
    let api: Arc<dyn NotificationApi> = server.clone();
    network.attach_server(&api);
    let err = client.exists("news").await.unwrap_err();
    assert!(matches!(err, BrokerError::UnreachableServer(_)));
    assert_eq!(server.client_count(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!network.is_listening("memory:0"));
}

#[tokio::test]
async fn stalled_connect_times_out_for_every_waiting_caller() {
    let transport = Arc::new(StalledTransport::default());
    let client = ClientFacade::new(transport.clone(), Duration::from_millis(50));

    let (exists, posted) = tokio::join!(client.exists("a"), client.post_notification("a"));

    assert!(matches!(exists, Err(BrokerError::UnreachableServer(_))));
    assert!(matches!(posted, Err(BrokerError::UnreachableServer(_))));
    assert_eq!(transport.listens.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn close_unregisters_and_rejects_later_calls() {
    let broker = Broker::start();
    let client = broker.client();
    let (_, subscriber) = recording();

    client.subscribe("news", subscriber.clone()).await.unwrap();
    let endpoint = client.endpoint().unwrap();
    client.close().await;

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(broker.server.client_count(), 0);
    assert!(broker.server.topic_names().is_empty());
    assert!(client.local_topics().is_empty());

    let err = client.subscribe("news", subscriber).await.unwrap_err();
    assert!(matches!(err, BrokerError::ClientClosed));

    client.close().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!broker.network.is_listening(&endpoint));
}

#[tokio::test]
async fn close_before_connecting_needs_no_server() {
    let client = ClientFacade::new(MemoryNetwork::new(), Duration::from_secs(1));
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.connect().await,
        Err(BrokerError::ClientClosed)
    ));
}

#[tokio::test]
async fn async_client_runs_calls_as_tasks() {
    let broker = Broker::start();
    let client = AsyncClient::new(Arc::new(broker.client()));
    let (recording, subscriber) = recording();

    let subscribed = client.subscribe("jobs", subscriber.clone());
    assert!(subscribed.await.unwrap().unwrap());

    client.post_notification("jobs").await.unwrap().unwrap();
    client
        .post_data_notification(json!([1, 2]), "jobs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        recording.events(),
        vec![
            Event::Notify("jobs".into()),
            Event::Data(json!([1, 2]), "jobs".into())
        ]
    );
    assert_eq!(client.subscriber_count("jobs").await.unwrap().unwrap(), 1);

    // dropped handle: the call still runs and close waits for it
    drop(client.unsubscribe("jobs", subscriber));
    client.close().await;

    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.facade().state(), ConnectionState::Closed);
    assert!(!broker.server.is_registered("client-0"));
    let err = client.exists("jobs").await.unwrap().unwrap_err();
    assert!(matches!(err, BrokerError::ClientClosed));
}
