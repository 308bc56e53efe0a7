use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use pushsub_client::{ClientFacade, Subscriber};
use pushsub_config::ServerSettings;
use pushsub_server::NotificationServer;
use pushsub_transport::{Payload, WsClientTransport};
use pushsub_utils::BrokerError;
use serde_json::json;

use super::{Command, parse_payload};

#[derive(Default)]
struct Inbox {
    seen: Mutex<Vec<(String, Option<Payload>)>>,
}

impl Inbox {
    fn seen(&self) -> Vec<(String, Option<Payload>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Subscriber for Inbox {
    fn on_notify(&self, topic: &str) {
        self.seen.lock().unwrap().push((topic.to_string(), None));
    }

    fn on_data_notify(&self, payload: &Payload, topic: &str) {
        self.seen
            .lock()
            .unwrap()
            .push((topic.to_string(), Some(payload.clone())));
    }
}

fn local_server_settings() -> ServerSettings {
    ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        reaper_interval_secs: 30,
    }
}

fn ws_client(server: &NotificationServer) -> ClientFacade {
    let transport = WsClientTransport::new(
        &server.local_addr().to_string(),
        0,
        Some("127.0.0.1".to_string()),
    );
    ClientFacade::new(Arc::new(transport), Duration::from_secs(5))
}

#[test]
fn cli_parses_subcommands() {
    let cmd = Command::try_parse_from([
        "pushsub", "delete", "--topic", "news", "--payload", r#"{"id":1}"#,
    ])
    .unwrap();
    match cmd {
        Command::Delete {
            topic,
            notify,
            payload,
        } => {
            assert_eq!(topic, "news");
            assert!(!notify);
            assert_eq!(parse_payload(payload.as_deref()).unwrap(), Some(json!({"id": 1})));
        }
        _ => panic!("expected delete"),
    }

    assert!(Command::try_parse_from(["pushsub", "notify"]).is_err());
    assert!(parse_payload(Some("{not json")).is_err());
}

#[tokio::test]
async fn end_to_end_over_websockets() {
    let server = NotificationServer::start(&local_server_settings())
        .await
        .unwrap();
    let listener = ws_client(&server);
    let publisher = ws_client(&server);
    let inbox = Arc::new(Inbox::default());

    assert!(listener.subscribe("alerts", inbox.clone()).await.unwrap());
    assert_eq!(publisher.subscriber_count("alerts").await.unwrap(), 1);

    publisher
        .post_data_notification(json!({"id": 1}), "alerts")
        .await
        .unwrap();
    publisher.post_notification("alerts").await.unwrap();
    assert_eq!(
        inbox.seen(),
        vec![
            ("alerts".to_string(), Some(json!({"id": 1}))),
            ("alerts".to_string(), None)
        ]
    );

    publisher.delete_topic_notify("alerts", true).await.unwrap();
    assert!(!publisher.exists("alerts").await.unwrap());
    assert_eq!(inbox.seen().len(), 3);

    listener.close().await;
    publisher.close().await;
    assert_eq!(server.facade().client_count(), 0);
    server.stop_quietly().await;
}

#[tokio::test]
async fn stopped_server_notifies_then_refuses_calls() {
    let server = NotificationServer::start(&local_server_settings())
        .await
        .unwrap();
    let listener = ws_client(&server);
    let inbox = Arc::new(Inbox::default());
    listener.subscribe("news", inbox.clone()).await.unwrap();

    let facade = server.facade().clone();
    server.stop_with(json!("going down")).await;

    assert_eq!(
        inbox.seen(),
        vec![("news".to_string(), Some(json!("going down")))]
    );
    assert!(facade.topic_names().is_empty());

    // the client's connection to the stopped server is either refused or
    // answered with a stop error
    let err = listener.exists("news").await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::ServerStopped | BrokerError::PeerUnreachable(_)
    ));
    listener.close().await;
}

/// Holds up every push it receives.
struct Sleeper(Duration);

impl Subscriber for Sleeper {
    fn on_notify(&self, _topic: &str) {
        std::thread::sleep(self.0);
    }

    fn on_data_notify(&self, _payload: &Payload, _topic: &str) {
        std::thread::sleep(self.0);
    }
}

#[tokio::test]
async fn subscribe_while_own_notification_is_in_flight() {
    let server = NotificationServer::start(&local_server_settings())
        .await
        .unwrap();
    let a = ws_client(&server);
    let b = ws_client(&server);
    let inbox = Arc::new(Inbox::default());

    a.subscribe("slow", Arc::new(Sleeper(Duration::from_millis(500))))
        .await
        .unwrap();
    a.subscribe("x", inbox.clone()).await.unwrap();

    // b keeps the server's push channel to a busy, a posts to itself, then
    // subscribes while that post is still waiting on the server
    let busy = b.post_notification("slow");
    let own = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        a.post_notification("x").await
    };
    let late = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        a.subscribe("y", inbox.clone()).await
    };
    let (busy, own, late) = tokio::time::timeout(Duration::from_secs(8), async {
        tokio::join!(busy, own, late)
    })
    .await
    .expect("calls should not wait on each other forever");

    busy.unwrap();
    own.unwrap();
    assert!(late.unwrap());
    assert_eq!(inbox.seen(), vec![("x".to_string(), None)]);
    assert_eq!(b.subscriber_count("y").await.unwrap(), 1);

    a.close().await;
    b.close().await;
    server.stop_quietly().await;
}
