//! Subscribe to a topic, publish to it, and print what comes back.
//!
//! Start a server first (`cargo run -p pushsub -- server`), then run
//! `cargo run -p pushsub --example simple_client`.

use std::sync::Arc;
use std::time::Duration;

use pushsub_client::{ClientFacade, Subscriber};
use pushsub_config::load_config;
use pushsub_transport::Payload;

struct Printer;

impl Subscriber for Printer {
    fn on_notify(&self, topic: &str) {
        println!("Received notification on {topic}");
    }

    fn on_data_notify(&self, payload: &Payload, topic: &str) {
        println!("Received data on {topic}: {payload}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pushsub_utils::logging::init("info");

    let config = load_config()?;
    let client = ClientFacade::from_settings(&config.client);

    client.subscribe("news", Arc::new(Printer)).await?;
    println!("Subscribed as {:?}", client.client_id());

    client
        .post_data_notification(serde_json::json!({"headline": "hello"}), "news")
        .await?;
    client.post_notification("news").await?;
    println!(
        "news has {} subscriber(s)",
        client.subscriber_count("news").await?
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close().await;
    Ok(())
}
