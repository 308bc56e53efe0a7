//! CLI for PushSub
//!
//! Subcommands:
//! - `server`: run the notification server until Ctrl-C
//! - `listen`: subscribe to a topic and print every notification
//! - `notify`: post a notification (optionally with a JSON payload)
//! - `delete`: delete a topic, optionally notifying its subscribers
//! - `stats`: report whether a topic exists and how many clients follow it
//!
//! Addresses and ports come from `config/default.*` and `PUSHSUB__*`
//! environment variables (a `.env` file is read first).

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use pushsub_client::{ClientFacade, Subscriber};
use pushsub_config::load_config;
use pushsub_server::NotificationServer;
use pushsub_transport::Payload;
use tracing::{error, info};

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[command(name = "pushsub")]
enum Command {
    /// Start the notification server
    Server,
    /// Subscribe to a topic and print notifications until Ctrl-C
    Listen {
        #[arg(long)]
        topic: String,
    },
    /// Post a notification to a topic
    Notify {
        #[arg(long)]
        topic: String,
        /// JSON payload; without it a plain notification is sent
        #[arg(long)]
        payload: Option<String>,
    },
    /// Delete a topic
    Delete {
        #[arg(long)]
        topic: String,
        /// Tell the subscribers before the topic goes away
        #[arg(long)]
        notify: bool,
        /// JSON payload for the final notification (implies --notify)
        #[arg(long)]
        payload: Option<String>,
    },
    /// Show whether a topic exists and its subscriber count
    Stats {
        #[arg(long)]
        topic: String,
    },
}

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    pushsub_utils::logging::init("info");

    let cmd = Command::parse();

    let outcome = match cmd {
        Command::Server => run_server().await,
        Command::Listen { topic } => run_listen(&topic).await,
        Command::Notify { topic, payload } => run_notify(&topic, payload.as_deref()).await,
        Command::Delete {
            topic,
            notify,
            payload,
        } => run_delete(&topic, notify, payload.as_deref()).await,
        Command::Stats { topic } => run_stats(&topic).await,
    };

    if let Err(e) = outcome {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

fn parse_payload(raw: Option<&str>) -> Result<Option<Payload>, serde_json::Error> {
    raw.map(serde_json::from_str).transpose()
}

fn client() -> Result<ClientFacade, Box<dyn Error>> {
    let config = load_config()?;
    Ok(ClientFacade::from_settings(&config.client))
}

async fn run_server() -> CliResult {
    let config = load_config()?;
    let server = NotificationServer::start(&config.server).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Notifying subscribers and exiting.");
    server.stop(true, None).await;

    Ok(())
}

/// Prints every notification it sees.
struct Printer;

impl Subscriber for Printer {
    fn on_notify(&self, topic: &str) {
        println!("[{topic}] notification");
    }

    fn on_data_notify(&self, payload: &Payload, topic: &str) {
        println!("[{topic}] {payload}");
    }
}

async fn run_listen(topic: &str) -> CliResult {
    let client = client()?;
    client.subscribe(topic, Arc::new(Printer)).await?;
    info!("Listening on {topic}. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    client.close().await;
    Ok(())
}

async fn run_notify(topic: &str, payload: Option<&str>) -> CliResult {
    let client = client()?;
    match parse_payload(payload)? {
        Some(payload) => client.post_data_notification(payload, topic).await?,
        None => client.post_notification(topic).await?,
    }
    client.close().await;
    Ok(())
}

async fn run_delete(topic: &str, notify: bool, payload: Option<&str>) -> CliResult {
    let client = client()?;
    match parse_payload(payload)? {
        Some(payload) => client.delete_topic_with_payload(topic, payload).await?,
        None => client.delete_topic_notify(topic, notify).await?,
    }
    client.close().await;
    Ok(())
}

async fn run_stats(topic: &str) -> CliResult {
    let client = client()?;
    let exists = client.exists(topic).await?;
    let count = client.subscriber_count(topic).await?;
    println!("topic={topic} exists={exists} subscribers={count}");
    client.close().await;
    Ok(())
}
