//! Connects to a notification server, subscribes and prints every event.
//!
//! ```sh
//! cargo run --example client --features logging -- ws://127.0.0.1:9000/events
//! ```
use std::time::Duration;

use futures::StreamExt;
use yawn::{Client, Event, Options, Payload};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9000/events".to_string());

    let options = Options::from_url(&url)?
        .with_protocol("notify.v1")
        .with_heartbeat_interval(Duration::from_secs(5))
        .with_max_missed_pongs(3);

    let mut client = Client::connect(options).await?;
    client
        .send_message(serde_json::json!({ "op": "subscribe", "topic": "trades" }))
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Disconnecting");
                client.disconnect().await;
            }
            event = client.next() => {
                let Some(event) = event else {
                    break;
                };

                match event {
                    Event::Open { protocol } => log::info!("Connected (protocol={protocol:?})"),
                    Event::Message(Payload::Json(value)) => log::info!("message: {value}"),
                    Event::Notification(payload) => log::info!("notification: {payload:?}"),
                    Event::Message(payload) => log::info!("message: {payload:?}"),
                    Event::Error(err) => log::warn!("{err}"),
                    Event::Close(frame) => log::info!("Closed: {frame:?}"),
                }
            }
        }
    }

    Ok(())
}
