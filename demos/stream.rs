//! Connect to a notification stream and print what arrives.
//!
//! Run with: `cargo run --example stream -- ws://host:8080/v1/stream?...`

use enginio_stream::{BackendConnection, ConnectionConfig, Event};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let url = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: stream <stream-url>"))?;

    let mut conn = BackendConnection::new(ConnectionConfig::default());
    conn.add_event_handler(|evt| match evt {
        Event::StateChanged(state) => println!("[State] {}", state),
        Event::Message(msg) => println!("[Message] {}", serde_json::Value::Object(msg)),
        Event::DataError(e) => println!("[Data error] {}", e),
        Event::HandshakeFailed(e) => println!("[Handshake failed] {}", e),
        Event::ProtocolError(e) => println!("[Protocol error] {}", e),
        Event::TransportError { reason } => println!("[Transport error] {}", reason),
    });

    println!("Connecting to {}...", url);
    conn.connect(&url).await?;
    conn.run().await;

    Ok(())
}
