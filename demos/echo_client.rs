//! Echo client demo
//!
//! Connects to a WebSocket echo server, sends a few messages and prints the
//! replies.
//!
//! ```text
//! cargo run --example echo_client -- ws://127.0.0.1:9001
//! ```

use sockloop::prelude::*;
use std::sync::Arc;

const MESSAGES: [&str; 3] = ["Hello", "from", "sockloop"];

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sockloop::init_logging()?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_string());

    let config = ClientConfig::default().handshake_timeout(Duration::from_secs(10));
    let client = sockloop::client_with_config(config)?;
    let (delegate, mut notifications) = ChannelDelegate::new();
    let socket = client.open(&url, Arc::new(delegate), &[], None)?;
    println!("Connecting to {}", socket.url());

    let mut replies = 0;
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Connected(socket) => {
                println!("Connected");
                for text in MESSAGES {
                    socket.send_text(text);
                }
            }
            Notification::Message(socket, message) => {
                println!("Received: {}", message);
                replies += 1;
                if replies == MESSAGES.len() {
                    socket.close();
                }
            }
            Notification::Error(_, code) => {
                eprintln!("Connection failed: {}", code);
            }
            Notification::Disconnected(_) => {
                println!("Disconnected after {} replies", replies);
                break;
            }
        }
    }

    Ok(())
}
