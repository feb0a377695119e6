//! Basic CDP example - connecting and getting browser version
//!
//! Start Chrome with `--remote-debugging-port=9222` and pass the
//! `webSocketDebuggerUrl` from `http://localhost:9222/json/version`.

use devtools::cdp::CDPEvent;
use devtools::{CDPClient, ClientConfig, RequestOptions};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cdp_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    println!("Connecting to Chrome at: {}", cdp_url);

    let client = CDPClient::open(ClientConfig::new(cdp_url)).await?;
    println!("Connected!");

    let version = client.send_request("Browser.getVersion", None).await?;
    println!("Browser version: {}", version);

    // Subscribe to target events
    client.subscribe(
        "Target.targetCreated",
        Arc::new(|event: CDPEvent| {
            println!("Target created: {:?}", event.params);
        }),
    );
    client
        .send_request(
            "Target.setDiscoverTargets",
            Some(serde_json::json!({ "discover": true })),
        )
        .await?;

    let targets = client
        .send_request_with(
            "Target.getTargets",
            None,
            RequestOptions::with_timeout(Duration::from_secs(2)),
        )
        .await?;
    println!("Targets: {}", targets);

    // Keep alive for a bit to see events
    tokio::time::sleep(Duration::from_secs(2)).await;

    client.close().await;
    println!("Disconnected");

    Ok(())
}
