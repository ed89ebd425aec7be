use std::time::Duration;

use sonic_rs::json;
use stage_bridge::core::WebSocketBufferConfig;
use stage_bridge::mailbox::{ProbeConfig, RemoteMailbox, Stage, echo_actor, probe_actor};
use stage_bridge::transport::tungstenite::TungsteniteTransport;
use stage_bridge::BridgeServer;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stage_bridge=info".into()),
        )
        .init();

    let addr = std::env::var("BRIDGE_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let rounds = std::env::var("PROBE_ROUNDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);

    let stage = Stage::new();
    let _pong = stage.spawn_named("pong", echo_actor)?;

    let server = BridgeServer::bind(stage.clone(), addr.as_str()).await?;
    let bridge = format!("ws://{}/bridge", server.local_addr()?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    // The probe lives outside the stage and reaches "pong" through the bridge.
    let ping = RemoteMailbox::connect(
        &TungsteniteTransport::default(),
        &bridge,
        "ping",
        WebSocketBufferConfig::default(),
    )
    .await?;
    let config = ProbeConfig::new("pong", json!({"hello": "world"}))
        .with_pace(Duration::from_secs(1))
        .with_rounds(rounds);
    let completed = probe_actor(ping, config).await?;
    println!("probe completed {completed} round(s) through {bridge}");

    let _ = shutdown_tx.send(true);
    server_task.await??;
    Ok(())
}
