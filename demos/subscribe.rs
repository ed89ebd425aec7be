use stage_bridge::{BridgeClient, BridgeClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stage_bridge=info".into()),
        )
        .init();

    let bridge =
        std::env::var("BRIDGE_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080/bridge".to_string());
    let actor_id = std::env::var("ACTOR_ID").unwrap_or_else(|_| "ui".to_string());

    let client = BridgeClient::new(BridgeClientConfig {
        jitter: true,
        ..BridgeClientConfig::default()
    });
    let handle = client
        .subscribe(&bridge, &actor_id, |value| {
            println!("{}", sonic_rs::to_string(value).unwrap_or_default())
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    if let Ok(status) = handle.status().await {
        println!("{:?}", status.stats);
    }
    handle.unsubscribe().await;
    Ok(())
}
