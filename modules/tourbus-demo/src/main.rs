use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tourbus::{handler_fn, Bus, BusConfig, SharedPayload, SimplePayload};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tourbus=info".parse()?))
        .init();

    let config = BusConfig::from_env();
    info!(name = config.name.as_str(), "Tourbus demo starting...");

    let bus = Bus::with_config(config);

    bus.add_handlers(
        "order_placed",
        [
            handler_fn(|p: SharedPayload| async move {
                let total = p.data().get("total").and_then(|v| v.as_f64()).unwrap_or(0.0);
                info!(total, "Order received");
                p.data().insert("acknowledged", true);
                Ok(())
            }),
            handler_fn(|p: SharedPayload| async move {
                anyhow::ensure!(p.data().contains_key("customer"), "order has no customer");
                Ok(())
            }),
        ],
    )?;

    let (audit_tx, mut audit_rx) = mpsc::channel::<SharedPayload>(16);
    bus.add_channel("order_placed", audit_tx.clone());
    bus.add_channel("order_shipped", audit_tx);

    let auditor = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(payload) = audit_rx.recv().await {
            seen += 1;
            info!(
                payload_type = payload.payload_type(),
                data = %serde_json::Value::Object(payload.data().snapshot()),
                "Audited payload"
            );
        }
        seen
    });

    let order = SimplePayload::new("order_placed")
        .with("customer", "ada")
        .with("total", 42.5)
        .shared();
    bus.post_and_wait(Arc::clone(&order)).await?;
    info!(acknowledged = ?order.data().get("acknowledged"), "Synchronous delivery done");

    // Missing customer: the second handler fails, the channel still gets it.
    bus.post(SimplePayload::new("order_placed").with("total", 1).shared())
        .await?;
    bus.post(
        SimplePayload::new("order_shipped")
            .with("carrier", "post")
            .shared(),
    )
    .await?;
    bus.post(SimplePayload::new("nobody_listens").shared()).await?;

    bus.flush().await?;
    bus.shutdown().await?;
    drop(bus);

    match auditor.await {
        Ok(seen) => info!(seen, "Auditor finished"),
        Err(e) => warn!(error = %e, "Auditor task failed"),
    }

    Ok(())
}
