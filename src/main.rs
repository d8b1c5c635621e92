use rask_telemetry_agent::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await.map_err(|e| anyhow::anyhow!(e))
}
