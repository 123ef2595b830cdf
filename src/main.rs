#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dashboard_cache_lib::run().await?;
    Ok(())
}
