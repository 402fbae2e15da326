//! Close reconciler service binary.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    close_reconciler::server::run().await
}
