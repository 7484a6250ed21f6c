#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clai_daemon::run().await
}
