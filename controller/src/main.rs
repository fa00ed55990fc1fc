mod host;
mod sntp;
mod storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
