use std::process;

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("worker exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    pincer_worker::telemetry::init()?;
    pincer_worker::run().await
}
