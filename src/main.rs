use anyhow::Context;
use echolink::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    echolink::init_logging();

    let config = Config::load().context("Failed to load configuration")?;
    echolink::run(config).await
}
