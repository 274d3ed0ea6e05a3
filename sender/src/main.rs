use std::env;

use anyhow::Context;
use comms::specs::BenchSpec;
use log::info;
use tokio::signal;

use sender::Sender;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let spec = BenchSpec::from_env().context("failed to load the configuration")?;

    // The sender listens where the receiver is configured to connect.
    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or(spec.receiver.source_address),
        env::var("PORT").unwrap_or_else(|_| spec.receiver.source_port.to_string()),
    );

    let mut sender = Sender::new(&spec.stream, spec.sender);
    let list = sender
        .listen(&addr)
        .await
        .with_context(|| format!("failed to get ready at {addr}"))?;

    let (stream, peer) = list.accept().await?;
    info!("receiver connected from {peer}");

    tokio::select! {
        ret = sender.run(stream) => {
            ret.context("streaming failed")?;
            info!("wrapping up, disconnecting...");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}
