use std::env;

use anyhow::Context;
use comms::specs::BenchSpec;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use receiver::{Receiver, classifier, net, reporter, spawn_reporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let BenchSpec {
        stream,
        receiver: mut spec,
        ..
    } = BenchSpec::from_env().context("failed to load the configuration")?;

    if let Ok(host) = env::var("HOST") {
        spec.source_address = host;
    }
    if let Ok(port) = env::var("PORT") {
        spec.source_port = port.parse().with_context(|| format!("invalid PORT {port}"))?;
    }

    let addr = format!("{}:{}", spec.source_address, spec.source_port);

    if !spec.model_paths.is_empty() {
        info!("model paths {:?}", spec.model_paths);
    }
    let classifier = classifier::build(spec.classifier);

    let socket = net::connect(&addr, spec.connect_attempts, spec.connect_backoff())
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let (forward, printer) = spawn_reporter(reporter::build(spec.output));
    let receiver = Receiver::new(&stream, spec, classifier);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            on_signal.cancel();
        }
    });

    receiver
        .run_until(socket, Box::new(forward), cancel)
        .await
        .context("receiving failed")?;

    // The reporter task ends once the pipeline drops its end of the channel.
    printer.await.context("reporter task failed")?;
    info!("wrapping up, disconnecting...");

    Ok(())
}
