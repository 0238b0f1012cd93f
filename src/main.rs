use std::net::SocketAddr;
use std::process::ExitCode;
use streamfn::app::{demo_builder, demo_config};
use streamfn::config::StreamConfig;
use streamfn::error::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt().init();
  match run().await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!(error = %e, "streamfn failed");
      ExitCode::FAILURE
    }
  }
}

/// Usage: `streamfn [config.json] [address]`.
async fn run() -> Result<()> {
  let mut args = std::env::args().skip(1);
  let config = match args.next() {
    Some(path) => {
      info!(path = %path, "loading configuration");
      StreamConfig::from_path(path)?
    }
    None => demo_config(),
  };
  let address: SocketAddr = args
    .next()
    .as_deref()
    .unwrap_or(DEFAULT_ADDRESS)
    .parse()
    .map_err(std::io::Error::other)?;

  let runtime = demo_builder().config(config).build()?;
  runtime.start();

  let listener = TcpListener::bind(address).await?;
  let server = tokio::spawn(
    std::sync::Arc::clone(runtime.ingress()).serve(listener, runtime.shutdown_token()),
  );

  tokio::select! {
    signal = tokio::signal::ctrl_c() => signal?,
    _ = runtime.stopped() => warn!("runtime stopped on its own"),
  }
  info!("shutting down");
  runtime.shutdown().await?;
  server.await??;
  Ok(())
}
