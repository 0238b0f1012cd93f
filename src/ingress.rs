//! # HTTP Ingress
//!
//! A one-route HTTP/1 endpoint: every request body is forwarded through the
//! [`StreamBridge`] to the configured destination binding (`toStream` by
//! default) and acknowledged with `202 Accepted`. Method and path are not
//! inspected.

use crate::bridge::StreamBridge;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, so a persistent error such as EMFILE does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of inbound connections.
pub trait Acceptor: Send {
  /// Connection type.
  type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

  /// Wait for the next connection.
  fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
  type Io = TcpStream;

  fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
    let listener: &TcpListener = self;
    listener.accept()
  }
}

/// Forwards request bodies into the stream.
#[derive(Debug)]
pub struct Ingress {
  bridge: Arc<StreamBridge>,
  destination: String,
}

impl Ingress {
  /// Forward bodies to `destination` through `bridge`.
  pub fn new(bridge: Arc<StreamBridge>, destination: impl Into<String>) -> Self {
    Self {
      bridge,
      destination: destination.into(),
    }
  }

  /// The binding every body is sent to.
  pub fn destination(&self) -> &str {
    &self.destination
  }

  /// Send one body to the destination and pick the response status.
  pub fn accept(&self, body: Bytes) -> StatusCode {
    info!(destination = %self.destination, "Sending {}", String::from_utf8_lossy(&body));
    match self.bridge.send(&self.destination, body) {
      Ok(_) => StatusCode::ACCEPTED,
      Err(e) => {
        error!(destination = %self.destination, error = %e, "ingress send failed");
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let status = match request.into_body().collect().await {
      Ok(collected) => self.accept(collected.to_bytes()),
      Err(e) => {
        warn!(error = %e, "failed to read request body");
        StatusCode::BAD_REQUEST
      }
    };
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
  }

  /// Accept connections on `listener` until `shutdown` fires.
  pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
    info!(address = ?listener.local_addr()?, destination = %self.destination, "ingress listening");
    self.serve_with(listener, shutdown).await;
    Ok(())
  }

  /// Serve connections from `acceptor` until `shutdown` fires.
  ///
  /// A failed accept is logged and the loop keeps serving.
  pub async fn serve_with<A: Acceptor>(self: Arc<Self>, mut acceptor: A, shutdown: CancellationToken) {
    loop {
      let accepted = tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        accepted = acceptor.accept() => accepted,
      };
      let (stream, peer) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
          warn!(error = %e, "error accepting ingress connection");
          tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
          }
        }
      };
      debug!(peer = %peer, "ingress connection");
      let ingress = Arc::clone(&self);
      tokio::spawn(async move {
        let service = service_fn(move |request| {
          let ingress = Arc::clone(&ingress);
          async move { Ok::<_, Infallible>(ingress.handle(request).await) }
        });
        if let Err(e) = http1::Builder::new()
          .serve_connection(TokioIo::new(stream), service)
          .await
        {
          debug!(peer = %peer, error = %e, "ingress connection closed with error");
        }
      });
    }
    info!("ingress stopped");
  }
}
