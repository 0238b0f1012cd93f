use crate::ingress::Acceptor;
use crate::runtime::StreamRuntime;
use bytes::Bytes;
use http::StatusCode;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Fails the first `failures` accepts, then hands out real connections.
struct FlakyAcceptor {
  listener: TcpListener,
  failures: usize,
}

impl Acceptor for FlakyAcceptor {
  type Io = TcpStream;

  fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
    async move {
      if self.failures > 0 {
        self.failures -= 1;
        return Err(io::Error::other("too many open files"));
      }
      self.listener.accept().await
    }
  }
}

async fn post(address: SocketAddr, body: &str) -> String {
  let mut stream = TcpStream::connect(address).await.unwrap();
  let request = format!(
    "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
    body.len()
  );
  stream.write_all(request.as_bytes()).await.unwrap();
  let mut response = String::new();
  stream.read_to_string(&mut response).await.unwrap();
  response
}

#[tokio::test]
async fn test_accept_forwards_to_destination() {
  let runtime = StreamRuntime::builder().build().unwrap();
  assert_eq!(
    runtime.ingress().accept(Bytes::from_static(b"hello")),
    StatusCode::ACCEPTED
  );
  let msg = runtime
    .output_destination()
    .receive(Duration::from_secs(1), "toStream")
    .await
    .unwrap();
  assert_eq!(msg.payload().as_ref(), b"hello");
}

#[tokio::test]
async fn test_serving_survives_accept_errors() {
  let runtime = StreamRuntime::builder().build().unwrap();
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  let acceptor = FlakyAcceptor {
    listener,
    failures: 2,
  };
  let shutdown = runtime.shutdown_token();
  let server = tokio::spawn(Arc::clone(runtime.ingress()).serve_with(acceptor, shutdown.clone()));

  let response = post(address, "still serving").await;
  assert!(response.starts_with("HTTP/1.1 202"), "unexpected response: {response}");
  let msg = runtime
    .output_destination()
    .receive(Duration::from_secs(1), "toStream")
    .await
    .unwrap();
  assert_eq!(msg.payload().as_ref(), b"still serving");

  shutdown.cancel();
  tokio::time::timeout(Duration::from_secs(1), server)
    .await
    .unwrap()
    .unwrap();
}
