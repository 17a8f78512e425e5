//! Integration tests for HttpClient against a throwaway local server.

use pulse_host_http::{HttpClient, HttpConfig, HttpError, ResponseMode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve exactly one request with the given status and body.
///
/// Returns the base url and a receiver yielding the raw request text.
async fn serve_once(status: u16, body: &'static str) -> (String, oneshot::Receiver<String>) {
  let listener = TcpListener::bind("127.0.0.1:0")
    .await
    .expect("failed to bind listener");
  let addr = listener.local_addr().expect("no local addr");
  let (tx, rx) = oneshot::channel();

  tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.expect("accept failed");
    let raw = read_request(&mut socket).await;
    let _ = tx.send(raw);

    let response = format!(
      "HTTP/1.1 {} Status\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{}",
      status,
      body.len(),
      body
    );
    socket
      .write_all(response.as_bytes())
      .await
      .expect("write failed");
    let _ = socket.shutdown().await;
  });

  (format!("http://{}", addr), rx)
}

/// Read one full request: headers plus `Content-Length` bytes of body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
  let mut data = Vec::new();
  let mut buffer = [0u8; 4096];
  loop {
    let read = socket.read(&mut buffer).await.expect("read failed");
    if read == 0 {
      break;
    }
    data.extend_from_slice(&buffer[..read]);

    let text = String::from_utf8_lossy(&data).to_string();
    if let Some(end) = text.find("\r\n\r\n") {
      let content_length = text[..end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
      if data.len() >= end + 4 + content_length {
        break;
      }
    }
  }
  String::from_utf8_lossy(&data).to_string()
}

fn client() -> HttpClient {
  HttpClient::new(&HttpConfig::default()).expect("failed to build client")
}

#[tokio::test]
async fn test_get_returns_body() {
  let (url, _) = serve_once(200, "{\"value\":42}").await;

  let body = client()
    .get(&url, None, ResponseMode::Body)
    .await
    .expect("request failed");

  assert_eq!(body, "{\"value\":42}");
}

#[tokio::test]
async fn test_get_injects_header() {
  let (url, request) = serve_once(200, "ok").await;

  client()
    .get(&url, Some(("X-Api-Key", "abc123")), ResponseMode::Body)
    .await
    .expect("request failed");

  let raw = request.await.expect("no request captured").to_ascii_lowercase();
  assert!(raw.starts_with("get / "));
  assert!(raw.contains("x-api-key: abc123"));
}

#[tokio::test]
async fn test_server_error_maps_to_remote() {
  let (url, _) = serve_once(503, "down for maintenance").await;

  let error = client()
    .get(&url, None, ResponseMode::Body)
    .await
    .expect_err("expected an error");

  match error {
    HttpError::Remote { status, body } => {
      assert_eq!(status, 503);
      assert_eq!(body, "down for maintenance");
    }
    other => panic!("unexpected error: {:?}", other),
  }
}

#[tokio::test]
async fn test_client_error_carries_body() {
  let (url, _) = serve_once(404, "no such widget").await;

  let error = client()
    .get(&url, None, ResponseMode::Body)
    .await
    .expect_err("expected an error");

  assert!(matches!(error, HttpError::Request { status: 404, ref body } if body == "no such widget"));
  assert!(!error.is_transient());
}

#[tokio::test]
async fn test_status_only_never_fails_on_status() {
  let (url, _) = serve_once(500, "boom").await;

  let status = client()
    .get(&url, None, ResponseMode::StatusOnly)
    .await
    .expect("status-only request failed");

  assert_eq!(status, "500");
}

#[tokio::test]
async fn test_post_sends_json_body() {
  let (url, request) = serve_once(201, "created").await;

  let body = client()
    .post(&url, "{\"name\":\"pulse\"}", None, ResponseMode::Body)
    .await
    .expect("request failed");
  assert_eq!(body, "created");

  let raw = request.await.expect("no request captured");
  assert!(raw.starts_with("POST / "));
  assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
  assert!(raw.ends_with("{\"name\":\"pulse\"}"));
}

#[tokio::test]
async fn test_head_returns_status_code() {
  let (url, request) = serve_once(204, "").await;

  let status = client().head(&url, None).await.expect("request failed");

  assert_eq!(status, "204");
  assert!(request.await.expect("no request captured").starts_with("HEAD / "));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
  // Bind then drop to get a port nobody listens on.
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
  let addr = listener.local_addr().expect("no local addr");
  drop(listener);

  let error = client()
    .get(&format!("http://{}", addr), None, ResponseMode::Body)
    .await
    .expect_err("expected an error");

  assert!(error.is_transient());
}
