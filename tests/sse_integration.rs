//! End-to-end tests for the SSE transports over a real HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use mcp_sdk::demo;
use mcp_sdk::mcp::engine::ProtocolOptions;
use mcp_sdk::mcp::protocol::ErrorCode;
use mcp_sdk::mcp::types::{Content, Implementation};
use mcp_sdk::mcp::{Client, ClientOptions, SseClientTransport, SseConfig, SseServer};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Running {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl Running {
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), self.task)
            .await
            .expect("server did not shut down");
        result.unwrap().unwrap();
    }
}

async fn start_server() -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = SseServer::new(SseConfig::default(), || {
        demo::build_server("sse-demo", None, ProtocolOptions::default())
    });

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(listener, async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        stop: Some(stop),
        task,
    }
}

async fn sse_client(addr: SocketAddr) -> Client {
    let transport = SseClientTransport::new(&format!("http://{addr}/sse")).unwrap();
    let client = Client::new(Implementation::new("sse-test", "1.0"), ClientOptions::default());
    client.connect(Arc::new(transport)).await.unwrap();
    client
}

/// Opens the event stream by hand and returns it with the announced POST path.
async fn open_raw_stream(addr: SocketAddr) -> (reqwest::Response, String) {
    let mut response = reqwest::Client::new()
        .get(format!("http://{addr}/sse"))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut buffer = String::new();
    while !buffer.contains("\n\n") {
        let chunk = response.chunk().await.unwrap().expect("stream ended early");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(buffer.starts_with("event: endpoint\n"));
    let endpoint = buffer
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap()
        .to_string();
    (response, endpoint)
}

#[tokio::test]
async fn test_tool_call_over_sse() {
    let running = start_server().await;
    let client = sse_client(running.addr).await;

    let result = client
        .call_tool("add", json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(result.content, vec![Content::text("5")]);

    let greeting = client.read_resource("greeting://Ada").await.unwrap();
    assert_eq!(greeting.contents[0].text.as_deref(), Some("Hello, Ada!"));

    let error = client.call_tool("nope", json!({})).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidParams);

    client.close().await.unwrap();
    running.shutdown().await;
}

#[tokio::test]
async fn test_endpoint_event_carries_session_id() {
    let running = start_server().await;
    let (_stream, endpoint) = open_raw_stream(running.addr).await;

    let session = endpoint
        .strip_prefix("/messages?sessionId=")
        .expect("endpoint should name the message path");
    let id = uuid::Uuid::parse_str(session).unwrap();
    assert_eq!(id.get_version_num(), 4);

    running.shutdown().await;
}

#[tokio::test]
async fn test_post_validation() {
    let running = start_server().await;
    let (_stream, endpoint) = open_raw_stream(running.addr).await;
    let http = reqwest::Client::new();
    let url = format!("http://{}{endpoint}", running.addr);

    let wrong_type = http
        .post(&url)
        .header("Content-Type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_type.status().as_u16(), 400);

    let malformed = http
        .post(&url)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status().as_u16(), 400);

    let accepted = http
        .post(&url)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 202);

    let unknown = http
        .post(format!(
            "http://{}/messages?sessionId=00000000-0000-4000-8000-000000000000",
            running.addr
        ))
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 404);

    running.shutdown().await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let running = start_server().await;
    let (_stream, endpoint) = open_raw_stream(running.addr).await;

    let body = format!(r#"{{"pad":"{}"}}"#, "x".repeat(4 * 1024 * 1024));
    let response = reqwest::Client::new()
        .post(format!("http://{}{endpoint}", running.addr))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);

    running.shutdown().await;
}

#[tokio::test]
async fn test_missing_endpoint_event_times_out() {
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use mcp_sdk::error::TransportError;
    use mcp_sdk::mcp::transport::TransportHandler;
    use mcp_sdk::mcp::Transport;
    use std::time::Duration;

    struct Ignore;

    #[async_trait::async_trait]
    impl TransportHandler for Ignore {
        async fn on_message(&self, _message: String) {}
        async fn on_close(&self) {}
        async fn on_error(&self, _error: &TransportError) {}
    }

    // Holds the stream open without ever announcing an endpoint.
    let router = axum::Router::new().route(
        "/sse",
        get(|| async {
            let silent = futures::stream::pending::<Result<String, std::convert::Infallible>>();
            ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(silent))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let transport = SseClientTransport::new(&format!("http://{addr}/sse"))
        .unwrap()
        .with_endpoint_timeout(Duration::from_millis(200));
    let outcome = tokio::time::timeout(Duration::from_secs(5), transport.start(Arc::new(Ignore)))
        .await
        .expect("start should give up on its own");
    assert!(matches!(outcome, Err(TransportError::EndpointTimeout(_))));

    server.abort();
}
