#![allow(dead_code)]

pub mod memory_store;
pub mod scripted;

use std::sync::Arc;

use storecheck::transport::Transport;
use storecheck::{CallerContext, Connection, ConnectionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub use memory_store::MemoryStore;
pub use scripted::ScriptedTransport;

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("storecheck", "conformance").access_token("test-token")
}

/// Connection backed by an in-process transport.
pub fn connect(transport: Arc<dyn Transport>) -> Connection {
    Connection::with_transport(test_config(), transport)
}

pub fn test_caller() -> CallerContext {
    CallerContext::new("tests").user_id("tester")
}

/// Accepts one HTTP request, answers it with `status` and returns the
/// request head and body.
pub async fn http_once(listener: TcpListener, status: &'static str) -> (String, Vec<u8>) {
    let (stream, _) = listener.accept().await.unwrap();
    answer_http(stream, status).await
}

/// Object store stand-in that accepts every upload. Returns its base URL.
pub async fn object_store() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(answer_http(stream, "200 OK"));
        }
    });
    format!("http://{}/objects", addr)
}

async fn answer_http(mut stream: TcpStream, status: &'static str) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up mid body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let reply = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
    stream.write_all(reply.as_bytes()).await.unwrap();
    (head, buf[head_end..head_end + length].to_vec())
}
