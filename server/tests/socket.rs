mod common;

use std::sync::Arc;

use common::{image, Harness, MemoryBackend};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use wharf_server::protocol::{read_message, write_message, Reply, Request, ERROR_INVALID_PARAMETER};
use wharf_server::server::serve_listener;

const ALPINE: &str = "docker.io/library/alpine:latest";

struct Client {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, request: &Request) {
        write_message(&mut self.writer, request).await.unwrap();
    }

    async fn next(&mut self) -> Reply {
        read_message(&mut self.reader).await.unwrap().unwrap()
    }

    /// Read replies up to and including the terminal one.
    async fn until_terminal(&mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        loop {
            let reply = self.next().await;
            let done = reply.is_terminal();
            replies.push(reply);
            if done {
                return replies;
            }
        }
    }
}

async fn start() -> (TempDir, Client) {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("wharf.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    let harness = Harness::new(MemoryBackend::with_images(vec![image("a1", &[ALPINE])]));
    tokio::spawn(serve_listener(listener, Arc::new(harness.service)));

    let stream = UnixStream::connect(&socket).await.unwrap();
    let (read_half, writer) = stream.into_split();
    let client = Client {
        reader: BufReader::new(read_half),
        writer,
    };
    (dir, client)
}

fn request(method: &str, parameters: serde_json::Value) -> Request {
    Request::new(format!("io.wharf.{}", method), parameters)
}

#[tokio::test]
async fn test_list_images_over_socket() {
    let (_dir, mut client) = start().await;
    client.send(&request("ListImages", json!(null))).await;
    let reply = client.next().await;
    assert!(reply.is_terminal());
    assert_eq!(reply.parameters["images"][0]["id"], "a1");
}

#[tokio::test]
async fn test_streaming_push_over_socket() {
    let (_dir, mut client) = start().await;
    let mut push = request("PushImage", json!({"name": ALPINE}));
    push.more = true;
    client.send(&push).await;

    let replies = client.until_terminal().await;
    let (last, partials) = replies.split_last().unwrap();
    assert!(partials.iter().all(|r| r.continues && r.error.is_none()));
    assert_eq!(last.parameters["reply"]["id"], "a1");

    let logs: String = replies
        .iter()
        .flat_map(|r| r.parameters["reply"]["logs"].as_array().cloned().unwrap_or_default())
        .map(|l| l.as_str().unwrap().to_string())
        .collect();
    assert_eq!(logs, "Copying blob 0\nCopying blob 1\nCopying blob 2\n");

    // The connection keeps serving calls after a streaming one.
    client.send(&request("ImageExists", json!({"name": ALPINE}))).await;
    assert_eq!(client.next().await.parameters["exists"], 0);
}

#[tokio::test]
async fn test_oneway_and_get_info() {
    let (_dir, mut client) = start().await;
    let mut tag = request("TagImage", json!({"name": ALPINE, "tagged": "docker.io/library/base:1"}));
    tag.oneway = true;
    client.send(&tag).await;
    client
        .send(&Request::new("org.varlink.service.GetInfo", json!(null)))
        .await;

    let reply = client.next().await;
    assert_eq!(reply.parameters["product"], "wharfd");

    client
        .send(&request("ImageExists", json!({"name": "docker.io/library/base:1"})))
        .await;
    assert_eq!(client.next().await.parameters["exists"], 0);
}

#[tokio::test]
async fn test_malformed_message_keeps_connection() {
    let (_dir, mut client) = start().await;
    client.writer.write_all(b"{not json\0").await.unwrap();
    let reply = client.next().await;
    assert_eq!(reply.error.as_deref(), Some(ERROR_INVALID_PARAMETER));

    client.send(&request("ImagesPrune", json!({}))).await;
    let reply = client.next().await;
    assert!(reply.error.is_none());
    assert_eq!(reply.parameters["pruned"], json!([]));
}
