//! HTTP-level tests for `ComfyUIApi` against a canned local server.
//!
//! The server answers each connection with one scripted response and
//! `Connection: close`, recording the request line and body.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use ltxv_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use ltxv_comfyui::engine::ComfyUIEngine;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    request_line: String,
    body: String,
}

/// Serve `responses` in order, one per connection.
async fn canned_server(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = recorded.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            sink.lock().unwrap().push(request);

            let reply = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}"), recorded)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Recorded {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Recorded {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    }
}

fn api(url: &str) -> ComfyUIApi {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    ComfyUIApi::with_client(client, url)
}

// ---- Test: submission ----

#[tokio::test]
async fn submit_posts_prompt_with_client_id() {
    let (url, recorded) =
        canned_server(vec![(200, json!({ "prompt_id": "p-1", "number": 3 }).to_string())]).await;
    let api = api(&url);

    let response = api
        .submit_workflow(&json!({ "98": { "class_type": "LoadImage", "inputs": {} } }))
        .await
        .unwrap();
    assert_eq!(response.prompt_id, "p-1");
    assert_eq!(response.number, Some(3));

    let req = recorded.lock().unwrap()[0].clone();
    assert_eq!(req.request_line, "POST /prompt HTTP/1.1");
    let body: Value = serde_json::from_str(&req.body).unwrap();
    assert_eq!(body["prompt"]["98"]["class_type"], "LoadImage");
    assert_eq!(body["client_id"], api.client_id());
}

#[tokio::test]
async fn submit_rejected_workflow_is_api_error() {
    let (url, _) = canned_server(vec![(
        400,
        json!({ "error": { "type": "prompt_outputs_failed_validation" }, "node_errors": {} })
            .to_string(),
    )])
    .await;

    let err = api(&url).submit_workflow(&json!({})).await.unwrap_err();
    assert_matches!(
        err,
        ComfyUIApiError::ApiError { status: 400, body } if body.contains("node_errors")
    );
}

#[tokio::test]
async fn submit_without_prompt_id_is_protocol_error() {
    let (url, _) = canned_server(vec![(200, json!({ "number": 1 }).to_string())]).await;
    assert_matches!(
        api(&url).submit_workflow(&json!({})).await,
        Err(ComfyUIApiError::MissingPromptId { .. })
    );
}

// ---- Test: readiness, history and cancellation endpoints ----

#[tokio::test]
async fn history_and_control_endpoints() {
    let (url, recorded) = canned_server(vec![
        (200, json!({ "system": { "os": "posix" } }).to_string()),
        (200, json!({ "p-9": { "outputs": {} } }).to_string()),
        (200, "{}".to_string()),
        (200, "{}".to_string()),
    ])
    .await;
    let api = api(&url);

    api.check_ready().await.unwrap();
    let history = api.get_history("p-9").await.unwrap();
    assert!(history.get("p-9").is_some());
    api.cancel_execution("p-9").await.unwrap();
    api.interrupt().await.unwrap();

    let reqs = recorded.lock().unwrap().clone();
    assert_eq!(reqs[0].request_line, "GET /system_stats HTTP/1.1");
    assert_eq!(reqs[1].request_line, "GET /history/p-9 HTTP/1.1");
    assert_eq!(reqs[2].request_line, "POST /queue HTTP/1.1");
    assert_eq!(
        serde_json::from_str::<Value>(&reqs[2].body).unwrap(),
        json!({ "delete": ["p-9"] })
    );
    assert_eq!(reqs[3].request_line, "POST /interrupt HTTP/1.1");
}

#[tokio::test]
async fn readiness_probe_fails_on_server_error() {
    let (url, _) = canned_server(vec![(503, "\"loading\"".to_string())]).await;
    assert_matches!(
        api(&url).check_ready().await,
        Err(ComfyUIApiError::ApiError { status: 503, .. })
    );
}
