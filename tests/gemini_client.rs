use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use gemini_chat::conversation::{Author, APOLOGY};
use gemini_chat::gemini::CREDENTIAL_KEY;
use gemini_chat::{
    CompletionError, Conversation, FileStore, GeminiClient, KeyValueStore, MemoryStore,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    body: String,
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    request_line: String,
    body: Value,
}

/// Minimal HTTP/1.1 server answering each connection with the next script.
struct ScriptedServer {
    url: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let url = format!("http://{addr}/v1beta/models/gemini-pro:generateContent");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let requests = Arc::clone(&requests);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, requests).await;
                    });
                }
            }
        });

        Self {
            url,
            request_count,
            requests,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let read = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let read = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        buffer.extend_from_slice(&chunk[..read]);
    }

    let body_end = (body_start + content_length).min(buffer.len());
    let body = serde_json::from_slice(&buffer[body_start..body_end]).unwrap_or(Value::Null);
    requests.lock().unwrap().push(RecordedRequest {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body,
    });

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    let script = scripts
        .get(index)
        .or_else(|| scripts.last())
        .cloned()
        .unwrap_or(ScriptedResponse {
            status: 500,
            body: String::new(),
        });

    let response = format!(
        "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        script.status,
        script.body.len(),
        script.body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn respond(status: u16, body: Value) -> ScriptedResponse {
    ScriptedResponse {
        status,
        body: body.to_string(),
    }
}

fn client_with_key(url: &str, key: Option<&str>) -> GeminiClient {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut client = GeminiClient::with_endpoint(url, store).expect("client");
    if let Some(key) = key {
        client.set_credential(key).expect("set key");
    }
    client
}

#[tokio::test]
async fn generate_returns_first_candidate_text() {
    let server = ScriptedServer::new(vec![respond(
        200,
        json!({ "candidates": [{ "content": { "parts": [{ "text": "Hi there" }] } }] }),
    )])
    .await;
    let client = client_with_key(&server.url, Some("secret-key"));

    let reply = client.generate("hello").await.expect("reply");

    assert_eq!(reply, "Hi there");
    assert_eq!(server.request_count(), 1);

    let request = &server.requests()[0];
    assert!(request.request_line.starts_with("POST /v1beta/models/gemini-pro:generateContent?key=secret-key "));
    assert_eq!(request.body["contents"][0]["parts"][0]["text"], json!("hello"));
    assert_eq!(request.body["safetySettings"].as_array().map(Vec::len), Some(4));
    assert!(request.body["generationConfig"].is_object());

    server.shutdown();
}

#[tokio::test]
async fn rate_limit_surfaces_provider_message() {
    let server = ScriptedServer::new(vec![respond(
        429,
        json!({ "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" } }),
    )])
    .await;
    let client = client_with_key(&server.url, Some("k"));

    let err = client.generate("hello").await.unwrap_err();

    match err {
        CompletionError::Api { status, message } => {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(message, "Resource has been exhausted");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert_eq!(server.request_count(), 1);

    server.shutdown();
}

#[tokio::test]
async fn unparseable_error_body_falls_back_to_status_code() {
    let server = ScriptedServer::new(vec![ScriptedResponse {
        status: 502,
        body: "<html>bad gateway</html>".to_string(),
    }])
    .await;
    let client = client_with_key(&server.url, Some("k"));

    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(
        err,
        CompletionError::Api { ref message, .. } if message == "HTTP 502"
    ));

    server.shutdown();
}

#[tokio::test]
async fn empty_candidates_is_empty_response() {
    let server = ScriptedServer::new(vec![respond(200, json!({ "candidates": [] }))]).await;
    let client = client_with_key(&server.url, Some("k"));

    assert!(matches!(
        client.generate("hello").await,
        Err(CompletionError::EmptyResponse)
    ));

    server.shutdown();
}

#[tokio::test]
async fn missing_credential_issues_no_request() {
    let server = ScriptedServer::new(vec![respond(200, json!({}))]).await;
    let client = client_with_key(&server.url, None);

    assert!(matches!(
        client.generate("hello").await,
        Err(CompletionError::MissingCredential)
    ));
    assert_eq!(server.request_count(), 0);

    server.shutdown();
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_with_key(&format!("http://{addr}/generate"), Some("super-secret"));

    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, CompletionError::Transport(_)));
    assert!(!err.to_string().contains("super-secret"));
}

#[tokio::test]
async fn each_call_is_exactly_one_request() {
    let server = ScriptedServer::new(vec![
        respond(503, json!({ "error": { "message": "overloaded" } })),
        respond(200, json!({ "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }] })),
    ])
    .await;
    let client = client_with_key(&server.url, Some("k"));

    assert!(client.generate("first").await.is_err());
    assert_eq!(server.request_count(), 1);

    assert_eq!(client.generate("second").await.unwrap(), "ok");
    assert_eq!(server.request_count(), 2);

    server.shutdown();
}

#[tokio::test]
async fn conversation_turn_over_http_records_apology_on_failure() {
    let server = ScriptedServer::new(vec![
        respond(200, json!({ "candidates": [{ "content": { "parts": [{ "text": "Hi there" }] } }] })),
        respond(429, json!({ "error": { "message": "slow down" } })),
    ])
    .await;
    let client = client_with_key(&server.url, Some("k"));
    let mut conversation = Conversation::new();

    conversation.submit(&client, "hello").await.unwrap();
    assert!(conversation.submit(&client, "again").await.is_err());

    let messages = conversation.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].text(), "Hi there");
    assert_eq!(messages[3].author(), Author::Assistant);
    assert_eq!(messages[3].text(), APOLOGY);
    assert!(!conversation.is_pending());

    server.shutdown();
}

#[test]
fn credential_survives_store_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
        let mut client = GeminiClient::with_endpoint("http://localhost", store).unwrap();
        client.set_credential("abc").unwrap();
        assert_eq!(client.credential(), Some("abc"));
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("abc"));
    let client = GeminiClient::with_endpoint("http://localhost", store).unwrap();
    assert_eq!(client.credential(), Some("abc"));
}
