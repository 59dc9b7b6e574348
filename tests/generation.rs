use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deck_augment::config::GenerationConfig;
use deck_augment::error::AugmentError;
use deck_augment::generate::{GeminiGenerator, GenerationClient, OpenAIGenerator, TextGenerator};
use deck_augment::template::PromptTemplate;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_PATH: &str = "/v1beta/models/gemini-3-flash-preview:generateContent";

fn gemini_config(server: &MockServer) -> GenerationConfig {
    GenerationConfig {
        base_url: Some(server.uri()),
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        timeout_secs: 5,
        ..Default::default()
    }
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn gemini_retries_rate_limit_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "role": "user", "parts": [{ "text": "Explain chat" }] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("A *cat*.")))
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&gemini_config(&server), "test-key".into()).unwrap();
    let text = generator.complete("Explain chat").await.unwrap();

    assert_eq!(text, "A *cat*.");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn gemini_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
        .expect(1)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&gemini_config(&server), "bad".into()).unwrap();
    let err = generator.complete("hello").await.unwrap_err();

    match err {
        AugmentError::GenerationService { reason, attempts } => {
            assert_eq!(attempts, 1);
            assert!(reason.contains("400"), "{reason}");
            assert!(reason.contains("API key not valid"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn gemini_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&gemini_config(&server), "test-key".into()).unwrap();
    let err = generator.complete("hello").await.unwrap_err();

    assert!(!err.is_fatal());
    assert_eq!(
        err.to_string(),
        "generation failed after 3 attempt(s): HTTP 503 Service Unavailable: overloaded"
    );
}

#[tokio::test]
async fn gemini_timeouts_are_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_reply("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = GenerationConfig {
        timeout_secs: 1,
        ..gemini_config(&server)
    };
    let generator = GeminiGenerator::new(&config, "test-key".into()).unwrap();
    let err = generator.complete("hello").await.unwrap_err();

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert!(!err.is_fatal());
    assert_eq!(err.class(), "generation-service");
    match err {
        AugmentError::GenerationService { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
}

/// Read one HTTP request off the socket: headers, then `Content-Length` bytes.
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

#[tokio::test]
async fn gemini_body_stall_is_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let nth = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                read_request(&mut stream).await;
                if nth == 0 {
                    // Headers and a fragment of the body, then nothing.
                    let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"candidates\"";
                    stream.write_all(head.as_bytes()).await.unwrap();
                    stream.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                } else {
                    let body = gemini_reply("recovered").to_string();
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    stream.write_all(reply.as_bytes()).await.unwrap();
                    stream.shutdown().await.ok();
                }
            });
        }
    });

    let config = GenerationConfig {
        base_url: Some(format!("http://{}", addr)),
        max_retries: 1,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        timeout_secs: 1,
        ..Default::default()
    };
    let generator = GeminiGenerator::new(&config, "test-key".into()).unwrap();
    let text = generator.complete("hello").await.unwrap();

    assert_eq!(text, "recovered");
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn gemini_empty_reply_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "SAFETY" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&gemini_config(&server), "test-key".into()).unwrap();
    let err = generator.complete("hello").await.unwrap_err();
    assert_eq!(err.class(), "generation-service");
    assert!(err.to_string().contains("SAFETY"));
}

#[tokio::test]
async fn openai_compatible_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "- un\n- deux" } }]
        })))
        .mount(&server)
        .await;

    let config = GenerationConfig {
        provider: "openai".into(),
        model: Some("gpt-4o-mini".into()),
        base_url: Some(server.uri()),
        max_retries: 0,
        ..Default::default()
    };
    let client = GenerationClient::new(Arc::new(
        OpenAIGenerator::new(&config, "sk-test".into()).unwrap(),
    ));
    assert_eq!(client.model_name(), "gpt-4o-mini");

    let template = PromptTemplate::parse("List {Text}");
    let inputs = HashMap::from([("Text".to_string(), "numbers".to_string())]);
    let html = client.generate(&template, &inputs).await.unwrap();

    assert_eq!(html, "<ul>\n<li>un</li>\n<li>deux</li>\n</ul>");
}

#[tokio::test]
async fn client_converts_gemini_markdown_to_html() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gemini_reply("\n**Bold** explanation.\n")),
        )
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&gemini_config(&server), "test-key".into()).unwrap();
    let client = GenerationClient::new(Arc::new(generator));
    let template = PromptTemplate::parse("Analyze: {Text}");
    let inputs = HashMap::from([("Text".to_string(), "Bonjour".to_string())]);

    let html = client.generate(&template, &inputs).await.unwrap();
    assert_eq!(html, "<p><strong>Bold</strong> explanation.</p>");
}
