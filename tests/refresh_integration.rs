//! Integration tests for the HTTP refresh surface.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! mailbox and exercises the real REST contract with reqwest.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Json, Router, routing::post};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use inbox_triage::config::{ClassifierConfig, PipelineConfig};
use inbox_triage::error::{LlmError, MailboxError};
use inbox_triage::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use inbox_triage::llm::{LlmBackend, LlmConfig, create_provider};
use inbox_triage::mail::{Mailbox, RawMessage};
use inbox_triage::pipeline::{Classifier, Pipeline};
use inbox_triage::server::refresh_routes;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub LLM provider answering a fixed category (no real API calls).
struct StubLlm {
    answer: &'static str,
    calls: AtomicUsize,
}

impl StubLlm {
    fn new(answer: &'static str) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            content: self.answer.to_string(),
            input_tokens: 0,
            output_tokens: 1,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// In-memory mailbox: `count` plain-text messages with UIDs `1..=count`.
struct StubMailbox {
    count: u32,
    fail: bool,
    fetches: AtomicUsize,
}

impl StubMailbox {
    fn new(count: u32) -> Arc<Self> {
        Arc::new(Self {
            count,
            fail: false,
            fetches: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            count: 3,
            fail: true,
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Mailbox for StubMailbox {
    async fn fetch_recent_unseen(&self, limit: usize) -> Result<Vec<RawMessage>, MailboxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MailboxError::Auth {
                user: "me@example.com".into(),
                reason: "AUTHENTICATIONFAILED".into(),
            });
        }
        Ok((1..=self.count)
            .rev()
            .take(limit)
            .map(|uid| {
                let raw = format!(
                    "From: Sender {uid} <s{uid}@example.com>\r\n\
                     Subject: Message {uid}\r\n\
                     Content-Type: text/plain\r\n\r\n\
                     Line one of {uid}\r\nLine two"
                );
                RawMessage::new(uid, raw.into_bytes())
            })
            .collect())
    }
}

fn classifier(llm: Arc<dyn LlmProvider>) -> Arc<Classifier> {
    let config = ClassifierConfig {
        timeout: Duration::from_secs(2),
    };
    Arc::new(Classifier::new(llm, &config))
}

/// Serve `app` on a random local port and return the port.
async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    port
}

/// Start the refresh server over the given mailbox and LLM.
async fn start_server(mailbox: Arc<StubMailbox>, llm: Arc<dyn LlmProvider>) -> u16 {
    let config = PipelineConfig::default();
    let pipeline = Arc::new(Pipeline::new(mailbox, classifier(llm), &config));
    serve(refresh_routes(pipeline, &config)).await
}

// ── Health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(StubMailbox::new(0), Arc::new(StubLlm::new("PERSONAL"))).await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["status"], "ok");
    })
    .await
    .expect("test timed out");
}

// ── Refresh ──────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_uses_default_limit() {
    timeout(TEST_TIMEOUT, async {
        let llm = Arc::new(StubLlm::new("urgent"));
        let port = start_server(StubMailbox::new(7), llm.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["total"], 5);
        assert_eq!(json["urgent_count"], 5);
        assert_eq!(json["promotion_count"], 0);
        let uids: Vec<u64> = json["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uid"].as_u64().unwrap())
            .collect();
        assert_eq!(uids, vec![7, 6, 5, 4, 3]);

        let first = &json["results"][0];
        assert_eq!(first["category"], "URGENT");
        assert_eq!(first["email"]["sender"], "Sender 7 <s7@example.com>");
        assert_eq!(first["email"]["subject"], "Message 7");
        assert_eq!(first["cleaned_body"], "Line one of 7 Line two");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 5);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn refresh_honours_limit_param() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(StubMailbox::new(7), Arc::new(StubLlm::new("PROMOTION"))).await;

        let json: Value = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh?limit=2"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["promotion_count"], 2);
        assert_eq!(json["category_counts"]["PROMOTION"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn get_does_not_refresh() {
    timeout(TEST_TIMEOUT, async {
        let mailbox = StubMailbox::new(3);
        let llm = Arc::new(StubLlm::new("URGENT"));
        let port = start_server(mailbox.clone(), llm.clone()).await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/refresh"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 405);

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/snapshot"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        assert_eq!(mailbox.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn limit_above_maximum_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let mailbox = StubMailbox::new(3);
        let port = start_server(mailbox.clone(), Arc::new(StubLlm::new("URGENT"))).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh?limit=100000"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let json: Value = resp.json().await.unwrap();
        assert!(json["error"].as_str().unwrap().contains("exceeds maximum 50"));
        assert_eq!(mailbox.fetches.load(Ordering::SeqCst), 0);

        // The cap itself is still accepted.
        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh?limit=50"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(mailbox.fetches.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_mailbox_is_empty_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let llm = Arc::new(StubLlm::new("BILL"));
        let port = start_server(StubMailbox::new(0), llm.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["results"].as_array().unwrap().is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn mailbox_failure_is_bad_gateway() {
    timeout(TEST_TIMEOUT, async {
        let llm = Arc::new(StubLlm::new("BILL"));
        let port = start_server(StubMailbox::failing(), llm.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let json: Value = resp.json().await.unwrap();
        assert!(json["error"].as_str().unwrap().contains("AUTHENTICATIONFAILED"));
        assert!(json.get("total").is_none());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    })
    .await
    .expect("test timed out");
}

// ── Ollama backend end to end ────────────────────────────────────────

/// Fake Ollama `/api/chat`: answers with the last word of the subject line.
async fn fake_ollama_chat(Json(body): Json<Value>) -> Json<Value> {
    let user = body["messages"][1]["content"].as_str().unwrap_or_default();
    let subject = user.lines().next().unwrap_or_default();
    let answer = match subject.rsplit(' ').next() {
        Some("1") => "bill",
        Some("2") => " Social\n",
        _ => "I think this is URGENT",
    };
    Json(serde_json::json!({
        "model": body["model"],
        "message": {"role": "assistant", "content": answer},
        "done": true,
        "done_reason": "stop",
    }))
}

#[tokio::test]
async fn ollama_backend_classifies_through_http() {
    timeout(TEST_TIMEOUT, async {
        let ollama_port = serve(Router::new().route("/api/chat", post(fake_ollama_chat))).await;

        let llm = create_provider(&LlmConfig {
            backend: LlmBackend::Ollama,
            base_url: format!("http://127.0.0.1:{ollama_port}"),
            api_key: None,
            model: "llama3".into(),
        });
        let port = start_server(StubMailbox::new(3), llm).await;

        let json: Value = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/refresh"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let categories: Vec<&str> = json["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["category"].as_str().unwrap())
            .collect();
        // Message 3's answer is not a bare token, so it is tagged ERROR.
        assert_eq!(categories, vec!["ERROR", "SOCIAL", "BILL"]);
        assert_eq!(json["urgent_count"], 0);
        assert_eq!(json["category_counts"]["ERROR"], 1);
    })
    .await
    .expect("test timed out");
}
