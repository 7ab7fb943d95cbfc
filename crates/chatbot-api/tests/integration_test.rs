use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chatbot_api::{
    build_router,
    config::Config,
    generation::{GenerationRequest, ReplyGenerator, ReplyStream, FALLBACK_RESPONSES},
    state::AppState,
    streaming::ChainResponse,
};
use chatbot_persist::{LocalThreadCache, SqlThreadDatastore, ThreadCache, ThreadManager};
use serde_json::{json, Value};
use sqlx::any::AnyPoolOptions;
use tower::ServiceExt;

/// Replays a fixed reply and records what it was asked.
#[derive(Default)]
struct ScriptedGenerator {
    reply: Vec<&'static str>,
    fail_outright: bool,
    requests: Mutex<Vec<GenerationRequest>>,
    forgotten: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn replying(reply: Vec<&'static str>) -> Self {
        Self {
            reply,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail_outright: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<ReplyStream> {
        self.requests.lock().unwrap().push(request);
        if self.fail_outright {
            anyhow::bail!("model unavailable");
        }
        let fragments: Vec<anyhow::Result<String>> =
            self.reply.iter().map(|s| Ok(s.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    async fn forget_thread(&self, thread_id: &str) -> anyhow::Result<()> {
        self.forgotten.lock().unwrap().push(thread_id.to_string());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    cache: Arc<LocalThreadCache>,
    generator: Arc<ScriptedGenerator>,
}

async fn test_app(generator: ScriptedGenerator) -> TestApp {
    let options = AnyPoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None);
    let datastore = SqlThreadDatastore::connect_with("sqlite::memory:", options)
        .await
        .unwrap();
    datastore.init_schema().await.unwrap();

    let cache = Arc::new(LocalThreadCache::new());
    let generator = Arc::new(generator);
    let manager = ThreadManager::new(cache.clone(), Arc::new(datastore));
    let state = Arc::new(AppState::new(Config::default(), manager, generator.clone()));

    TestApp {
        router: build_router(state),
        cache,
        generator,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn sse_chunks(body: &[u8]) -> Vec<ChainResponse> {
    std::str::from_utf8(body)
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn streamed_text(chunks: &[ChainResponse]) -> String {
    chunks
        .iter()
        .filter(|c| !c.is_done())
        .map(|c| c.choices[0].message.content.as_str())
        .collect()
}

async fn create_thread(router: &Router, user_id: &str) -> String {
    let (status, body) = send_json(router, "POST", "/threads", Some(json!({ "user_id": user_id }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["thread_id"].as_str().unwrap().to_string()
}

fn prompt(text: &str) -> Value {
    json!({
        "user_id": "alice",
        "messages": [
            { "role": "system", "content": "ignored" },
            { "role": "user", "content": text }
        ]
    })
}

#[tokio::test]
async fn test_health_reports_backends() {
    let app = test_app(ScriptedGenerator::default()).await;
    let (status, body) = send_json(&app.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["cache"], "inmemory");
    assert_eq!(body["services"]["datastore"], "connected");
}

#[tokio::test]
async fn test_create_then_get_empty_thread() {
    let app = test_app(ScriptedGenerator::default()).await;
    let thread_id = create_thread(&app.router, "alice").await;

    let (status, body) = send_json(&app.router, "GET", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thread_id"], thread_id.as_str());
    assert_eq!(body["user_id"], "alice");
    assert_eq!(body["conversation_history"], json!([]));
    assert_eq!(body["start_conversation_time"], body["last_conversation_time"]);
}

#[tokio::test]
async fn test_unknown_thread_is_404() {
    let app = test_app(ScriptedGenerator::replying(vec!["hi"])).await;

    let (status, body) = send_json(&app.router, "GET", "/threads/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let (status, _) = send_json(&app.router, "GET", "/threads/nope/messages", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, "POST", "/threads/nope/generate", Some(prompt("hello"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.generator.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_generate_streams_and_records_exchange() {
    let app = test_app(ScriptedGenerator::replying(vec!["Hello", ", ", "world"])).await;
    let thread_id = create_thread(&app.router, "alice").await;

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/threads/{thread_id}/generate"),
        Some(prompt("<b>Hi</b> there ~ friend™")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let chunks = sse_chunks(&body);
    assert_eq!(streamed_text(&chunks), "Hello, world");
    assert!(chunks.last().unwrap().is_done());
    assert!(chunks.iter().all(|c| c.thread_id == thread_id && c.id == chunks[0].id));

    let requests = app.generator.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "Hi there - friend");
    assert!(requests[0].history.is_empty());

    let (_, messages) = send_json(&app.router, "GET", &format!("/threads/{thread_id}/messages"), None).await;
    let messages = messages["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hi there - friend");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello, world");
}

#[tokio::test]
async fn test_stored_prompt_matches_generated_prompt() {
    let app = test_app(ScriptedGenerator::replying(vec!["sure"])).await;
    let thread_id = create_thread(&app.router, "alice").await;

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/threads/{thread_id}/generate"),
        Some(prompt("<<b>b>hi 1 < 2")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let requests = app.generator.requests.lock().unwrap().clone();
    assert_eq!(requests[0].prompt, "hi 1 < 2");

    let (_, messages) = send_json(&app.router, "GET", &format!("/threads/{thread_id}/messages"), None).await;
    assert_eq!(messages["messages"][0]["content"], requests[0].prompt.as_str());
}

#[tokio::test]
async fn test_second_round_sees_history() {
    let app = test_app(ScriptedGenerator::replying(vec!["ok"])).await;
    let thread_id = create_thread(&app.router, "alice").await;
    let uri = format!("/threads/{thread_id}/generate");

    send(&app.router, "POST", &uri, Some(prompt("first"))).await;
    send(&app.router, "POST", &uri, Some(prompt("second"))).await;

    let requests = app.generator.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    let history: Vec<&str> = requests[1].history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(history, vec!["first", "ok"]);

    let (_, thread) = send_json(&app.router, "GET", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(thread["conversation_history"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_failed_generation_streams_fallback_and_records_nothing() {
    let app = test_app(ScriptedGenerator::failing()).await;
    let thread_id = create_thread(&app.router, "alice").await;

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/threads/{thread_id}/generate"),
        Some(prompt("hello")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let chunks = sse_chunks(&body);
    assert!(chunks.last().unwrap().is_done());
    let text = streamed_text(&chunks);
    assert!(FALLBACK_RESPONSES.contains(&text.trim_end()));

    let (_, messages) = send_json(&app.router, "GET", &format!("/threads/{thread_id}/messages"), None).await;
    assert_eq!(messages["messages"], json!([]));
}

#[tokio::test]
async fn test_generate_rejects_prompt_without_user_text() {
    let app = test_app(ScriptedGenerator::replying(vec!["x"])).await;
    let thread_id = create_thread(&app.router, "alice").await;
    let uri = format!("/threads/{thread_id}/generate");

    let no_user = json!({ "messages": [{ "role": "assistant", "content": "hi" }] });
    let (status, _) = send(&app.router, "POST", &uri, Some(no_user)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, "POST", &uri, Some(prompt("<p></p>"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_role = json!({ "messages": [{ "role": "wizard", "content": "hi" }] });
    let (status, _) = send(&app.router, "POST", &uri, Some(bad_role)).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_feedback_flow() {
    let app = test_app(ScriptedGenerator::replying(vec!["answer"])).await;
    let thread_id = create_thread(&app.router, "alice").await;
    let uri = format!("/threads/{thread_id}/feedback");

    let (status, _) = send_json(&app.router, "POST", &uri, Some(json!({ "feedback": 1.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(&app.router, "POST", &format!("/threads/{thread_id}/generate"), Some(prompt("q"))).await;

    let (status, _) = send_json(&app.router, "POST", &uri, Some(json!({ "feedback": 1.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&app.router, "POST", &uri, Some(json!({ "feedback": -0.25 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, messages) = send_json(&app.router, "GET", &format!("/threads/{thread_id}/messages"), None).await;
    assert!(messages["messages"][0].get("feedback").is_none());
    assert_eq!(messages["messages"][1]["feedback"], -0.25);

    let (status, _) = send_json(&app.router, "POST", &uri, Some(json!({ "feedback": 2.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app.router, "POST", "/threads/nope/feedback", Some(json!({ "feedback": 0.5 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_removes_thread_and_generation_state() {
    let app = test_app(ScriptedGenerator::replying(vec!["bye"])).await;
    let thread_id = create_thread(&app.router, "alice").await;

    let (status, body) = send_json(&app.router, "DELETE", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Thread info deleted");
    assert_eq!(*app.generator.forgotten.lock().unwrap(), vec![thread_id.clone()]);

    let (status, _) = send_json(&app.router, "GET", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send_json(&app.router, "DELETE", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(body["message"], "Thread info not found");
}

#[tokio::test]
async fn test_evicted_thread_is_served_from_datastore() {
    let app = test_app(ScriptedGenerator::replying(vec!["stored"])).await;
    let thread_id = create_thread(&app.router, "alice").await;
    send(&app.router, "POST", &format!("/threads/{thread_id}/generate"), Some(prompt("q"))).await;

    app.cache.delete_thread(&thread_id).await;

    let (status, body) = send_json(&app.router, "GET", &format!("/threads/{thread_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversation_history"].as_array().unwrap().len(), 2);
    assert!(app.cache.is_thread(&thread_id).await);
}
