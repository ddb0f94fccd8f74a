//! Adapter tests against a local mock of the Box and OpenAI APIs.
//!
//! The mock is an axum router bound to an ephemeral port. It keeps just
//! enough state to check request shapes, paging, polling, and the
//! delete-then-upload sequence through the real HTTP adapters.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use doc_relay::assistant::OpenAiAssistant;
use doc_relay::config::{AssistantsConfig, RevisionField, RunConfig};
use doc_relay::connector_box::BoxFileStore;
use doc_relay::error::is_not_found;
use doc_relay::filter::NameFilter;
use doc_relay::ingest::{run_pass, PassOptions};
use doc_relay::openai::OpenAiClient;
use doc_relay::progress::NoProgress;
use doc_relay::records::MemoryRecordStore;
use doc_relay::session::SessionRegistry;
use doc_relay::sync::SyncOptions;
use doc_relay::traits::{Assistant, FileStore, SearchIndex, SourceNames};
use doc_relay::vector_store::VectorStoreIndex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "test-token";

// ─── Mock service ───────────────────────────────────────────────────

#[derive(Default)]
struct Mock {
    /// Box folder content: (id, name, modified_at, bytes).
    box_files: Mutex<Vec<(String, String, String, Vec<u8>)>>,
    /// Fail the next folder listing with 503.
    flaky_listing: Mutex<bool>,
    listing_calls: Mutex<u32>,
    /// OpenAI files: id → filename.
    files: Mutex<BTreeMap<String, String>>,
    /// Files attached to the vector store, with status polls seen so far.
    attached: Mutex<HashMap<String, u32>>,
    /// Keep every attached file `in_progress`.
    stuck: Mutex<bool>,
    /// Statuses to answer `POST /threads` with before succeeding.
    thread_failures: Mutex<Vec<u16>>,
    thread_calls: Mutex<u32>,
    next_id: Mutex<u32>,
    /// Method and path of every call, in order.
    log: Mutex<Vec<String>>,
}

type Shared = Arc<Mock>;

impl Mock {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn next(&self, prefix: &str) -> String {
        let mut n = self.next_id.lock().unwrap();
        *n += 1;
        format!("{}-{}", prefix, *n)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", TOKEN))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "bad token").into_response()
}

async fn box_list(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Path(_folder): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    *mock.listing_calls.lock().unwrap() += 1;
    {
        let mut flaky = mock.flaky_listing.lock().unwrap();
        if *flaky {
            *flaky = false;
            return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
        }
    }

    // Two entries per page regardless of `limit`, to exercise paging.
    let offset: usize = q.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
    let files = mock.box_files.lock().unwrap();
    let mut entries: Vec<Value> = files
        .iter()
        .map(|(id, name, modified, _)| {
            json!({ "type": "file", "id": id, "name": name, "modified_at": modified })
        })
        .collect();
    entries.push(json!({ "type": "folder", "id": "99", "name": "Archive" }));
    let total = entries.len();
    let page: Vec<Value> = entries.into_iter().skip(offset).take(2).collect();
    Json(json!({ "total_count": total, "entries": page })).into_response()
}

async fn box_content(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let files = mock.box_files.lock().unwrap();
    match files.iter().find(|(fid, _, _, _)| *fid == id) {
        Some((_, _, _, bytes)) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn box_delete(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut files = mock.box_files.lock().unwrap();
    let before = files.len();
    files.retain(|(fid, _, _, _)| *fid != id);
    if files.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn create_file(State(mock): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let text = String::from_utf8_lossy(&body);
    if !text.contains("assistants") {
        return (StatusCode::BAD_REQUEST, "purpose missing").into_response();
    }
    let filename = text
        .split("filename=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or("unknown")
        .to_string();
    let id = mock.next("file");
    mock.record(format!("POST files {}", filename));
    mock.files.lock().unwrap().insert(id.clone(), filename.clone());
    Json(json!({ "id": id, "filename": filename })).into_response()
}

async fn get_file(State(mock): State<Shared>, Path(id): Path<String>) -> Response {
    match mock.files.lock().unwrap().get(&id) {
        Some(name) => Json(json!({ "id": id, "filename": name })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_file(State(mock): State<Shared>, Path(id): Path<String>) -> Response {
    mock.record(format!("DELETE files/{}", id));
    match mock.files.lock().unwrap().remove(&id) {
        Some(_) => Json(json!({ "id": id, "deleted": true })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn attach(
    State(mock): State<Shared>,
    Path(_vs): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let file_id = body["file_id"].as_str().unwrap_or_default().to_string();
    mock.record(format!("POST vector_stores/files {}", file_id));
    mock.attached.lock().unwrap().insert(file_id.clone(), 0);
    Json(json!({ "id": file_id, "status": "in_progress" })).into_response()
}

async fn attached_status(
    State(mock): State<Shared>,
    Path((_vs, id)): Path<(String, String)>,
) -> Response {
    let mut attached = mock.attached.lock().unwrap();
    match attached.get_mut(&id) {
        // First poll reports in_progress, then completed.
        Some(polls) => {
            *polls += 1;
            let done = *polls > 1 && !*mock.stuck.lock().unwrap();
            let status = if done { "completed" } else { "in_progress" };
            Json(json!({ "id": id, "status": status })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn detach(
    State(mock): State<Shared>,
    Path((_vs, id)): Path<(String, String)>,
) -> Response {
    mock.record(format!("DELETE vector_stores/files/{}", id));
    match mock.attached.lock().unwrap().remove(&id) {
        Some(_) => Json(json!({ "id": id, "deleted": true })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn create_thread(State(mock): State<Shared>, headers: HeaderMap) -> Response {
    if headers.get("openai-beta").and_then(|v| v.to_str().ok()) != Some("assistants=v2") {
        return (StatusCode::BAD_REQUEST, "beta header missing").into_response();
    }
    *mock.thread_calls.lock().unwrap() += 1;
    let failure = {
        let mut failures = mock.thread_failures.lock().unwrap();
        (!failures.is_empty()).then(|| failures.remove(0))
    };
    if let Some(status) = failure {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, "simulated").into_response();
    }
    let id = mock.next("thread");
    mock.record(format!("POST threads {}", id));
    Json(json!({ "id": id })).into_response()
}

async fn delete_thread(State(mock): State<Shared>, Path(id): Path<String>) -> Response {
    mock.record(format!("DELETE threads/{}", id));
    Json(json!({ "id": id, "deleted": true })).into_response()
}

async fn post_message(
    State(mock): State<Shared>,
    Path(thread): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let attached: Vec<&str> = body["attachments"]
        .as_array()
        .map(|a| a.iter().filter_map(|f| f["file_id"].as_str()).collect())
        .unwrap_or_default();
    let mut entry = format!(
        "POST threads/{}/messages {}",
        thread,
        body["content"].as_str().unwrap_or_default()
    );
    for file_id in attached {
        entry.push_str(&format!(" +{}", file_id));
    }
    mock.record(entry);
    Json(json!({ "id": "msg_user" })).into_response()
}

async fn create_run(
    State(mock): State<Shared>,
    Path(thread): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    mock.record(format!(
        "POST threads/{}/runs {}",
        thread,
        body["assistant_id"].as_str().unwrap_or_default()
    ));
    Json(json!({ "id": "run_1", "status": "queued" })).into_response()
}

async fn get_run(Path((_thread, run)): Path<(String, String)>) -> Response {
    Json(json!({ "id": run, "status": "completed" })).into_response()
}

async fn list_messages(
    State(mock): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if q.get("run_id").map(String::as_str) != Some("run_1") {
        return (StatusCode::BAD_REQUEST, "run_id missing").into_response();
    }
    let cited = mock
        .files
        .lock()
        .unwrap()
        .keys()
        .next()
        .cloned()
        .unwrap_or_default();
    Json(json!({
        "data": [{
            "role": "assistant",
            "content": [{
                "type": "text",
                "text": {
                    "value": " Tuition is due May 1【4:0†source】 and Aug 1【4:1†source】. ",
                    "annotations": [
                        { "type": "file_citation", "text": "【4:0†source】", "file_citation": { "file_id": cited } },
                        { "type": "file_citation", "text": "【4:1†source】", "file_citation": { "file_id": "file-gone" } }
                    ]
                }
            }]
        }]
    }))
    .into_response()
}

async fn spawn_mock(mock: Shared) -> String {
    let app = Router::new()
        .route("/box/folders/{id}/items", get(box_list))
        .route("/box/files/{id}/content", get(box_content))
        .route("/box/files/{id}", delete(box_delete))
        .route("/v1/files", post(create_file))
        .route("/v1/files/{id}", get(get_file).delete(delete_file))
        .route("/v1/vector_stores/{vs}/files", post(attach))
        .route(
            "/v1/vector_stores/{vs}/files/{id}",
            get(attached_status).delete(detach),
        )
        .route("/v1/threads", post(create_thread))
        .route("/v1/threads/{id}", delete(delete_thread))
        .route(
            "/v1/threads/{id}/messages",
            post(post_message).get(list_messages),
        )
        .route("/v1/threads/{id}/runs", post(create_run))
        .route("/v1/threads/{id}/runs/{run}", get(get_run))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn box_store(base: &str, token: &str) -> BoxFileStore {
    BoxFileStore::new(
        format!("{}/box", base),
        token,
        "123",
        RevisionField::ModifiedAt,
        Duration::from_secs(5),
        2,
    )
    .unwrap()
}

fn openai(base: &str) -> OpenAiClient {
    openai_with_retries(base, 0)
}

fn openai_with_retries(base: &str, max_retries: u32) -> OpenAiClient {
    OpenAiClient::new(format!("{}/v1", base), TOKEN, Duration::from_secs(5), max_retries).unwrap()
}

fn seed_box(mock: &Mock) {
    let mut files = mock.box_files.lock().unwrap();
    files.push((
        "11".into(),
        "Handbook.pdf".into(),
        "2024-03-01T10:00:00-08:00".into(),
        b"%PDF handbook".to_vec(),
    ));
    files.push((
        "12".into(),
        "Tuition.pdf".into(),
        "2024-03-02T10:00:00-08:00".into(),
        b"%PDF tuition".to_vec(),
    ));
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_box_listing_pages_and_retries() {
    let mock = Arc::new(Mock::default());
    seed_box(&mock);
    *mock.flaky_listing.lock().unwrap() = true;
    let base = spawn_mock(mock.clone()).await;

    let store = box_store(&base, TOKEN);
    assert_eq!(store.label(), "box:123");
    let items = store.list_items().await.unwrap();

    assert_eq!(items.len(), 3, "two files and a folder across two pages");
    assert_eq!(items[0].name, "Handbook.pdf");
    assert_eq!(items[0].revision, "2024-03-01T10:00:00-08:00");
    // One failed attempt, then two pages.
    assert_eq!(*mock.listing_calls.lock().unwrap(), 3);

    let content = store.get_content("12").await.unwrap();
    assert_eq!(content, b"%PDF tuition");

    store.delete_item("12").await.unwrap();
    let err = store.delete_item("12").await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_box_bad_token_fails_without_retry() {
    let mock = Arc::new(Mock::default());
    let base = spawn_mock(mock.clone()).await;

    let store = box_store(&base, "wrong");
    let err = store.list_items().await.unwrap_err();
    assert!(err.to_string().contains("credentials"), "{}", err);
}

#[tokio::test]
async fn test_vector_store_upload_and_delete() {
    let mock = Arc::new(Mock::default());
    let base = spawn_mock(mock.clone()).await;

    let index = VectorStoreIndex::new(openai(&base), "vs_1".into())
        .with_poll_interval(Duration::from_millis(10));
    let id = index.upload("Handbook.pdf", b"%PDF".to_vec()).await.unwrap();
    assert_eq!(mock.files.lock().unwrap().get(&id).unwrap(), "Handbook.pdf");
    assert_eq!(*mock.attached.lock().unwrap().get(&id).unwrap(), 0, "not polled yet");

    index.confirm(&id).await.unwrap();
    assert!(*mock.attached.lock().unwrap().get(&id).unwrap() >= 2, "polled until completed");

    index.delete(&id).await.unwrap();
    assert!(mock.files.lock().unwrap().is_empty());
    let log = mock.log();
    let detach_at = log
        .iter()
        .position(|l| l == &format!("DELETE vector_stores/files/{}", id))
        .unwrap();
    let delete_at = log
        .iter()
        .position(|l| l == &format!("DELETE files/{}", id))
        .unwrap();
    assert!(detach_at < delete_at);

    let err = index.delete(&id).await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_vector_store_confirm_deadline_deletes_file() {
    let mock = Arc::new(Mock::default());
    *mock.stuck.lock().unwrap() = true;
    let base = spawn_mock(mock.clone()).await;

    let index = VectorStoreIndex::new(openai(&base), "vs_1".into())
        .with_poll_interval(Duration::from_millis(10))
        .with_confirm_timeout(Duration::from_millis(150));
    let id = index.upload("Handbook.pdf", b"%PDF".to_vec()).await.unwrap();

    let err = index.confirm(&id).await.unwrap_err();
    assert!(err.to_string().contains("not indexed"), "{}", err);
    assert!(mock.files.lock().unwrap().is_empty());
    assert!(mock.attached.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stuck_vector_store_never_accumulates_copies() {
    let mock = Arc::new(Mock::default());
    seed_box(&mock);
    mock.box_files.lock().unwrap().truncate(1);
    *mock.stuck.lock().unwrap() = true;
    let base = spawn_mock(mock.clone()).await;

    let store = box_store(&base, TOKEN);
    // Deadline longer than the document timeout: the synchronizer has to
    // clean up on its own.
    let index = VectorStoreIndex::new(openai(&base), "vs_1".into())
        .with_poll_interval(Duration::from_millis(10))
        .with_confirm_timeout(Duration::from_secs(30));
    let records = MemoryRecordStore::new();
    let filter = NameFilter::new(&["**/*.pdf".to_string()], &[]).unwrap();
    let options = PassOptions {
        sync: SyncOptions {
            document_timeout: Duration::from_millis(200),
        },
        ..Default::default()
    };

    for _ in 0..2 {
        let outcome = run_pass(&records, &store, &index, &filter, &options, &NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.report.failed, 1);
        assert!(mock.files.lock().unwrap().is_empty(), "{:?}", mock.log());
        assert!(mock.attached.lock().unwrap().is_empty(), "{:?}", mock.log());
    }
    let uploads = mock
        .log()
        .iter()
        .filter(|l| l.as_str() == "POST files Handbook.pdf")
        .count();
    assert_eq!(uploads, 2);
    assert!(records.snapshot().is_empty());
}

#[tokio::test]
async fn test_box_to_vector_store_pass() {
    let mock = Arc::new(Mock::default());
    seed_box(&mock);
    let base = spawn_mock(mock.clone()).await;

    let store = box_store(&base, TOKEN);
    let index = VectorStoreIndex::new(openai(&base), "vs_1".into())
        .with_poll_interval(Duration::from_millis(10));
    let records = MemoryRecordStore::new();
    let filter = NameFilter::new(&["**/*.pdf".to_string()], &[]).unwrap();
    let options = PassOptions::default();

    let first = run_pass(&records, &store, &index, &filter, &options, &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.listed, 2);
    assert_eq!(first.report.indexed, 2);
    let old_id = records.snapshot()["Handbook.pdf"]
        .indexed_object_id
        .clone()
        .unwrap();

    mock.box_files.lock().unwrap()[0].2 = "2024-04-01T10:00:00-08:00".into();
    let second = run_pass(&records, &store, &index, &filter, &options, &NoProgress)
        .await
        .unwrap();
    assert_eq!(second.report.indexed, 1);

    let log = mock.log();
    let deleted_old = log
        .iter()
        .position(|l| l == &format!("DELETE files/{}", old_id))
        .expect("old file deleted");
    let last_upload = log
        .iter()
        .rposition(|l| l == "POST files Handbook.pdf")
        .unwrap();
    assert!(deleted_old < last_upload, "delete precedes re-upload: {:?}", log);
    assert_eq!(mock.files.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_assistant_turn_and_citations() {
    let mock = Arc::new(Mock::default());
    mock.files
        .lock()
        .unwrap()
        .insert("file-a".into(), "Handbook.pdf".into());
    let base = spawn_mock(mock.clone()).await;

    let assistant = OpenAiAssistant::new(
        openai(&base),
        RunConfig {
            poll_interval_ms: 10,
            timeout_secs: 5,
        },
    );
    assert_eq!(assistant.display_name("file-a").await.unwrap(), "Handbook.pdf");
    assert!(assistant.display_name("file-gone").await.is_err());

    let mut variants = BTreeMap::new();
    variants.insert("4o".to_string(), "asst_full".to_string());
    let sessions = SessionRegistry::new(
        Arc::new(assistant),
        AssistantsConfig {
            default: "4o".to_string(),
            variants,
            run: RunConfig::default(),
        },
    );

    let answer = sessions.ask("u1", "When is tuition due?").await.unwrap();
    assert_eq!(answer.text, "Tuition is due May 1 and Aug 1.");
    assert_eq!(answer.citations, vec!["Handbook.pdf"]);

    assert!(sessions.delete_thread("u1").await.unwrap());
    let log = mock.log();
    assert!(log.contains(&"POST threads thread-1".to_string()));
    assert!(log.contains(&"POST threads/thread-1/messages When is tuition due?".to_string()));
    assert!(log.contains(&"POST threads/thread-1/runs asst_full".to_string()));
    assert!(log.contains(&"DELETE threads/thread-1".to_string()));
}

#[tokio::test]
async fn test_assistant_trait_object() {
    let mock = Arc::new(Mock::default());
    let base = spawn_mock(mock.clone()).await;
    let assistant: Arc<dyn Assistant> =
        Arc::new(OpenAiAssistant::new(openai(&base), RunConfig::default()));

    let thread = assistant.create_thread().await.unwrap();
    assert!(thread.starts_with("thread-"));
    assistant.delete_thread(&thread).await.unwrap();
}

#[tokio::test]
async fn test_assistant_upload_and_attach() {
    let mock = Arc::new(Mock::default());
    let base = spawn_mock(mock.clone()).await;
    let assistant = OpenAiAssistant::new(openai(&base), RunConfig::default());

    let file_id = assistant
        .upload_file("notes.pdf", b"%PDF notes".to_vec())
        .await
        .unwrap();
    assert_eq!(mock.files.lock().unwrap().get(&file_id).unwrap(), "notes.pdf");

    let thread = assistant.create_thread().await.unwrap();
    assistant.attach_file(&thread, &file_id).await.unwrap();
    let expected = format!(
        "POST threads/{}/messages Attached a file for reference. +{}",
        thread, file_id
    );
    assert!(mock.log().contains(&expected), "{:?}", mock.log());
}

#[tokio::test]
async fn test_creating_post_not_repeated_after_server_error() {
    let mock = Arc::new(Mock::default());
    mock.thread_failures.lock().unwrap().push(500);
    let base = spawn_mock(mock.clone()).await;
    let assistant = OpenAiAssistant::new(openai_with_retries(&base, 2), RunConfig::default());

    let err = assistant.create_thread().await.unwrap_err();
    assert!(err.to_string().contains("500"), "{}", err);
    assert_eq!(*mock.thread_calls.lock().unwrap(), 1, "a 500 may have created a thread");
}

#[tokio::test]
async fn test_creating_post_repeated_after_rate_limit() {
    let mock = Arc::new(Mock::default());
    mock.thread_failures.lock().unwrap().push(429);
    let base = spawn_mock(mock.clone()).await;
    let assistant = OpenAiAssistant::new(openai_with_retries(&base, 2), RunConfig::default());

    let thread = assistant.create_thread().await.unwrap();
    assert!(thread.starts_with("thread-"));
    assert_eq!(*mock.thread_calls.lock().unwrap(), 2);
}
