// 测试用假远端：同一进程内起一个 axum 服务，既扮演 Confluence REST，
// 也扮演 OpenAI 兼容模型端点，回复按脚本台词顺序弹出。
#![allow(dead_code)]
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use confluence_agent::config::Config;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct FakePage {
    pub id: String,
    pub title: String,
    pub body: String,
    pub space_key: String,
    pub version: i64,
}

#[derive(Default)]
pub struct RemoteState {
    pub llm_replies: Mutex<VecDeque<String>>,
    pub llm_calls: AtomicUsize,
    pub llm_requests: Mutex<Vec<Value>>,
    pub pages: Mutex<HashMap<String, FakePage>>,
    pub spaces: Mutex<Vec<(String, String)>>,
    pub page_gets: AtomicUsize,
    pub page_puts: Mutex<Vec<Value>>,
    pub page_deletes: AtomicUsize,
    pub space_creates: Mutex<Vec<Value>>,
    pub search_cqls: Mutex<Vec<String>>,
    pub comment_posts: Mutex<Vec<Value>>,
    pub next_page_id: AtomicUsize,
}

impl RemoteState {
    pub fn script_llm(&self, replies: &[&str]) {
        let mut queue = self.llm_replies.lock().unwrap();
        for reply in replies {
            queue.push_back((*reply).to_string());
        }
    }

    pub fn insert_page(&self, page: FakePage) {
        self.pages.lock().unwrap().insert(page.id.clone(), page);
    }

    pub fn insert_space(&self, key: &str, name: &str) {
        self.spaces
            .lock()
            .unwrap()
            .push((key.to_string(), name.to_string()));
    }

    pub fn remote_call_total(&self) -> usize {
        self.page_gets.load(Ordering::SeqCst)
            + self.page_puts.lock().unwrap().len()
            + self.page_deletes.load(Ordering::SeqCst)
            + self.space_creates.lock().unwrap().len()
            + self.search_cqls.lock().unwrap().len()
            + self.comment_posts.lock().unwrap().len()
    }
}

pub struct FakeRemote {
    pub base_url: String,
    pub state: Arc<RemoteState>,
}

/// 起假远端，返回其地址与可检视的共享状态。
pub async fn spawn_fake_remote() -> FakeRemote {
    let state = Arc::new(RemoteState {
        next_page_id: AtomicUsize::new(9001),
        ..RemoteState::default()
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/rest/api/content", post(create_content).get(list_content))
        .route(
            "/rest/api/content/{id}",
            get(get_content).put(put_content).delete(delete_content),
        )
        .route("/rest/api/content/{id}/child/comment", post(post_comment))
        .route("/rest/api/search", get(search_content))
        .route("/rest/api/space", post(create_space).get(list_spaces))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeRemote { base_url, state }
}

/// 指向假远端的完整配置：Confluence 与模型端点同源。
pub fn config_for(remote: &FakeRemote) -> Config {
    let mut config = Config::default();
    config.confluence.base_url = Some(remote.base_url.clone());
    config.confluence.username = Some("bot@example.com".to_string());
    config.confluence.api_token = Some("test-token".to_string());
    config.llm.base_url = Some(remote.base_url.clone());
    config.llm.api_key = Some("test-key".to_string());
    config
}

/// 把应用路由挂到随机端口，返回服务地址。
pub async fn spawn_app(config: Config) -> String {
    let state = Arc::new(confluence_agent::state::AppState::new(config).unwrap());
    let app = confluence_agent::api::build_router(state.clone()).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn chat_completions(
    State(state): State<Arc<RemoteState>>,
    Json(payload): Json<Value>,
) -> Response {
    state.llm_calls.fetch_add(1, Ordering::SeqCst);
    state.llm_requests.lock().unwrap().push(payload);
    let content = state
        .llm_replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| "I have nothing further to do.".to_string());
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "no content found"})),
    )
        .into_response()
}

fn page_json(page: &FakePage) -> Value {
    json!({
        "id": page.id,
        "type": "page",
        "title": page.title,
        "space": {"key": page.space_key},
        "version": {"number": page.version},
        "body": {"storage": {"value": page.body, "representation": "storage"}},
        "_links": {"webui": format!("/spaces/{}/pages/{}", page.space_key, page.id)}
    })
}

async fn get_content(State(state): State<Arc<RemoteState>>, Path(id): Path<String>) -> Response {
    state.page_gets.fetch_add(1, Ordering::SeqCst);
    match state.pages.lock().unwrap().get(&id) {
        Some(page) => Json(page_json(page)).into_response(),
        None => not_found(),
    }
}

async fn put_content(
    State(state): State<Arc<RemoteState>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let mut pages = state.pages.lock().unwrap();
    let Some(page) = pages.get_mut(&id) else {
        return not_found();
    };
    if let Some(title) = payload.get("title").and_then(Value::as_str) {
        page.title = title.to_string();
    }
    if let Some(body) = payload.pointer("/body/storage/value").and_then(Value::as_str) {
        page.body = body.to_string();
    }
    if let Some(version) = payload.pointer("/version/number").and_then(Value::as_i64) {
        page.version = version;
    }
    let response = Json(page_json(page)).into_response();
    drop(pages);
    state.page_puts.lock().unwrap().push(payload);
    response
}

async fn delete_content(State(state): State<Arc<RemoteState>>, Path(id): Path<String>) -> Response {
    state.page_deletes.fetch_add(1, Ordering::SeqCst);
    match state.pages.lock().unwrap().remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(),
    }
}

async fn create_content(
    State(state): State<Arc<RemoteState>>,
    Json(payload): Json<Value>,
) -> Response {
    let space_key = payload
        .pointer("/space/key")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let known = state
        .spaces
        .lock()
        .unwrap()
        .iter()
        .any(|(key, _)| *key == space_key);
    if !known {
        return not_found();
    }
    let id = state.next_page_id.fetch_add(1, Ordering::SeqCst).to_string();
    let page = FakePage {
        id: id.clone(),
        title: payload
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        body: payload
            .pointer("/body/storage/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        space_key,
        version: 1,
    };
    let response = Json(page_json(&page)).into_response();
    state.insert_page(page);
    response
}

async fn list_content(
    State(state): State<Arc<RemoteState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let space_key = params.get("spaceKey").cloned().unwrap_or_default();
    let pages = state.pages.lock().unwrap();
    let mut results: Vec<&FakePage> = pages
        .values()
        .filter(|page| page.space_key == space_key)
        .collect();
    results.sort_by(|a, b| a.id.cmp(&b.id));
    let results: Vec<Value> = results
        .into_iter()
        .map(|page| json!({"id": page.id, "title": page.title}))
        .collect();
    Json(json!({ "results": results })).into_response()
}

async fn search_content(
    State(state): State<Arc<RemoteState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let cql = params.get("cql").cloned().unwrap_or_default();
    state.search_cqls.lock().unwrap().push(cql);
    let pages = state.pages.lock().unwrap();
    let results: Vec<Value> = pages
        .values()
        .map(|page| json!({"content": {"id": page.id, "title": page.title}}))
        .collect();
    Json(json!({ "results": results })).into_response()
}

async fn post_comment(
    State(state): State<Arc<RemoteState>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    if !state.pages.lock().unwrap().contains_key(&id) {
        return not_found();
    }
    state.comment_posts.lock().unwrap().push(payload);
    Json(json!({"id": "c-1"})).into_response()
}

async fn create_space(
    State(state): State<Arc<RemoteState>>,
    Json(payload): Json<Value>,
) -> Response {
    let key = payload
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let exists = state
        .spaces
        .lock()
        .unwrap()
        .iter()
        .any(|(existing, _)| *existing == key);
    if exists {
        return (
            StatusCode::CONFLICT,
            Json(json!({"message": "space key already in use"})),
        )
            .into_response();
    }
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.spaces.lock().unwrap().push((key.clone(), name));
    state.space_creates.lock().unwrap().push(payload);
    Json(json!({"key": key})).into_response()
}

async fn list_spaces(State(state): State<Arc<RemoteState>>) -> Response {
    let spaces = state.spaces.lock().unwrap();
    let results: Vec<Value> = spaces
        .iter()
        .enumerate()
        .map(|(index, (key, name))| json!({"id": index + 1, "key": key, "name": name}))
        .collect();
    Json(json!({ "results": results })).into_response()
}
