// 主入口端点：自然语言指令交给编排层，结果原样包回固定响应键。
use crate::schemas::{ErrorDetail, InvokeRequest, InvokeResponse};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(read_root))
        .route("/invoke", post(invoke_agent))
}

async fn read_root() -> Response {
    Json(json!({
        "message": "Welcome to the Confluence Agent Server! Server is ready."
    }))
    .into_response()
}

async fn invoke_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvokeRequest>,
) -> Response {
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorDetail {
                detail: "Prompt cannot be empty.".to_string(),
            }),
        )
            .into_response();
    }
    match state.orchestrator.run(&request.prompt).await {
        Ok(answer) => Json(InvokeResponse {
            response: answer.text,
            usage: answer.usage,
        })
        .into_response(),
        Err(err) => {
            warn!(code = err.code(), "请求处理失败: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorDetail {
                    detail: err.message().to_string(),
                }),
            )
                .into_response()
        }
    }
}
