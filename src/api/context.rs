// 上下文只读端点：绕过 Agent，直接读取空间与页面清单。
use crate::schemas::{ContextPage, ContextSpace, ErrorDetail};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::warn;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/context/spaces", get(get_all_spaces))
        .route("/context/pages/{space_key}", get(get_all_pages_in_space))
}

fn client_missing() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorDetail {
            detail: "Confluence client is not initialized.".to_string(),
        }),
    )
        .into_response()
}

async fn get_all_spaces(State(state): State<Arc<AppState>>) -> Response {
    let Some(client) = state.confluence.as_deref() else {
        return client_missing();
    };
    match client.list_spaces(state.config.agent.result_limit).await {
        Ok(spaces) => {
            let records: Vec<ContextSpace> = spaces
                .into_iter()
                .map(|space| ContextSpace {
                    kind: "space".to_string(),
                    url: client.space_url(&space.key),
                    key: space.key,
                    name: space.name,
                    id: space.id,
                })
                .collect();
            Json(records).into_response()
        }
        Err(err) => {
            warn!("空间列表获取失败: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorDetail {
                    detail: format!("Error retrieving spaces: {err}"),
                }),
            )
                .into_response()
        }
    }
}

async fn get_all_pages_in_space(
    State(state): State<Arc<AppState>>,
    Path(space_key): Path<String>,
) -> Response {
    let Some(client) = state.confluence.as_deref() else {
        return client_missing();
    };
    match client
        .list_pages(&space_key, state.config.agent.result_limit)
        .await
    {
        Ok(pages) => {
            let records: Vec<ContextPage> = pages
                .into_iter()
                .map(|page| ContextPage {
                    kind: "page".to_string(),
                    url: client.page_url(&space_key, &page.id),
                    id: page.id,
                    title: page.title,
                    space_key: space_key.clone(),
                })
                .collect();
            Json(records).into_response()
        }
        Err(err) => {
            warn!(space_key, "页面列表获取失败: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorDetail {
                    detail: format!("Error retrieving pages: {err}"),
                }),
            )
                .into_response()
        }
    }
}
