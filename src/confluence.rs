// Confluence REST 客户端：每个远端调用一个方法，错误归一为类型化枚举。
use crate::config::ConfluenceConfig;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

/// 远端失败分类。404/409 单独建档，调用方据此拼接带标识符的提示文本。
#[derive(Debug, Clone)]
pub enum ConfluenceError {
    /// 远端 404：目标页面或空间不存在。
    NotFound,
    /// 远端 409：仅出现在空间创建，键已被占用。
    Conflict,
    /// 其余非 2xx，保留原始状态码与响应正文。
    Api { status: u16, detail: String },
    /// 连接层失败（DNS、超时、TLS 等）。
    Transport(String),
}

impl std::fmt::Display for ConfluenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfluenceError::NotFound => write!(f, "resource not found (404)"),
            ConfluenceError::Conflict => write!(f, "resource already exists (409)"),
            ConfluenceError::Api { status, detail } => {
                write!(f, "API error {status}: {detail}")
            }
            ConfluenceError::Transport(detail) => write!(f, "transport error: {detail}"),
        }
    }
}

impl std::error::Error for ConfluenceError {}

impl From<reqwest::Error> for ConfluenceError {
    fn from(err: reqwest::Error) -> Self {
        ConfluenceError::Transport(err.to_string())
    }
}

pub type ConfluenceResult<T> = Result<T, ConfluenceError>;

#[derive(Debug, Clone)]
pub struct PageDetails {
    pub id: String,
    pub title: String,
    pub body: String,
    pub space_key: String,
    pub version: i64,
    pub webui: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct CreatedPage {
    pub id: String,
    pub webui: String,
}

#[derive(Debug, Clone)]
pub struct SpaceSummary {
    pub id: String,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
}

#[derive(Clone)]
pub struct ConfluenceClient {
    http: Client,
    base_url: String,
    username: String,
    api_token: String,
}

impl ConfluenceClient {
    /// 连接信息不完整时返回 None，工具层据此进入"未初始化"降级路径。
    pub fn from_config(config: &ConfluenceConfig, http: Client) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self {
            http,
            base_url: config.normalized_base_url()?,
            username: config.username.clone()?.trim().to_string(),
            api_token: config.api_token.clone()?.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 页面创建返回的 webui 相对路径拼接为可点击地址。
    pub fn webui_url(&self, webui: &str) -> String {
        format!("{}{}", self.base_url, webui)
    }

    pub fn space_url(&self, space_key: &str) -> String {
        format!("{}/wiki/spaces/{space_key}", self.base_url)
    }

    pub fn page_url(&self, space_key: &str, page_id: &str) -> String {
        format!("{}/wiki/spaces/{space_key}/pages/{page_id}", self.base_url)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> ConfluenceResult<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "confluence 请求");
        let mut builder = self
            .http
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.api_token));
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => ConfluenceError::NotFound,
                StatusCode::CONFLICT => ConfluenceError::Conflict,
                other => ConfluenceError::Api {
                    status: other.as_u16(),
                    detail: text,
                },
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| ConfluenceError::Api {
            status: status.as_u16(),
            detail: format!("invalid JSON response: {err}"),
        })
    }

    pub async fn get_page(&self, page_id: &str) -> ConfluenceResult<PageDetails> {
        let value = self
            .request(
                Method::GET,
                &format!("/rest/api/content/{page_id}"),
                &[("expand", "body.storage,space,version".to_string())],
                None,
            )
            .await?;
        Ok(PageDetails {
            id: string_at(&value, &["id"]).unwrap_or_else(|| page_id.to_string()),
            title: string_at(&value, &["title"]).unwrap_or_default(),
            body: string_at(&value, &["body", "storage", "value"]).unwrap_or_default(),
            space_key: string_at(&value, &["space", "key"]).unwrap_or_default(),
            version: value
                .pointer("/version/number")
                .and_then(Value::as_i64)
                .unwrap_or(1),
            webui: string_at(&value, &["_links", "webui"]).unwrap_or_default(),
        })
    }

    /// CQL 搜索，命中条目位于 results[].content。
    pub async fn search(&self, cql: &str, limit: u32) -> ConfluenceResult<Vec<SearchHit>> {
        let value = self
            .request(
                Method::GET,
                "/rest/api/search",
                &[("cql", cql.to_string()), ("limit", limit.to_string())],
                None,
            )
            .await?;
        let hits = value
            .get("results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let content = item.get("content")?;
                        Some(SearchHit {
                            id: string_at(content, &["id"])?,
                            title: string_at(content, &["title"]).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    pub async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> ConfluenceResult<CreatedPage> {
        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": {"key": space_key},
            "body": {
                "storage": {"value": body, "representation": "storage"}
            }
        });
        if let Some(parent_id) = parent_id {
            payload["ancestors"] = json!([{ "id": parent_id }]);
        }
        let value = self
            .request(Method::POST, "/rest/api/content", &[], Some(payload))
            .await?;
        Ok(CreatedPage {
            id: string_at(&value, &["id"]).unwrap_or_default(),
            webui: string_at(&value, &["_links", "webui"]).unwrap_or_default(),
        })
    }

    /// 远端要求整页写回：标题与正文都必须在场，版本号由调用方在当前值上加一。
    pub async fn update_page(
        &self,
        page_id: &str,
        title: &str,
        body: &str,
        next_version: i64,
    ) -> ConfluenceResult<()> {
        let payload = json!({
            "id": page_id,
            "type": "page",
            "title": title,
            "version": {"number": next_version},
            "body": {
                "storage": {"value": body, "representation": "storage"}
            }
        });
        self.request(
            Method::PUT,
            &format!("/rest/api/content/{page_id}"),
            &[],
            Some(payload),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_page(&self, page_id: &str) -> ConfluenceResult<()> {
        self.request(
            Method::DELETE,
            &format!("/rest/api/content/{page_id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    /// 评论正文按 storage 表示提交，外层包一层 div 与原实现一致。
    pub async fn add_comment(&self, page_id: &str, comment_body: &str) -> ConfluenceResult<()> {
        let payload = json!({
            "type": "comment",
            "container": {"id": page_id, "type": "page"},
            "body": {
                "storage": {
                    "value": format!("<div>{comment_body}</div>"),
                    "representation": "storage"
                }
            }
        });
        self.request(
            Method::POST,
            &format!("/rest/api/content/{page_id}/child/comment"),
            &[],
            Some(payload),
        )
        .await?;
        Ok(())
    }

    pub async fn create_space(&self, space_key: &str, space_name: &str) -> ConfluenceResult<()> {
        let payload = json!({ "key": space_key, "name": space_name });
        self.request(Method::POST, "/rest/api/space", &[], Some(payload))
            .await?;
        Ok(())
    }

    pub async fn list_spaces(&self, limit: u32) -> ConfluenceResult<Vec<SpaceSummary>> {
        let value = self
            .request(
                Method::GET,
                "/rest/api/space",
                &[
                    ("start", "0".to_string()),
                    ("limit", limit.to_string()),
                    ("expand", "name".to_string()),
                ],
                None,
            )
            .await?;
        let spaces = value
            .get("results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let key = string_at(item, &["key"])?;
                        Some(SpaceSummary {
                            // 旧版站点可能不带 id，回退为 key。
                            id: string_at(item, &["id"]).unwrap_or_else(|| key.clone()),
                            name: string_at(item, &["name"]).unwrap_or_default(),
                            key,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(spaces)
    }

    pub async fn list_pages(
        &self,
        space_key: &str,
        limit: u32,
    ) -> ConfluenceResult<Vec<PageSummary>> {
        let value = self
            .request(
                Method::GET,
                "/rest/api/content",
                &[
                    ("spaceKey", space_key.to_string()),
                    ("type", "page".to_string()),
                    ("start", "0".to_string()),
                    ("limit", limit.to_string()),
                ],
                None,
            )
            .await?;
        let pages = value
            .get("results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(PageSummary {
                            id: string_at(item, &["id"])?,
                            title: string_at(item, &["title"]).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(pages)
    }
}

/// 逐级取字符串字段；数字 id 一并转为字符串，兼容不同版本的返回。
fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfluenceConfig;

    fn configured() -> ConfluenceConfig {
        ConfluenceConfig {
            base_url: Some("https://team.atlassian.net/".to_string()),
            username: Some("bot@example.com".to_string()),
            api_token: Some("token".to_string()),
        }
    }

    #[test]
    fn client_requires_full_credentials() {
        let http = Client::new();
        assert!(ConfluenceClient::from_config(&configured(), http.clone()).is_some());
        let mut partial = configured();
        partial.api_token = Some("   ".to_string());
        assert!(ConfluenceClient::from_config(&partial, http).is_none());
    }

    #[test]
    fn url_builders_match_site_layout() {
        let client = ConfluenceClient::from_config(&configured(), Client::new()).unwrap();
        assert_eq!(
            client.space_url("NB"),
            "https://team.atlassian.net/wiki/spaces/NB"
        );
        assert_eq!(
            client.page_url("NB", "12345"),
            "https://team.atlassian.net/wiki/spaces/NB/pages/12345"
        );
        assert_eq!(
            client.webui_url("/spaces/NB/pages/12345"),
            "https://team.atlassian.net/spaces/NB/pages/12345"
        );
    }

    #[test]
    fn string_at_handles_numeric_ids() {
        let value = serde_json::json!({"content": {"id": 98765, "title": "Plan"}});
        assert_eq!(
            string_at(&value, &["content", "id"]).unwrap(),
            "98765".to_string()
        );
        assert_eq!(string_at(&value, &["content", "missing"]), None);
    }
}
