// 内置工具定义与执行入口：所有失败一律转为描述性文本，不跨边界抛错。
use crate::confluence::{ConfluenceClient, ConfluenceError};
use crate::schemas::ToolSpec;
use serde_json::{json, Value};
use tracing::info;

/// 终结工具：模型产出最终回复时调用，由编排层拦截，不在此执行。
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// 客户端未初始化时所有工具的固定返回文本。
pub const NOT_INITIALIZED_MESSAGE: &str =
    "Error: Confluence client is not initialized. Check your environment configuration.";

pub struct ToolContext<'a> {
    pub confluence: Option<&'a ConfluenceClient>,
    pub result_limit: u32,
}

pub fn builtin_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: FINAL_ANSWER_TOOL.to_string(),
            description: "Deliver the final answer to the user once the request is fully handled. \
                          Use this exactly once, as the last step."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The final answer text for the user."}
                },
                "required": ["content"]
            }),
        },
        ToolSpec {
            name: "get_page_details".to_string(),
            description: "Retrieves the details of a specific Confluence page by its ID. \
                          The input must be a valid Confluence page ID, not the page title. \
                          Returns the page's title, content, and the space it belongs to."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "The Confluence page ID."}
                },
                "required": ["page_id"]
            }),
        },
        ToolSpec {
            name: "search_pages".to_string(),
            description: "Searches for Confluence pages based on a text query and/or a space key. \
                          If only a space key is provided, it finds all pages in that space. \
                          At least one of the two must be given. Returns matching titles and IDs."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free-text search term."},
                    "space_key": {"type": "string", "description": "Space key to limit the search."}
                }
            }),
        },
        ToolSpec {
            name: "create_page".to_string(),
            description: "Creates a new Confluence page in a specified space with a given title \
                          and body content. An optional parent_page_id creates a child page. \
                          Returns the URL and ID of the newly created page."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "space_key": {"type": "string", "description": "Key of the space that owns the page."},
                    "title": {"type": "string", "description": "Title for the new page."},
                    "body": {"type": "string", "description": "Body content for the new page."},
                    "parent_page_id": {"type": "string", "description": "Optional parent page ID."}
                },
                "required": ["space_key", "title", "body"]
            }),
        },
        ToolSpec {
            name: "update_page".to_string(),
            description: "Updates the title or body of a Confluence page. The input must be a \
                          valid page ID and at least one of: a new title or a new body. The field \
                          left out is preserved unchanged."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "The Confluence page ID."},
                    "title": {"type": "string", "description": "New title, if it should change."},
                    "body": {"type": "string", "description": "New body, if it should change."}
                },
                "required": ["page_id"]
            }),
        },
        ToolSpec {
            name: "delete_page".to_string(),
            description: "Deletes a specific Confluence page by its ID.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "The Confluence page ID."}
                },
                "required": ["page_id"]
            }),
        },
        ToolSpec {
            name: "add_comment".to_string(),
            description: "Adds a comment to an existing Confluence page. The input must be a \
                          valid page ID and the comment text."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "page_id": {"type": "string", "description": "The Confluence page ID."},
                    "comment_body": {"type": "string", "description": "The comment text."}
                },
                "required": ["page_id", "comment_body"]
            }),
        },
        ToolSpec {
            name: "create_space".to_string(),
            description: "Creates a new Confluence space with a given key and name. The key is a \
                          unique identifier such as 'DEV'; the name is a display name such as \
                          'Development Team'. A duplicate key is an error, not a no-op."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "space_key": {"type": "string", "description": "Unique space key, e.g. 'DEV'."},
                    "space_name": {"type": "string", "description": "Display name for the space."}
                },
                "required": ["space_key", "space_name"]
            }),
        },
    ]
}

/// 按名称分发执行。调用方（编排层）保证 final_answer 不会进入这里。
pub async fn execute_tool(ctx: &ToolContext<'_>, name: &str, args: &Value) -> String {
    let Some(client) = ctx.confluence else {
        return NOT_INITIALIZED_MESSAGE.to_string();
    };
    if let Some(message) = validate_required_args(name, args) {
        return message;
    }
    info!(tool = name, "执行工具调用");
    match name {
        "get_page_details" => get_page_details(client, &arg_str(args, "page_id")).await,
        "search_pages" => {
            search_pages(
                client,
                opt_arg_str(args, "query"),
                opt_arg_str(args, "space_key"),
                ctx.result_limit,
            )
            .await
        }
        "create_page" => {
            create_page(
                client,
                &arg_str(args, "space_key"),
                &arg_str(args, "title"),
                &arg_str(args, "body"),
                opt_arg_str(args, "parent_page_id"),
            )
            .await
        }
        "update_page" => {
            update_page(
                client,
                &arg_str(args, "page_id"),
                opt_arg_str(args, "title"),
                opt_arg_str(args, "body"),
            )
            .await
        }
        "delete_page" => delete_page(client, &arg_str(args, "page_id")).await,
        "add_comment" => {
            add_comment(
                client,
                &arg_str(args, "page_id"),
                &arg_str(args, "comment_body"),
            )
            .await
        }
        "create_space" => {
            create_space(
                client,
                &arg_str(args, "space_key"),
                &arg_str(args, "space_name"),
            )
            .await
        }
        other => format!(
            "Error: Unknown tool '{other}'. Pick one of the tools listed in the system prompt."
        ),
    }
}

async fn get_page_details(client: &ConfluenceClient, page_id: &str) -> String {
    match client.get_page(page_id).await {
        Ok(page) => format!(
            "Successfully retrieved Confluence page details.\nTitle: {}\nSpace: {}\nContent:\n{}",
            page.title, page.space_key, page.body
        ),
        Err(ConfluenceError::NotFound) => format!(
            "Error: Page with ID '{page_id}' was not found. Please provide a correct page ID."
        ),
        Err(ConfluenceError::Api { detail, .. }) => format!(
            "Error: An API error occurred while retrieving page '{page_id}'. Details: {detail}"
        ),
        Err(err) => {
            format!("An unexpected error occurred while retrieving page '{page_id}': {err}")
        }
    }
}

async fn search_pages(
    client: &ConfluenceClient,
    query: Option<String>,
    space_key: Option<String>,
    limit: u32,
) -> String {
    let Some(cql) = build_cql(query.as_deref(), space_key.as_deref()) else {
        return "Error: You must provide either a search query or a space key.".to_string();
    };
    match client.search(&cql, limit).await {
        Ok(hits) if hits.is_empty() => "No pages found for the search criteria.".to_string(),
        Ok(hits) => {
            let mut output = "Found the following pages:\n".to_string();
            for hit in hits {
                output.push_str(&format!("  - Title: {}, ID: {}\n", hit.title, hit.id));
            }
            output
        }
        Err(err) => format!("An unexpected error occurred while searching for pages: {err}"),
    }
}

async fn create_page(
    client: &ConfluenceClient,
    space_key: &str,
    title: &str,
    body: &str,
    parent_page_id: Option<String>,
) -> String {
    match client
        .create_page(space_key, title, body, parent_page_id.as_deref())
        .await
    {
        Ok(page) => format!(
            "Successfully created a new Confluence page! Title: '{title}', ID: '{}', URL: {}",
            page.id,
            client.webui_url(&page.webui)
        ),
        Err(ConfluenceError::NotFound) => format!(
            "Error: Space with key '{space_key}' was not found. Please provide a correct space key."
        ),
        Err(ConfluenceError::Api { detail, .. }) => {
            format!("Error: An API error occurred while creating page. Details: {detail}")
        }
        Err(err) => format!("An unexpected error occurred while creating a page: {err}"),
    }
}

/// 部分更新语义：远端要求整页写回，未改动的字段先取回再原样带上。
async fn update_page(
    client: &ConfluenceClient,
    page_id: &str,
    title: Option<String>,
    body: Option<String>,
) -> String {
    if title.is_none() && body.is_none() {
        return "Error: You must provide either a new title or a new body to update the page."
            .to_string();
    }
    let current = match client.get_page(page_id).await {
        Ok(page) => page,
        Err(ConfluenceError::NotFound) => {
            return format!(
                "Error: Page with ID '{page_id}' was not found. Please provide a correct page ID."
            )
        }
        Err(ConfluenceError::Api { detail, .. }) => {
            return format!(
                "Error: An API error occurred while updating page '{page_id}'. Details: {detail}"
            )
        }
        Err(err) => {
            return format!("An unexpected error occurred while updating page '{page_id}': {err}")
        }
    };
    let updated_title = title.unwrap_or_else(|| current.title.clone());
    let updated_body = body.unwrap_or_else(|| current.body.clone());
    match client
        .update_page(page_id, &updated_title, &updated_body, current.version + 1)
        .await
    {
        Ok(()) => format!(
            "Successfully updated page with ID '{page_id}'. New Title: '{updated_title}'. URL: {}",
            client.webui_url(&current.webui)
        ),
        Err(ConfluenceError::NotFound) => format!(
            "Error: Page with ID '{page_id}' was not found. Please provide a correct page ID."
        ),
        Err(ConfluenceError::Api { detail, .. }) => format!(
            "Error: An API error occurred while updating page '{page_id}'. Details: {detail}"
        ),
        Err(err) => {
            format!("An unexpected error occurred while updating page '{page_id}': {err}")
        }
    }
}

async fn delete_page(client: &ConfluenceClient, page_id: &str) -> String {
    match client.delete_page(page_id).await {
        Ok(()) => format!("Successfully deleted page with ID '{page_id}'."),
        Err(ConfluenceError::NotFound) => format!(
            "Error: Page with ID '{page_id}' was not found. Please provide a correct page ID."
        ),
        Err(ConfluenceError::Api { detail, .. }) => format!(
            "Error: An API error occurred while deleting page '{page_id}'. Details: {detail}"
        ),
        Err(err) => {
            format!("An unexpected error occurred while deleting page '{page_id}': {err}")
        }
    }
}

async fn add_comment(client: &ConfluenceClient, page_id: &str, comment_body: &str) -> String {
    match client.add_comment(page_id, comment_body).await {
        Ok(()) => {
            // 成功后再取页面拼出浏览地址，与原实现的调用顺序一致。
            let url = client
                .get_page(page_id)
                .await
                .map(|page| client.webui_url(&page.webui))
                .unwrap_or_default();
            format!("Successfully added a comment to page with ID '{page_id}'. URL: {url}")
        }
        Err(ConfluenceError::NotFound) => format!(
            "Error: Page with ID '{page_id}' was not found. Please provide a correct page ID."
        ),
        Err(ConfluenceError::Api { detail, .. }) => format!(
            "Error: An API error occurred while adding a comment to page '{page_id}'. Details: {detail}"
        ),
        Err(err) => format!(
            "An unexpected error occurred while adding a comment to page '{page_id}': {err}"
        ),
    }
}

async fn create_space(client: &ConfluenceClient, space_key: &str, space_name: &str) -> String {
    match client.create_space(space_key, space_name).await {
        Ok(()) => format!(
            "Successfully created a new Confluence space with key '{space_key}' and name '{space_name}'."
        ),
        Err(ConfluenceError::Conflict) => format!(
            "Error: A space with key '{space_key}' already exists. Please choose a different key."
        ),
        Err(ConfluenceError::Api { detail, .. }) => format!(
            "Error: An API error occurred while creating the space '{space_key}'. Details: {detail}"
        ),
        Err(err) => format!(
            "An unexpected error occurred while creating the space '{space_key}': {err}"
        ),
    }
}

/// 由可选的检索词与空间键拼出 CQL，两者皆缺时返回 None。
pub fn build_cql(query: Option<&str>, space_key: Option<&str>) -> Option<String> {
    let mut parts = vec![r#"type = "page""#.to_string()];
    if let Some(query) = query.map(str::trim).filter(|text| !text.is_empty()) {
        parts.push(format!(r#"text ~ "{}""#, escape_cql(query)));
    }
    if let Some(space_key) = space_key.map(str::trim).filter(|text| !text.is_empty()) {
        parts.push(format!(r#"space = "{}""#, escape_cql(space_key)));
    }
    if parts.len() == 1 {
        return None;
    }
    Some(parts.join(" and "))
}

fn escape_cql(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// 缺失必填参数时在任何远端调用前拦截。final_answer 由编排层处理，不在此校验。
fn validate_required_args(name: &str, args: &Value) -> Option<String> {
    let specs = builtin_tool_specs();
    let spec = specs.iter().find(|spec| spec.name == name)?;
    for field in spec.required_fields() {
        if opt_arg_str(args, &field).is_none() {
            return Some(format!(
                "Error: Missing required argument '{field}' for tool '{name}'."
            ));
        }
    }
    None
}

fn arg_str(args: &Value, key: &str) -> String {
    opt_arg_str(args, key).unwrap_or_default()
}

/// 字符串参数读取；模型偶尔把 ID 写成数字，一并容忍。
fn opt_arg_str(args: &Value, key: &str) -> Option<String> {
    match args.get(key) {
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(num)) => Some(num.to_string()),
        _ => None,
    }
}
