// API 请求与响应数据结构，保持与原有接口字段一致。
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvokeResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// /context/spaces 返回的条目，`type` 恒为 "space"。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSpace {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub name: String,
    pub id: String,
    pub url: String,
}

/// /context/pages/{space_key} 返回的条目，`type` 恒为 "page"。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub url: String,
}

/// 工具声明：名称、自然语言描述与 JSON Schema 参数表，供提示词渲染。
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    /// Schema 中标记为 required 的参数名列表。
    pub fn required_fields(&self) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "input_tokens")]
    pub input: u64,
    #[serde(rename = "output_tokens")]
    pub output: u64,
    #[serde(rename = "total_tokens")]
    pub total: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
    }
}
