// LLM 适配：OpenAI 兼容的 Chat Completions 调用，仅同步非流式。
use crate::config::LlmModelConfig;
use crate::schemas::TokenUsage;
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmModelConfig,
}

impl LlmClient {
    pub fn new(http: Client, config: LlmModelConfig) -> Self {
        Self { http, config }
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .headers(self.headers())
            .json(&self.build_payload(messages))
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!("模型请求失败: {status} {body}"));
        }
        let content = body
            .get("choices")
            .and_then(|value| value.get(0))
            .and_then(|value| value.get("message"))
            .and_then(|value| value.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let usage = normalize_usage(body.get("usage"));
        Ok(LlmResponse { content, usage })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                let value = format!("Bearer {api_key}");
                if let Ok(header_value) = value.parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, header_value);
                }
            }
        }
        headers
    }

    fn build_payload(&self, messages: &[ChatMessage]) -> Value {
        // 参数抽取优先稳定性，温度默认压到 0.1。
        let temperature = self.config.temperature.unwrap_or(0.1);
        let mut payload = json!({
            "model": self.config.model.clone().unwrap_or_else(|| "gpt-4".to_string()),
            "messages": messages,
            "temperature": temperature,
            "stream": false,
        });
        if let Some(max_output) = self.config.max_output {
            if max_output > 0 {
                payload["max_tokens"] = json!(max_output);
            }
        }
        payload
    }
}

pub fn build_llm_client(config: &LlmModelConfig, http: Client) -> LlmClient {
    LlmClient::new(http, config.clone())
}

/// 模型可用的最低条件：地址、模型名与密钥齐备。
pub fn is_llm_configured(config: &LlmModelConfig) -> bool {
    config
        .base_url
        .as_ref()
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
        && config
            .model
            .as_ref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
        && config
            .api_key
            .as_ref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
}

fn normalize_usage(raw: Option<&Value>) -> Option<TokenUsage> {
    let Some(Value::Object(map)) = raw else {
        return None;
    };
    let to_u64 = |value: Option<&Value>| -> Option<u64> {
        match value {
            Some(Value::Number(num)) => num.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        }
    };
    let input = to_u64(map.get("input_tokens"))
        .or_else(|| to_u64(map.get("prompt_tokens")))
        .unwrap_or(0);
    let output = to_u64(map.get("output_tokens"))
        .or_else(|| to_u64(map.get("completion_tokens")))
        .unwrap_or(0);
    let total = to_u64(map.get("total_tokens")).unwrap_or(input + output);
    if input == 0 && output == 0 && total == 0 {
        return None;
    }
    Some(TokenUsage {
        input,
        output,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base(base_url: &str) -> LlmModelConfig {
        LlmModelConfig {
            base_url: Some(base_url.to_string()),
            api_key: Some("key".to_string()),
            model: Some("gemini-1.5-flash-latest".to_string()),
            temperature: Some(0.1),
            max_output: None,
        }
    }

    #[test]
    fn endpoint_does_not_double_v1() {
        let client = LlmClient::new(Client::new(), config_with_base("https://llm.local/v1"));
        assert_eq!(client.endpoint(), "https://llm.local/v1/chat/completions");
        let client = LlmClient::new(Client::new(), config_with_base("https://llm.local"));
        assert_eq!(client.endpoint(), "https://llm.local/v1/chat/completions");
    }

    #[test]
    fn configured_requires_all_fields() {
        assert!(is_llm_configured(&config_with_base("https://llm.local")));
        let mut missing_key = config_with_base("https://llm.local");
        missing_key.api_key = None;
        assert!(!is_llm_configured(&missing_key));
    }

    #[test]
    fn usage_normalized_from_openai_names() {
        let usage = normalize_usage(Some(&serde_json::json!({
            "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17
        })))
        .unwrap();
        assert_eq!(usage.input, 12);
        assert_eq!(usage.output, 5);
        assert_eq!(usage.total, 17);
    }
}
