// 编排层：运行时惰性单次构建 + 推理/工具往返循环。
use crate::config::Config;
use crate::confluence::ConfluenceClient;
use crate::llm::{build_llm_client, is_llm_configured, ChatMessage, LlmClient};
use crate::prompting::build_system_prompt;
use crate::schemas::{TokenUsage, ToolSpec};
use crate::tools::{builtin_tool_specs, execute_tool, ToolContext, FINAL_ANSWER_TOOL};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// 编排层错误：code 供 HTTP 层映射状态码，message 原样透出。
#[derive(Debug)]
pub struct OrchestratorError {
    code: &'static str,
    message: String,
}

impl OrchestratorError {
    fn llm_unavailable(message: String) -> Self {
        Self {
            code: "llm_unavailable",
            message,
        }
    }

    fn internal(message: String) -> Self {
        Self {
            code: "internal_error",
            message,
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OrchestratorError {}

/// 构建完成后不可变的运行时：模型句柄、系统提示词与工具目录。
pub struct AgentRuntime {
    llm: LlmClient,
    system_prompt: String,
    tool_specs: Vec<ToolSpec>,
}

/// 显式两态状态机：未初始化 / 就绪。构建失败停留在未初始化，
/// 下一次请求重新尝试（不在内部自动重试）。
enum RuntimeState {
    Uninitialized,
    Ready(Arc<AgentRuntime>),
}

pub struct AgentAnswer {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
struct ToolCall {
    name: String,
    arguments: Value,
}

pub struct Orchestrator {
    config: Config,
    http: reqwest::Client,
    confluence: Option<Arc<ConfluenceClient>>,
    runtime: Mutex<RuntimeState>,
    constructions: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        http: reqwest::Client,
        confluence: Option<Arc<ConfluenceClient>>,
    ) -> Self {
        Self {
            config,
            http,
            confluence,
            runtime: Mutex::new(RuntimeState::Uninitialized),
            constructions: AtomicU64::new(0),
        }
    }

    /// 运行时构建次数，进程内恒 ≤ 1 次成功；并发初始化测试依赖此计数。
    pub fn runtime_construction_count(&self) -> u64 {
        self.constructions.load(Ordering::SeqCst)
    }

    /// 惰性单次构建。锁内先复查状态，竞争初始化的请求全部串行通过，
    /// 失败者观察到的一定是赢家完整构建后的实例。
    pub fn ensure_runtime(&self) -> Result<Arc<AgentRuntime>, OrchestratorError> {
        let mut state = self.runtime.lock();
        if let RuntimeState::Ready(runtime) = &*state {
            return Ok(runtime.clone());
        }
        if !is_llm_configured(&self.config.llm) {
            return Err(OrchestratorError::llm_unavailable(
                "Error: The language model is not configured. Set GEMINI_API_KEY and GEMINI_BASE_URL."
                    .to_string(),
            ));
        }
        info!("首个请求到达，构建 Agent 运行时");
        let tool_specs = builtin_tool_specs();
        let runtime = Arc::new(AgentRuntime {
            llm: build_llm_client(&self.config.llm, self.http.clone()),
            system_prompt: build_system_prompt(&tool_specs),
            tool_specs,
        });
        self.constructions.fetch_add(1, Ordering::SeqCst);
        *state = RuntimeState::Ready(runtime.clone());
        Ok(runtime)
    }

    /// 单个请求同步跑到底：每轮询问模型，抽取工具调用并执行，
    /// 把观察结果作为下一轮输入。无取消、无超时、无流式。
    pub async fn run(&self, prompt: &str) -> Result<AgentAnswer, OrchestratorError> {
        let runtime = self.ensure_runtime()?;
        // 每个请求持有独立的不可变输入与独立的消息序列，请求间无共享可变状态。
        let mut messages = vec![
            ChatMessage::system(runtime.system_prompt.clone()),
            ChatMessage::user(prompt.to_string()),
        ];
        let mut usage_total = TokenUsage::default();
        let mut saw_usage = false;
        let mut last_content = String::new();

        let max_rounds = self.config.agent.max_rounds.max(1);
        for round in 0..max_rounds {
            let response = runtime
                .llm
                .complete(&messages)
                .await
                .map_err(|err| OrchestratorError::internal(err.to_string()))?;
            if let Some(usage) = &response.usage {
                usage_total.accumulate(usage);
                saw_usage = true;
            }
            last_content = response.content.clone();

            let calls = parse_tool_calls(&response.content, &runtime.tool_specs);
            let Some(call) = calls.into_iter().next() else {
                // 没有工具调用即视为终答。
                return Ok(AgentAnswer {
                    text: strip_tool_calls(&response.content),
                    usage: saw_usage.then_some(usage_total),
                });
            };

            if call.name == FINAL_ANSWER_TOOL {
                let text = call
                    .arguments
                    .get("content")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| strip_tool_calls(&response.content));
                return Ok(AgentAnswer {
                    text,
                    usage: saw_usage.then_some(usage_total),
                });
            }

            let ctx = ToolContext {
                confluence: self.confluence.as_deref(),
                result_limit: self.config.agent.result_limit,
            };
            let observation = execute_tool(&ctx, &call.name, &call.arguments).await;
            info!(round, tool = %call.name, "工具执行完成");
            messages.push(ChatMessage::assistant(response.content));
            messages.push(ChatMessage::user(format!("Observation: {observation}")));
        }

        warn!(max_rounds, "推理轮数耗尽，返回最后一轮文本");
        let mut text = strip_tool_calls(&last_content);
        if text.is_empty() {
            text = "The agent stopped before producing a final answer.".to_string();
        } else {
            text.push_str("\n(Stopped after reaching the reasoning round limit.)");
        }
        Ok(AgentAnswer {
            text,
            usage: saw_usage.then_some(usage_total),
        })
    }
}

fn compile_regex(pattern: &str, label: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            error!("正则编译失败 {label}: {err}");
            None
        }
    }
}

fn tool_call_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        compile_regex(
            r"(?is)<tool_call\b[^>]*>(?P<payload>.*?)</tool_call\s*>",
            "tool_call_block",
        )
    })
    .as_ref()
}

/// 扫描一段文本中从 start 开始的完整 JSON 值终点，容忍字符串内的括号与转义。
fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for index in start..bytes.len() {
        let ch = bytes[index];
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            if ch == b'\\' {
                escape = true;
                continue;
            }
            if ch == b'"' {
                in_string = false;
            }
            continue;
        }
        if ch == b'"' {
            in_string = true;
            continue;
        }
        if ch == b'{' || ch == b'[' {
            stack.push(ch);
            continue;
        }
        if ch == b'}' || ch == b']' {
            let opening = stack.pop()?;
            if (opening == b'{' && ch != b'}') || (opening == b'[' && ch != b']') {
                return None;
            }
            if stack.is_empty() {
                return Some(index + 1);
            }
        }
    }
    None
}

fn extract_json_values(payload: &str) -> Vec<Value> {
    let bytes = payload.as_bytes();
    let mut values = Vec::new();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'{' && bytes[index] != b'[' {
            index += 1;
            continue;
        }
        let Some(end) = find_json_end(payload, index) else {
            index += 1;
            continue;
        };
        let Some(candidate) = payload.get(index..end) else {
            index += 1;
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            values.push(value);
            index = end;
            continue;
        }
        index += 1;
    }
    values
}

/// 兼容模型常见的字段别名拼写，统一为 name/arguments。
fn normalize_tool_call(map: &serde_json::Map<String, Value>) -> Option<ToolCall> {
    let name_value = map
        .get("name")
        .or_else(|| map.get("tool"))
        .or_else(|| map.get("tool_name"))?;
    let name = match name_value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    };
    if name.is_empty() {
        return None;
    }
    let args_value = map
        .get("arguments")
        .or_else(|| map.get("args"))
        .or_else(|| map.get("parameters"))
        .or_else(|| map.get("input"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let arguments = match args_value {
        Value::Null => json!({}),
        Value::String(text) => {
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }))
        }
        other => other,
    };
    Some(ToolCall { name, arguments })
}

fn collect_tool_calls_from_value(value: &Value, calls: &mut Vec<ToolCall>) {
    match value {
        Value::Object(map) => {
            if let Some(call) = normalize_tool_call(map) {
                calls.push(call);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tool_calls_from_value(item, calls);
            }
        }
        _ => {}
    }
}

/// 从模型回复中抽取工具调用：优先 <tool_call> 块，其次正文里的裸 JSON。
/// 裸 JSON 仅在名称命中已注册工具时采信，避免把回答里的数据误判为调用。
fn parse_tool_calls(content: &str, specs: &[ToolSpec]) -> Vec<ToolCall> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let mut calls = Vec::new();
    if let Some(regex) = tool_call_block_regex() {
        for captures in regex.captures_iter(content) {
            let payload = captures.name("payload").map(|m| m.as_str()).unwrap_or("");
            for value in extract_json_values(payload) {
                collect_tool_calls_from_value(&value, &mut calls);
            }
        }
    }
    if calls.is_empty() {
        for value in extract_json_values(content) {
            collect_tool_calls_from_value(&value, &mut calls);
        }
        calls.retain(|call| specs.iter().any(|spec| spec.name == call.name));
    }
    calls
}

/// 去掉回复中的工具调用标记，剩余文本作为展示内容。
fn strip_tool_calls(content: &str) -> String {
    match tool_call_block_regex() {
        Some(regex) => regex.replace_all(content, "").trim().to_string(),
        None => content.trim().to_string(),
    }
}
