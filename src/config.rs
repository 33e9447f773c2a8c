// 配置读取与覆盖合并：YAML 文件为基底，环境变量优先。
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    #[serde(default)]
    pub llm: LlmModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
}

/// Confluence 站点连接信息。任一必填项为空则客户端保持未初始化，
/// 进程照常启动，工具调用统一返回固定的错误文本。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfluenceConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl ConfluenceConfig {
    pub fn is_configured(&self) -> bool {
        non_blank(&self.base_url) && non_blank(&self.username) && non_blank(&self.api_token)
    }

    /// 规范化站点地址：去掉尾部斜杠，便于后续拼接路径。
    pub fn normalized_base_url(&self) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModelConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output: Option<u32>,
}

impl Default for LlmModelConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: Some("gemini-1.5-flash-latest".to_string()),
            // 参数抽取要求稳定输出，默认低随机性。
            temperature: Some(0.1),
            max_output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 单次请求允许的推理轮数上限，防止工具循环不收敛。
    pub max_rounds: u32,
    /// 搜索与列表类操作的固定条数上限。
    pub result_limit: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 6,
            result_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 读取配置文件并应用环境变量覆盖。文件缺失时直接使用默认值。
    pub fn load(path: &Path) -> Self {
        let mut config = match fs::read_to_string(path) {
            Ok(text) => match serde_yaml::from_str::<Config>(&text) {
                Ok(config) => config,
                Err(err) => {
                    warn!("配置文件解析失败，回退默认配置: {err}");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };
        config.apply_env_overrides();
        config
    }

    pub fn load_default() -> Self {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// 环境变量覆盖，沿用原部署的 .env 命名。
    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_non_blank("CONFLUENCE_SERVER") {
            self.confluence.base_url = Some(value);
        }
        if let Some(value) = env_non_blank("CONFLUENCE_USERNAME") {
            self.confluence.username = Some(value);
        }
        if let Some(value) = env_non_blank("CONFLUENCE_API_TOKEN") {
            self.confluence.api_token = Some(value);
        }
        if let Some(value) = env_non_blank("GEMINI_API_KEY") {
            self.llm.api_key = Some(value);
        }
        if let Some(value) = env_non_blank("GEMINI_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = env_non_blank("CONFLUENCE_AGENT_HOST") {
            self.server.host = value;
        }
        if let Some(value) = env_non_blank("CONFLUENCE_AGENT_PORT") {
            match value.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("CONFLUENCE_AGENT_PORT 非法，忽略: {value}"),
            }
        }
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value
        .as_ref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

fn env_non_blank(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
