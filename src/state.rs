// 全局状态：配置、Confluence 客户端与编排器的装配。
use crate::config::Config;
use crate::confluence::ConfluenceClient;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub confluence: Option<Arc<ConfluenceClient>>,
    pub orchestrator: Arc<Orchestrator>,
    pub http: reqwest::Client,
}

impl AppState {
    /// 连接信息不全时客户端保持缺位，服务照常启动并以固定文本降级。
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::new();
        let confluence =
            ConfluenceClient::from_config(&config.confluence, http.clone()).map(Arc::new);
        match &confluence {
            Some(client) => info!("Confluence 客户端已初始化: {}", client.base_url()),
            None => warn!("Confluence 连接信息不完整，工具调用将返回未初始化提示"),
        }
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            http.clone(),
            confluence.clone(),
        ));
        Ok(Self {
            config,
            confluence,
            orchestrator,
            http,
        })
    }
}
