// Rust 入口：挂载 API 路由、前端静态页与优雅停机。
mod api;
mod config;
mod confluence;
mod llm;
mod orchestrator;
mod prompting;
mod schemas;
mod shutdown;
mod state;
mod tools;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use config::Config;
use shutdown::shutdown_signal;
use state::AppState;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_default();
    init_tracing(&config);
    let state = Arc::new(AppState::new(config.clone())?);

    let app = api::build_router(state.clone());
    let app = mount_web_client(app, "web/index.html", "/web");

    let cors = build_cors(&config);
    let app = app
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("Confluence Agent 服务已启动: http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        warn!("服务退出异常: {err}");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = config.observability.log_level.trim();
    let default_level = if default_level.is_empty() {
        "info".to_string()
    } else {
        default_level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 前端页面为可选资产，缺失时只提供纯 API。
fn mount_web_client<S>(app: Router<S>, file: &str, route: &str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !Path::new(file).exists() {
        warn!("前端页面缺失，跳过挂载: {file}");
        return app;
    }
    app.route_service(route, ServeFile::new(file))
}

fn build_cors(config: &Config) -> CorsLayer {
    // 读取配置并转换为 tower-http 的 CORS 规则，默认全放行。
    let mut cors = CorsLayer::new();

    match &config.cors.allow_origins {
        Some(origins) if !origins.iter().any(|value| value == "*") => {
            let values = origins
                .iter()
                .filter_map(|value| value.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>();
            if values.is_empty() {
                cors = cors.allow_origin(Any);
            } else {
                cors = cors.allow_origin(AllowOrigin::list(values));
            }
        }
        _ => {
            cors = cors.allow_origin(Any);
        }
    }

    match &config.cors.allow_methods {
        Some(methods) if !methods.iter().any(|value| value == "*") => {
            let values = methods
                .iter()
                .filter_map(|value| value.parse::<Method>().ok())
                .collect::<Vec<_>>();
            if values.is_empty() {
                cors = cors.allow_methods(Any);
            } else {
                cors = cors.allow_methods(AllowMethods::list(values));
            }
        }
        _ => {
            cors = cors.allow_methods(Any);
        }
    }

    match &config.cors.allow_headers {
        Some(headers) if !headers.iter().any(|value| value == "*") => {
            let values = headers
                .iter()
                .filter_map(|value| value.parse::<HeaderName>().ok())
                .collect::<Vec<_>>();
            if values.is_empty() {
                cors = cors.allow_headers(Any);
            } else {
                cors = cors.allow_headers(AllowHeaders::list(values));
            }
        }
        _ => {
            cors = cors.allow_headers(Any);
        }
    }

    cors
}
