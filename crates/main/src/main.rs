//! 主应用程序入口
//!
//! 加载配置，连接 PostgreSQL 和 Redis，启动 Axum 实时通信服务。

use anyhow::Context;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;

    tracing::info!(
        database = %config.database.url.split('@').next_back().unwrap_or("unknown"),
        redis = %config.redis.url,
        "连接存储后端"
    );

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("初始化基础设施失败")?;

    let state = AppState::assemble(
        infrastructure.message_store_trait(),
        infrastructure.presence_trait(),
        &config,
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {address}"))?;

    tracing::info!("自习室实时服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl+C 信号");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听 SIGTERM 信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("收到关闭信号，开始优雅停机");
}
