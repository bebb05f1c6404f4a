use anyhow::Context;
use poem::listener::TcpListener;
use render_proxy::core::config::RenderConfig;
use render_proxy::core::pipeline::RenderPipeline;
use render_proxy::settings::get_config;
use render_proxy::{AppState, build_app};
use tracing_subscriber::EnvFilter;

use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config()?;

    // Logging to File
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .init();

    tracing::info!("Initializing Render Proxy...");
    tracing::info!("run with config: {:?}", config);

    let render_config = RenderConfig::from_file(&config.render_config)?;
    render_config
        .validate()
        .context("Render configuration failed startup checks")?;
    tracing::info!(
        exec = %render_config.exec.display(),
        options = render_config.allowed_options.len(),
        reputation_check = render_config.virustotal.enabled,
        "Render configuration loaded"
    );

    let pipeline = RenderPipeline::new(Arc::new(render_config))
        .context("Failed to initialize the reputation client")?;

    let app = build_app(AppState::new(pipeline), &config);
    tracing::info!("run server on {}:{}", config.host, config.port);
    poem::Server::new(TcpListener::bind(format!(
        "{}:{}",
        config.host, config.port
    )))
    .run(app)
    .await
    .context("Server terminated")
}
