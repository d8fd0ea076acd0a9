use std::net::SocketAddr;
use std::sync::Arc;

use speech_ingest_api::audio::{engine_from_config, CodecEngine};
use speech_ingest_api::config::Config;
use speech_ingest_api::handlers::{create_router, AppState};
use speech_ingest_api::recognition::ModelRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログの初期化（RUST_LOG で上書き可能）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting speech_ingest_api v{}", env!("CARGO_PKG_VERSION"));

    // 設定ファイルの読み込みと検証
    let config = Config::load_from_env()?;
    config.validate()?;

    info!(
        address = %config.server_address(),
        model = %config.recognition.model_path,
        codec = config.codec.engine.as_str(),
        temp_dir = %config.paths.temp_dir,
        "configuration loaded"
    );

    let engine: Arc<dyn CodecEngine> = Arc::from(engine_from_config(&config.codec));
    let registry = Arc::new(ModelRegistry::from_config(&config.recognition));

    let app_state = AppState::new(config.clone(), engine, Arc::clone(&registry))?
        .probe_codec()
        .await;

    // モデルは起動時に一度だけ読み込む（失敗してもサーバーは起動する）
    if let Err(e) = registry.get().await {
        warn!(error = %e, "model load failed; transcription endpoints will answer 503");
    }

    let app = create_router(app_state);

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server address: {}", e))?;

    info!("listening on http://{}", addr);
    info!("  POST /transcribe          multipart upload");
    info!("  POST /transcribe-base64   JSON base64 payload");
    info!("  POST /transcribe-url      ?audio_url=...");
    info!("  GET  /health, /stats, /");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    Ok(())
}
