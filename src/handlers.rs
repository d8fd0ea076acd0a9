use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::audio::{AudioPipeline, CanonicalPcm, CodecEngine, EngineStatus};
use crate::config::Config;
use crate::error::PipelineError;
use crate::ingest::IngestionRouter;
use crate::models::*;
use crate::recognition::ModelRegistry;

const SERVICE_NAME: &str = "Speech-to-Text Ingestion Service";

// =============================================================================
// Application State
// - ハンドラ間で共有する情報を集約（設定、取り込み経路、モデル、統計、起動時刻）
// - リクエスト間で共有する可変状態は統計だけ
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingest: IngestionRouter,
    pub registry: Arc<ModelRegistry>,
    pub stats: Arc<Mutex<ServerStats>>,
    pub start_time: Arc<Instant>,
    pub codec_status: Arc<EngineStatus>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: Arc<dyn CodecEngine>,
        registry: Arc<ModelRegistry>,
    ) -> anyhow::Result<Self> {
        let pipeline = AudioPipeline::new(&config, engine)?;
        let ingest = IngestionRouter::new(pipeline, &config.fetch)?;

        Ok(Self {
            config: Arc::new(config),
            ingest,
            registry,
            stats: Arc::new(Mutex::new(ServerStats::default())),
            start_time: Arc::new(Instant::now()),
            codec_status: Arc::new(EngineStatus {
                available: false,
                detail: "not probed".to_string(),
            }),
        })
    }

    /// コーデックエンジンの利用可否を確認して保持する（起動時に一度だけ）
    pub async fn probe_codec(mut self) -> Self {
        let engine = self.ingest.pipeline().engine();
        let status = engine.availability().await;
        if status.available {
            info!(engine = engine.name(), detail = %status.detail, "codec engine available");
        } else {
            warn!(
                engine = engine.name(),
                detail = %status.detail,
                "codec engine unavailable; only RIFF WAV input can be processed"
            );
        }
        self.codec_status = Arc::new(status);
        self
    }
}

// =============================================================================
// Error Handling
// - パイプラインのエラーを HTTP ステータスと機械可読コードに変換し、JSON で返す
// =============================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = err.status_code();
        if err.is_client_error() {
            warn!(code = err.code(), error = %err, "request rejected");
        } else {
            error!(code = err.code(), error = %err, "request failed");
        }
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let response = ErrorResponse {
            success: false,
            error: self.message,
            code: self.code.to_string(),
            status_code: self.status.as_u16(),
            details: self.details,
        };

        (self.status, Json(response)).into_response()
    }
}

// =============================================================================
// Request Handlers
// =============================================================================

/// マルチパートのファイルアップロード
pub async fn transcribe_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<TranscriptionResponse>> {
    let ingest = state.ingest.clone();
    run_transcription(&state, "upload", async move {
        let (bytes, filename, content_type) = read_upload(multipart).await?;
        Ok::<_, ApiError>(ingest.ingest_upload(bytes, filename, content_type).await?)
    })
    .await
}

/// base64 エンコードされた音声（JSON）
pub async fn transcribe_base64(
    State(state): State<AppState>,
    Json(request): Json<Base64TranscriptionRequest>,
) -> ApiResult<Json<TranscriptionResponse>> {
    let ingest = state.ingest.clone();
    run_transcription(&state, "base64", async move {
        Ok::<_, ApiError>(ingest.ingest_base64(request).await?)
    })
    .await
}

/// URL から取得した音声
pub async fn transcribe_url(
    State(state): State<AppState>,
    Query(query): Query<TranscribeUrlQuery>,
) -> ApiResult<Json<TranscriptionResponse>> {
    let ingest = state.ingest.clone();
    run_transcription(&state, "url", async move {
        Ok::<_, ApiError>(ingest.ingest_url(&query.audio_url).await?)
    })
    .await
}

/// 文字起こしの共通処理
/// - モデルの準備を待ってから取り込み → 認識
/// - 統計は成功・失敗のどちらでも更新する
async fn run_transcription<F>(
    state: &AppState,
    variant: &'static str,
    prepare: F,
) -> ApiResult<Json<TranscriptionResponse>>
where
    F: Future<Output = ApiResult<CanonicalPcm>>,
{
    {
        let mut stats = state.stats.lock().unwrap();
        stats.record_request();
    }

    let start_time = Instant::now();
    info!(variant, "transcription request received");

    let result = async {
        state.registry.get().await?;
        let pcm = prepare.await?;
        let audio_duration = pcm.duration_seconds;
        let recognition = state.registry.recognize(pcm).await?;
        Ok::<_, ApiError>((recognition, audio_duration))
    }
    .await;

    let processing_time = start_time.elapsed();
    match result {
        Ok((recognition, audio_duration)) => {
            {
                let mut stats = state.stats.lock().unwrap();
                stats.record_success(processing_time.as_millis() as u64);
            }
            info!(
                variant,
                audio_duration,
                processing_ms = processing_time.as_millis() as u64,
                chars = recognition.text.chars().count(),
                "transcription completed"
            );

            Ok(Json(TranscriptionResponse {
                success: true,
                transcription: recognition.text,
                confidence: recognition.confidence,
                language: state.config.recognition.language.clone(),
                model: state.registry.model_name().to_string(),
                audio_duration,
                processing_time: processing_time.as_secs_f64(),
            }))
        }
        Err(err) => {
            let mut stats = state.stats.lock().unwrap();
            stats.record_failure();
            Err(err)
        }
    }
}

/// 最初のファイルフィールドを読み込む
/// - フィールド名は問わない（`audio` / `file` / ファイル名付きのもの）
async fn read_upload(
    mut multipart: Multipart,
) -> ApiResult<(Vec<u8>, Option<String>, Option<String>)> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(e.status(), "INVALID_MULTIPART", "failed to parse multipart body")
            .with_details(e.body_text())
    })? {
        let name = field.name().unwrap_or("").to_string();
        let is_audio = field.file_name().is_some() || matches!(name.as_str(), "audio" | "file");
        if !is_audio {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::new(e.status(), "INVALID_MULTIPART", "failed to read uploaded file")
                .with_details(e.body_text())
        })?;

        return Ok((bytes.to_vec(), filename, content_type));
    }

    Err(PipelineError::MissingAudio.into())
}

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "Speech-to-Text API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.registry.model_name().to_string(),
        docs: "POST /transcribe, POST /transcribe-base64, POST /transcribe-url?audio_url=".to_string(),
    })
}

/// ヘルスチェック
/// - モデルが読み込めていなくてもサーバー自体は healthy を返す
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.registry.is_loaded(),
        model_name: state.registry.model_name().to_string(),
        codec_engine: state.ingest.pipeline().engine().name().to_string(),
        codec_available: state.codec_status.available,
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<ServerStats> {
    let mut stats = state.stats.lock().unwrap().clone();
    stats.uptime_seconds = state.start_time.elapsed().as_secs();
    Json(stats)
}

// =============================================================================
// Router
// =============================================================================

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.server.cors_origins;
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// ルーターの構築
pub fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    Router::new()
        // 文字起こしエンドポイント
        .route("/transcribe", post(transcribe_upload))
        .route("/transcribe-base64", post(transcribe_base64))
        .route("/transcribe-url", post(transcribe_url))
        // 情報取得エンドポイント
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        // ミドルウェアの追加
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config))
                .layer(DefaultBodyLimit::max(config.server.max_request_size)),
        )
        .with_state(state)
}
