//! 取り込み〜認識パイプラインのエラー定義
//!
//! 呼び出し側の入力不備（4xx）と、サービス自身の不変条件違反（5xx）を区別する。
use axum::http::StatusCode;
use thiserror::Error;

/// コーデックエンジンが入力を読めなかった理由
#[derive(Debug, Error)]
pub enum DecodeError {
    /// エンジン自体がホストに存在しない（運用上の問題）
    #[error(
        "codec engine `{engine}` is not available on this host ({detail}); \
         install it (e.g. `apt-get install ffmpeg` / `brew install ffmpeg`) or switch codec.engine"
    )]
    EngineMissing { engine: String, detail: String },
    /// 入力が壊れている、または未対応の形式
    #[error("failed to decode {format} input: {detail}")]
    Unreadable { format: String, detail: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing 'audio' or 'audio_base64' field in request")]
    MissingAudio,
    #[error("invalid base64 audio data: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("failed to download audio from {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("audio conversion failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to export WAV: {0}")]
    Encode(String),
    #[error("converted audio is not readable PCM: {0}")]
    MalformedPcm(String),
    #[error("audio too short: {duration:.2}s (minimum: {min}s)")]
    TooShort { duration: f64, min: f64 },
    #[error("audio too long: {duration:.2}s (maximum: {max}s)")]
    TooLong { duration: f64, max: f64 },
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("payload too large: {size} bytes > {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("recognition model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// 呼び出し側に原因がある（クライアントエラー）か
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::MissingAudio
            | PipelineError::InvalidEncoding(_)
            | PipelineError::Fetch { .. }
            | PipelineError::Decode(_)
            | PipelineError::Encode(_)
            | PipelineError::TooShort { .. }
            | PipelineError::TooLong { .. } => StatusCode::BAD_REQUEST,
            PipelineError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::MalformedPcm(_)
            | PipelineError::Recognition(_)
            | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::MissingAudio => "MISSING_AUDIO",
            PipelineError::InvalidEncoding(_) => "INVALID_ENCODING",
            PipelineError::Fetch { .. } => "FETCH_FAILED",
            PipelineError::Decode(DecodeError::EngineMissing { .. }) => "CODEC_ENGINE_MISSING",
            PipelineError::Decode(DecodeError::Unreadable { .. }) => "DECODE_FAILED",
            PipelineError::Encode(_) => "ENCODE_FAILED",
            PipelineError::MalformedPcm(_) => "MALFORMED_PCM",
            PipelineError::TooShort { .. } => "AUDIO_TOO_SHORT",
            PipelineError::TooLong { .. } => "AUDIO_TOO_LONG",
            PipelineError::Recognition(_) => "RECOGNITION_FAILED",
            PipelineError::PayloadTooLarge { .. } => "FILE_TOO_LARGE",
            PipelineError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            PipelineError::Io(_) => "INTERNAL_ERROR",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
