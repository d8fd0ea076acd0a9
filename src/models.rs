use serde::{Deserialize, Serialize};

// =============================================================================
// API Request/Response Models
// =============================================================================

/// 文字起こし結果
/// - 失敗時は `ErrorResponse` を返すため、ここでは常に `success: true`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub success: bool,
    pub transcription: String,
    pub confidence: f32,
    pub language: String,
    pub model: String,
    pub audio_duration: f64,
    pub processing_time: f64,
}

/// base64 で音声を送るリクエスト
/// - `audio` と `audio_base64` は同義（後者は旧クライアント向け）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Base64TranscriptionRequest {
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
}

impl Base64TranscriptionRequest {
    /// どちらかのフィールドにある base64 文字列（空文字は未指定扱い）
    pub fn audio_data(&self) -> Option<&str> {
        self.audio
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.audio_base64.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeUrlQuery {
    pub audio_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub model: String,
    pub docs: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub codec_engine: String,
    pub codec_available: bool,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub status_code: u16,
    pub details: Option<String>,
}

// =============================================================================
// Server Statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStats {
    pub total_requests: u64,
    pub successful_transcriptions: u64,
    pub failed_transcriptions: u64,
    pub total_processing_time_ms: u64,
    pub average_processing_time_ms: f64,
    pub active_requests: usize,
    pub uptime_seconds: u64,
}

impl ServerStats {
    pub fn record_request(&mut self) {
        self.total_requests += 1;
        self.active_requests += 1;
    }

    pub fn record_success(&mut self, processing_time_ms: u64) {
        self.successful_transcriptions += 1;
        self.active_requests = self.active_requests.saturating_sub(1);
        self.total_processing_time_ms += processing_time_ms;

        if self.successful_transcriptions > 0 {
            self.average_processing_time_ms =
                self.total_processing_time_ms as f64 / self.successful_transcriptions as f64;
        }
    }

    pub fn record_failure(&mut self) {
        self.failed_transcriptions += 1;
        self.active_requests = self.active_requests.saturating_sub(1);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_transcriptions as f64 / self.total_requests as f64 * 100.0
        }
    }
}
