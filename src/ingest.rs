//! 取り込み経路（アップロード / base64 / URL）
//!
//! どの経路も `RawAudioSubmission` を作り、共通の `AudioPipeline` に渡す。
//! 経路ごとに異なるのは、形式ヒントの作り方だけ。
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, warn};

use crate::audio::{AudioPipeline, CanonicalPcm, RawAudioSubmission};
use crate::config::FetchConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::Base64TranscriptionRequest;

/// URL 経路は常に WAV とみなす（先頭バイト判定は行わない）
pub const URL_FORMAT_HINT: &str = "wav";

#[derive(Clone)]
pub struct IngestionRouter {
    pipeline: AudioPipeline,
    client: reqwest::Client,
}

impl IngestionRouter {
    pub fn new(pipeline: AudioPipeline, fetch: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_seconds))
            .user_agent(fetch.user_agent.clone())
            .build()?;
        Ok(Self { pipeline, client })
    }

    pub fn pipeline(&self) -> &AudioPipeline {
        &self.pipeline
    }

    /// マルチパートで受け取ったファイル
    /// - ヒントは ファイル名 → Content-Type → 既定値（先頭バイト判定なし）
    pub async fn ingest_upload(
        &self,
        bytes: Vec<u8>,
        filename: Option<String>,
        content_type: Option<String>,
    ) -> PipelineResult<CanonicalPcm> {
        let submission = RawAudioSubmission {
            bytes,
            filename,
            content_type,
            format_hint: None,
        };
        info!(
            bytes = submission.bytes.len(),
            filename = submission.filename.as_deref().unwrap_or("-"),
            content_type = submission.content_type.as_deref().unwrap_or("-"),
            "upload received"
        );

        self.pipeline
            .prepare(submission, self.pipeline.resolver().without_sniffing())
            .await
    }

    /// JSON の base64 ペイロード
    /// - ヒントは 拡張子フィールド → ファイル名 → Content-Type → 先頭バイト → 既定値
    pub async fn ingest_base64(
        &self,
        request: Base64TranscriptionRequest,
    ) -> PipelineResult<CanonicalPcm> {
        let submission = decode_base64_submission(request)?;
        info!(
            bytes = submission.bytes.len(),
            filename = submission.filename.as_deref().unwrap_or("-"),
            file_extension = submission.format_hint.as_deref().unwrap_or("-"),
            "base64 payload decoded"
        );

        self.pipeline
            .prepare(submission, self.pipeline.resolver())
            .await
    }

    /// URL からダウンロードした音声
    pub async fn ingest_url(&self, url: &str) -> PipelineResult<CanonicalPcm> {
        let bytes = self.fetch(url).await?;
        let submission = RawAudioSubmission::new(bytes).with_format_hint(URL_FORMAT_HINT);

        self.pipeline
            .prepare(submission, self.pipeline.resolver())
            .await
    }

    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let fetch_err = |reason: String| PipelineError::Fetch {
            url: url.to_string(),
            reason,
        };

        info!(url = %url, "downloading audio");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "remote returned non-success status");
            return Err(fetch_err(format!("remote returned status {}", status)));
        }

        // 宣言サイズが上限を超える場合は本文を読まない
        if let Some(length) = response.content_length() {
            self.pipeline.check_size(length as usize)?;
        }

        // 宣言の無い（chunked など）本文も、上限を超えた時点で読むのをやめる
        let limit = self.pipeline.max_payload_bytes();
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_err(format!("failed to read body: {}", e)))?
        {
            let size = body.len() + chunk.len();
            if size > limit {
                warn!(url = %url, size, limit, "remote body exceeds payload limit");
                return Err(PipelineError::PayloadTooLarge { size, limit });
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url = %url, bytes = body.len(), "download finished");
        Ok(body)
    }
}

/// base64 リクエストを投稿データに変換する（一時ファイルは作らない）
pub fn decode_base64_submission(
    request: Base64TranscriptionRequest,
) -> PipelineResult<RawAudioSubmission> {
    let encoded = request.audio_data().ok_or(PipelineError::MissingAudio)?;

    // 改行や空白を含む base64 も受け付ける
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes())?;

    Ok(RawAudioSubmission {
        bytes,
        filename: request.filename,
        content_type: request.content_type,
        format_hint: request.file_extension,
    })
}
