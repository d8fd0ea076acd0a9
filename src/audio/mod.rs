//! 音声の取り込み〜正規化パイプライン
//!
//! 形式判定 → （必要なら）トランスコード → 正規化 → 長さ検証
//!
//! すべての段はリクエストごとに独立して実行され、共有される可変状態は無い。
pub mod artifact;
pub mod codec;
pub mod format;
pub mod normalize;
pub mod transcode;
pub mod validate;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

pub use artifact::{ArtifactStore, TempArtifact};
pub use codec::{engine_from_config, CodecEngine, EngineStatus, FfmpegEngine, PcmTarget, SymphoniaEngine};
pub use format::{FormatResolver, HintSource, RawAudioSubmission, ResolvedFormat};
pub use normalize::{CanonicalPcm, SignalNormalizer};
pub use transcode::Transcoder;
pub use validate::DurationValidator;

/// 取り込んだバイト列を `CanonicalPcm` に変換するパイプライン
#[derive(Clone)]
pub struct AudioPipeline {
    resolver: FormatResolver,
    transcoder: Transcoder,
    normalizer: SignalNormalizer,
    validator: DurationValidator,
    max_payload_bytes: usize,
}

impl AudioPipeline {
    /// 設定とコーデックエンジンからパイプラインを構築する
    pub fn new(config: &Config, engine: Arc<dyn CodecEngine>) -> PipelineResult<Self> {
        let default_format = ResolvedFormat::from_extension(&config.audio.default_format)
            .unwrap_or(ResolvedFormat::M4a);
        let store = ArtifactStore::new(&config.paths.temp_dir)?;
        let target = PcmTarget {
            sample_rate: config.audio.target_sample_rate,
            channels: config.audio.target_channels,
        };

        Ok(Self {
            resolver: FormatResolver::new(default_format),
            transcoder: Transcoder::new(store, engine, target),
            normalizer: SignalNormalizer::new(
                config.audio.target_sample_rate,
                config.audio.peak_target,
            ),
            validator: DurationValidator::new(
                config.audio.min_duration_seconds,
                config.audio.max_duration_seconds,
            ),
            max_payload_bytes: config.max_file_size_bytes(),
        })
    }

    /// 既定の（先頭バイト判定ありの）リゾルバ
    pub fn resolver(&self) -> FormatResolver {
        self.resolver
    }

    pub fn engine(&self) -> &Arc<dyn CodecEngine> {
        self.transcoder.engine()
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// サイズ上限の確認（一時ファイルを作る前に行う）
    pub fn check_size(&self, size: usize) -> PipelineResult<()> {
        if size > self.max_payload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        Ok(())
    }

    /// 投稿データを正規化済み PCM にする
    pub async fn prepare(
        &self,
        submission: RawAudioSubmission,
        resolver: FormatResolver,
    ) -> PipelineResult<CanonicalPcm> {
        self.check_size(submission.bytes.len())?;

        let (format, source) = resolver.resolve(&submission);
        info!(
            format = %format,
            hint_source = source.as_str(),
            bytes = submission.bytes.len(),
            filename = submission.filename.as_deref().unwrap_or("-"),
            "resolved audio format"
        );
        debug!(header = %format::header_hex(&submission.bytes), "submission header");

        let wav = if needs_transcoding(format, &submission.bytes) {
            self.transcoder.transcode(&submission.bytes, format).await?
        } else {
            debug!("input is already RIFF WAV, skipping transcoding");
            submission.bytes
        };

        let normalizer = self.normalizer;
        let pcm = tokio::task::spawn_blocking(move || normalizer.normalize_wav(&wav))
            .await
            .map_err(|e| PipelineError::MalformedPcm(format!("normalizer task failed: {}", e)))??;

        self.validator.validate(pcm.duration_seconds)?;

        info!(
            duration_secs = pcm.duration_seconds,
            samples = pcm.samples.len(),
            "audio ready for recognition"
        );
        Ok(pcm)
    }
}

/// WAV と判定され、かつ RIFF/RIFX ヘッダが確認できた場合のみ変換を省く
pub fn needs_transcoding(format: ResolvedFormat, bytes: &[u8]) -> bool {
    format != ResolvedFormat::Wav || !format::has_riff_header(bytes)
}
