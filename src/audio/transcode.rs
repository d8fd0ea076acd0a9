//! トランスコード段
//!
//! 任意形式のバイト列をコーデックエンジンに通し、RIFF/RIFX WAV のバイト列を得る。
//! 入出力の一時ファイルはこの段が所有し、戻る前に必ず削除される。
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::artifact::ArtifactStore;
use crate::audio::codec::{CodecEngine, PcmTarget};
use crate::audio::format::{has_riff_header, header_hex, ResolvedFormat};
use crate::error::{DecodeError, PipelineError, PipelineResult};

#[derive(Clone)]
pub struct Transcoder {
    store: ArtifactStore,
    engine: Arc<dyn CodecEngine>,
    target: PcmTarget,
}

impl Transcoder {
    pub fn new(store: ArtifactStore, engine: Arc<dyn CodecEngine>, target: PcmTarget) -> Self {
        Self {
            store,
            engine,
            target,
        }
    }

    pub fn engine(&self) -> &Arc<dyn CodecEngine> {
        &self.engine
    }

    /// 入力バイト列を WAV に変換する
    /// - 成功時の出力は必ず RIFF/RIFX で始まる
    pub async fn transcode(&self, input: &[u8], format: ResolvedFormat) -> PipelineResult<Vec<u8>> {
        if input.is_empty() {
            return Err(DecodeError::Unreadable {
                format: format.to_string(),
                detail: "input is empty".to_string(),
            }
            .into());
        }

        // WAV と判定されたのにヘッダが無い場合は、wav デマルチプレクサを強制しない
        let engine_hint = match format {
            ResolvedFormat::Unknown => None,
            ResolvedFormat::Wav if !has_riff_header(input) => None,
            other => Some(other),
        };

        info!(
            engine = self.engine.name(),
            format = %format,
            auto_detect = engine_hint.is_none(),
            input_bytes = input.len(),
            "transcoding to WAV"
        );
        debug!(header = %header_hex(input), "transcode input header");

        let source = self
            .store
            .acquire_with_bytes(format.file_suffix(), input)
            .await?;
        let converted = self.store.acquire(".wav")?;

        self.engine
            .decode_and_reencode(source.path(), engine_hint, converted.path(), self.target)
            .await
            .inspect_err(|err| warn!(error = %err, "codec engine failed"))?;

        let wav = converted
            .read()
            .await
            .map_err(|e| PipelineError::Encode(format!("converted file is not readable: {}", e)))?;

        if !has_riff_header(&wav) {
            return Err(PipelineError::Encode(format!(
                "output does not start with a RIFF/RIFX header (got: {})",
                if wav.is_empty() { "empty file".to_string() } else { header_hex(&wav[..wav.len().min(4)]) }
            )));
        }

        debug!(output_bytes = wav.len(), "transcode finished");
        Ok(wav)
    }
}
