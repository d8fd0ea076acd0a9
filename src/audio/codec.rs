//! 外部コーデックエンジンとの境界
//!
//! 任意のコンテナ/コーデックを読み込み、PCM の WAV ファイルとして書き出す。
//! エンジン本体が存在しない場合と、入力が壊れている場合はエラーで区別する。
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::audio::format::ResolvedFormat;
use crate::config::{CodecConfig, CodecEngineKind};
use crate::error::{DecodeError, PipelineError, PipelineResult};

/// 書き出し時に要求する PCM 形式（最適化目的。最終的な適合は正規化で行う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmTarget {
    pub sample_rate: u32,
    pub channels: u16,
}

/// エンジンの利用可否（起動時チェックと /health で使用）
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub available: bool,
    pub detail: String,
}

#[async_trait]
pub trait CodecEngine: Send + Sync {
    fn name(&self) -> &str;

    /// `input` を読み込み、`output` に RIFF/RIFX WAV を書き出す
    /// - `format` が `None` の場合はエンジン側の自動判定に任せる
    async fn decode_and_reencode(
        &self,
        input: &Path,
        format: Option<ResolvedFormat>,
        output: &Path,
        target: PcmTarget,
    ) -> PipelineResult<()>;

    async fn availability(&self) -> EngineStatus;
}

/// 設定に応じたエンジンを構築
pub fn engine_from_config(config: &CodecConfig) -> Box<dyn CodecEngine> {
    match config.engine {
        CodecEngineKind::Ffmpeg => Box::new(FfmpegEngine::new(
            &config.ffmpeg_path,
            Duration::from_secs(config.timeout_seconds),
        )),
        CodecEngineKind::Symphonia => Box::new(SymphoniaEngine),
    }
}

// =============================================================================
// FFmpeg
// =============================================================================

#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// 起動失敗の分類（存在しない場合のみ EngineMissing、それ以外はホスト側の I/O エラー）
    fn spawn_error(&self, err: std::io::Error) -> PipelineError {
        if err.kind() == std::io::ErrorKind::NotFound {
            return DecodeError::EngineMissing {
                engine: self.program.display().to_string(),
                detail: err.to_string(),
            }
            .into();
        }
        warn!(program = %self.program.display(), error = %err, "failed to start ffmpeg");
        PipelineError::Io(std::io::Error::new(
            err.kind(),
            format!("failed to start `{}`: {}", self.program.display(), err),
        ))
    }
}

/// 形式ごとの ffmpeg デマルチプレクサ名
fn ffmpeg_demuxer(format: ResolvedFormat) -> Option<&'static str> {
    match format {
        ResolvedFormat::Wav => Some("wav"),
        ResolvedFormat::Mp3 => Some("mp3"),
        ResolvedFormat::M4a | ResolvedFormat::ThreeGp => Some("mov"),
        ResolvedFormat::Flac => Some("flac"),
        ResolvedFormat::Ogg => Some("ogg"),
        ResolvedFormat::Aac => Some("aac"),
        ResolvedFormat::Wma => Some("asf"),
        ResolvedFormat::Unknown => None,
    }
}

/// stderr の末尾数行だけを残す
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(4);
    lines[start..].join(" | ")
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn decode_and_reencode(
        &self,
        input: &Path,
        format: Option<ResolvedFormat>,
        output: &Path,
        target: PcmTarget,
    ) -> PipelineResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"]);
        if let Some(demuxer) = format.and_then(ffmpeg_demuxer) {
            cmd.args(["-f", demuxer]);
        }
        cmd.arg("-i")
            .arg(input)
            .arg("-ac")
            .arg(target.channels.to_string())
            .arg("-ar")
            .arg(target.sample_rate.to_string())
            .args(["-acodec", "pcm_s16le", "-f", "wav"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let format_label = format.unwrap_or(ResolvedFormat::Unknown).to_string();
        debug!(input = %input.display(), output = %output.display(), format = %format_label, "running ffmpeg");

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| DecodeError::Unreadable {
                format: format_label.clone(),
                detail: format!("ffmpeg timed out after {}s", self.timeout.as_secs()),
            })?;

        let out = result.map_err(|e| self.spawn_error(e))?;
        if !out.status.success() {
            return Err(DecodeError::Unreadable {
                format: format_label,
                detail: format!("ffmpeg exited with {}: {}", out.status, stderr_tail(&out.stderr)),
            }
            .into());
        }

        Ok(())
    }

    async fn availability(&self) -> EngineStatus {
        let probe = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(out)) if out.status.success() => EngineStatus {
                available: true,
                detail: String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .next()
                    .unwrap_or("ffmpeg")
                    .to_string(),
            },
            Ok(Ok(out)) => EngineStatus {
                available: false,
                detail: format!("`{} -version` exited with {}", self.program.display(), out.status),
            },
            Ok(Err(err)) => EngineStatus {
                available: false,
                detail: self.spawn_error(err).to_string(),
            },
            Err(_) => EngineStatus {
                available: false,
                detail: "ffmpeg -version timed out".to_string(),
            },
        }
    }
}

// =============================================================================
// Symphonia (in-process)
// =============================================================================

/// プロセス内でデコードし、16-bit PCM WAV を書き出すエンジン
/// - チャンネル数とサンプルレートは入力のまま（変換は正規化で行う）
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaEngine;

#[async_trait]
impl CodecEngine for SymphoniaEngine {
    fn name(&self) -> &str {
        "symphonia"
    }

    async fn decode_and_reencode(
        &self,
        input: &Path,
        format: Option<ResolvedFormat>,
        output: &Path,
        _target: PcmTarget,
    ) -> PipelineResult<()> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || transcode_with_symphonia(&input, format, &output))
            .await
            .map_err(|e| PipelineError::Encode(format!("decoder thread failed: {}", e)))?
    }

    async fn availability(&self) -> EngineStatus {
        EngineStatus {
            available: true,
            detail: "symphonia (built-in)".to_string(),
        }
    }
}

struct DecodedAudio {
    interleaved: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

fn transcode_with_symphonia(
    input: &Path,
    format: Option<ResolvedFormat>,
    output: &Path,
) -> PipelineResult<()> {
    let label = format.unwrap_or(ResolvedFormat::Unknown).to_string();
    let decoded = decode_with_symphonia(input, format).map_err(|detail| DecodeError::Unreadable {
        format: label,
        detail,
    })?;

    let spec = hound::WavSpec {
        channels: decoded.channels,
        sample_rate: decoded.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .map_err(|e| PipelineError::Encode(format!("cannot create WAV writer: {}", e)))?;
    for sample in decoded.interleaved {
        writer
            .write_sample(sample)
            .map_err(|e| PipelineError::Encode(format!("cannot write WAV sample: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| PipelineError::Encode(format!("cannot finalize WAV: {}", e)))?;
    Ok(())
}

fn decode_with_symphonia(
    path: &Path,
    format: Option<ResolvedFormat>,
) -> Result<DecodedAudio, String> {
    let file = File::open(path).map_err(|e| format!("cannot open input: {}", e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(format) = format.filter(|f| *f != ResolvedFormat::Unknown) {
        hint.with_extension(format.as_str());
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| format!("probe: {}", e))?;
    let mut reader = probed.format;

    let (track_id, codec_params) = {
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| "no audio track found".to_string())?;
        (track.id, track.codec_params.clone())
    };

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &dec_opts)
        .map_err(|e| format!("codec: {}", e))?;

    let mut interleaved = Vec::new();
    let mut channels = codec_params.channels.map(|c| c.count() as u16);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(format!("packet: {}", err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                let spec = *audio_buf.spec();
                if audio_buf.frames() == 0 {
                    continue;
                }
                channels.get_or_insert(spec.channels.count() as u16);
                let mut buf = SampleBuffer::<i16>::new(audio_buf.frames() as u64, spec);
                buf.copy_interleaved_ref(audio_buf);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "skipping corrupt audio frame");
                continue;
            }
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(format!("decode: {}", err)),
        }
    }

    if interleaved.is_empty() {
        return Err("no audio samples decoded".to_string());
    }

    let sample_rate = decoder
        .codec_params()
        .sample_rate
        .or(codec_params.sample_rate)
        .ok_or_else(|| "unknown sample rate".to_string())?;

    Ok(DecodedAudio {
        interleaved,
        sample_rate,
        channels: channels.unwrap_or(1).max(1),
    })
}
