// テスト共通のヘルパー
// ffmpeg や認識モデルが無い環境でもテストできるよう、各境界の代替実装を用意する
#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use speech_ingest_api::audio::{CanonicalPcm, CodecEngine, EngineStatus, PcmTarget, ResolvedFormat};
use speech_ingest_api::config::Config;
use speech_ingest_api::error::{DecodeError, PipelineResult};
use speech_ingest_api::recognition::{Recognition, SpeechRecognizer};
use tempfile::TempDir;

/// 一時ディレクトリを使うテスト用設定
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.temp_dir = artifact_dir(temp_dir).to_string_lossy().to_string();
    config.server.host = "127.0.0.1".to_string();
    config
}

pub fn artifact_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("artifacts")
}

/// ディレクトリ内に残っているファイル数
pub fn file_count(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).count(),
        Err(_) => 0,
    }
}

/// 16-bit PCM の WAV をメモリ上に作る
pub fn wav_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

/// 16-bit PCM のビッグエンディアン WAV（RIFX）を組み立てる
pub fn rifx_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let block_align = channels * 2;
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFX");
    out.extend_from_slice(&(4 + 8 + 16 + 8 + data.len() as u32).to_be_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&channels.to_be_bytes());
    out.extend_from_slice(&sample_rate.to_be_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_be_bytes());
    out.extend_from_slice(&block_align.to_be_bytes());
    out.extend_from_slice(&16u16.to_be_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&data);
    out
}

/// サイン波（インターリーブ済み、全チャンネル同一）
pub fn sine_i16(frames: usize, channels: u16, sample_rate: u32, freq: f32, amplitude: f32) -> Vec<i16> {
    let mut out = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let v = (2.0 * std::f32::consts::PI * freq * t).sin() * amplitude;
        let s = (v * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.push(s);
        }
    }
    out
}

/// 指定秒数・16kHz モノラルの WAV
pub fn mono_wav_seconds(seconds: f64) -> Vec<u8> {
    let frames = (seconds * 16_000.0).round() as usize;
    wav_i16(&sine_i16(frames, 1, 16_000, 440.0, 0.5), 1, 16_000)
}

/// 呼び出しを記録し、決まった WAV を書き出すエンジン
pub struct FakeEngine {
    output: Vec<u8>,
    calls: AtomicUsize,
    hints: Mutex<Vec<Option<ResolvedFormat>>>,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeEngine {
    pub fn new(output: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            output,
            calls: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hints(&self) -> Vec<Option<ResolvedFormat>> {
        self.hints.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<PathBuf> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodecEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn decode_and_reencode(
        &self,
        input: &Path,
        format: Option<ResolvedFormat>,
        output: &Path,
        _target: PcmTarget,
    ) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hints.lock().unwrap().push(format);
        self.inputs.lock().unwrap().push(input.to_path_buf());
        assert!(input.exists(), "input artifact must exist while the engine runs");
        std::fs::write(output, &self.output)?;
        Ok(())
    }

    async fn availability(&self) -> EngineStatus {
        EngineStatus {
            available: true,
            detail: "fake engine".to_string(),
        }
    }
}

/// 常にデコードに失敗するエンジン（出力ファイルには書きかけのデータを残す）
pub struct BrokenEngine;

#[async_trait]
impl CodecEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }

    async fn decode_and_reencode(
        &self,
        _input: &Path,
        format: Option<ResolvedFormat>,
        output: &Path,
        _target: PcmTarget,
    ) -> PipelineResult<()> {
        std::fs::write(output, b"partial")?;
        Err(DecodeError::Unreadable {
            format: format.unwrap_or(ResolvedFormat::Unknown).to_string(),
            detail: "invalid data found when processing input".to_string(),
        }
        .into())
    }

    async fn availability(&self) -> EngineStatus {
        EngineStatus {
            available: false,
            detail: "broken".to_string(),
        }
    }
}

/// 決まったテキストを返す認識器
pub struct FixedRecognizer {
    pub text: String,
    pub confidence: f32,
    pub seen_samples: AtomicUsize,
}

impl FixedRecognizer {
    pub fn new(text: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            confidence,
            seen_samples: AtomicUsize::new(0),
        })
    }
}

impl SpeechRecognizer for FixedRecognizer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn transcribe(&self, pcm: &CanonicalPcm) -> PipelineResult<Recognition> {
        self.seen_samples.store(pcm.samples.len(), Ordering::SeqCst);
        Ok(Recognition {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}
