//! 信号の正規化
//!
//! WAV → f32 変換 → モノラル化 → リサンプル → ピーク正規化 → 長さ算出
use std::io::Cursor;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

const RESAMPLE_CHUNK: usize = 1024;

/// 認識モデルへ渡す唯一の形式（モノラル・固定サンプルレート・f32）
#[derive(Debug, Clone)]
pub struct CanonicalPcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl CanonicalPcm {
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignalNormalizer {
    target_sample_rate: u32,
    peak_target: f32,
}

impl SignalNormalizer {
    pub fn new(target_sample_rate: u32, peak_target: f32) -> Self {
        Self {
            target_sample_rate,
            peak_target,
        }
    }

    /// WAV バイト列を解析して正規化する
    /// - ビッグエンディアン（RIFX）はリトルエンディアンに並べ替えてから読む
    pub fn normalize_wav(&self, wav: &[u8]) -> PipelineResult<CanonicalPcm> {
        let swapped;
        let wav = if wav.starts_with(b"RIFX") {
            swapped = rifx_to_riff(wav)?;
            swapped.as_slice()
        } else {
            wav
        };

        let mut reader = hound::WavReader::new(Cursor::new(wav))
            .map_err(|e| PipelineError::MalformedPcm(format!("failed to parse WAV: {}", e)))?;
        let spec = reader.spec();
        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            format = ?spec.sample_format,
            "parsed WAV header"
        );

        let interleaved = read_samples(&mut reader, spec)?;
        self.normalize_interleaved(interleaved, spec.channels, spec.sample_rate)
    }

    /// インターリーブ済みの f32 サンプルを正規化する
    pub fn normalize_interleaved(
        &self,
        interleaved: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    ) -> PipelineResult<CanonicalPcm> {
        if channels == 0 || sample_rate == 0 {
            return Err(PipelineError::MalformedPcm(format!(
                "invalid stream spec: {} channels at {} Hz",
                channels, sample_rate
            )));
        }

        let mono = downmix_to_mono(interleaved, channels);

        let mut samples = if sample_rate != self.target_sample_rate {
            resample(&mono, sample_rate, self.target_sample_rate)?
        } else {
            mono
        };

        peak_normalize(&mut samples, self.peak_target);

        let duration_seconds = samples.len() as f64 / self.target_sample_rate as f64;
        debug!(
            samples = samples.len(),
            duration_secs = duration_seconds,
            "audio normalized to canonical PCM"
        );

        Ok(CanonicalPcm {
            samples,
            sample_rate: self.target_sample_rate,
            duration_seconds,
        })
    }
}

/// fmt チャンク内のフィールド幅（format, channels, rate, byte_rate, block_align, bits,
/// cb_size, valid_bits, channel_mask）。サブフォーマット GUID はそのまま残す
const FMT_FIELD_WIDTHS: [usize; 9] = [2, 2, 4, 4, 2, 2, 2, 2, 4];

/// RIFX（ビッグエンディアン WAV）を RIFF に変換する
///
/// チャンクサイズと fmt の各フィールド、data のサンプルを反転する。
/// その他のチャンクは中身を変えずに写す。
fn rifx_to_riff(wav: &[u8]) -> PipelineResult<Vec<u8>> {
    let malformed = |what: &str| PipelineError::MalformedPcm(format!("invalid RIFX WAV: {}", what));

    if wav.len() < 12 || !wav.starts_with(b"RIFX") || &wav[8..12] != b"WAVE" {
        return Err(malformed("missing RIFX/WAVE header"));
    }

    let mut out = Vec::with_capacity(wav.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(b"WAVE");

    let mut sample_bytes: Option<usize> = None;
    let mut pos = 12;
    while pos + 8 <= wav.len() {
        let id = &wav[pos..pos + 4];
        let declared = u32::from_be_bytes([wav[pos + 4], wav[pos + 5], wav[pos + 6], wav[pos + 7]]);
        let body_start = pos + 8;
        // 途中で切れた data チャンクは残りのバイトだけ使う
        let body_end = body_start.saturating_add(declared as usize).min(wav.len());
        let mut body = wav[body_start..body_end].to_vec();

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(malformed("fmt chunk too short"));
                }
                let mut offset = 0;
                for width in FMT_FIELD_WIDTHS {
                    if offset + width > body.len() {
                        break;
                    }
                    body[offset..offset + width].reverse();
                    offset += width;
                }
                let bits = u16::from_le_bytes([body[14], body[15]]);
                sample_bytes = Some((bits as usize).div_ceil(8));
            }
            b"data" => {
                let width = sample_bytes.ok_or_else(|| malformed("data chunk before fmt chunk"))?;
                if width > 1 {
                    for sample in body.chunks_exact_mut(width) {
                        sample.reverse();
                    }
                }
            }
            _ => {}
        }

        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        if body.len() % 2 == 1 {
            out.push(0);
        }

        pos = body_end + (declared as usize % 2);
    }

    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    Ok(out)
}

/// 整数 PCM を [-1.0, 1.0] の f32 に変換して読み込む
fn read_samples<R: std::io::Read>(
    reader: &mut hound::WavReader<R>,
    spec: hound::WavSpec,
) -> PipelineResult<Vec<f32>> {
    let malformed =
        |e: hound::Error| PipelineError::MalformedPcm(format!("failed to read samples: {}", e));

    match (spec.sample_format, spec.bits_per_sample) {
        // hound は 8-bit の符号なしサンプルを 128 を引いた i8 として返す
        (hound::SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<Result<_, _>>()
            .map_err(malformed),
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()
            .map_err(malformed),
        (hound::SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<Result<_, _>>()
            .map_err(malformed),
        (hound::SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| (v as f64 / 2147483648.0) as f32))
            .collect::<Result<_, _>>()
            .map_err(malformed),
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(malformed),
        (format, bits) => Err(PipelineError::MalformedPcm(format!(
            "unsupported sample encoding: {:?} {}-bit",
            format, bits
        ))),
    }
}

/// チャンネル平均でモノラル化
pub fn downmix_to_mono(interleaved: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }

    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// 最大絶対値が `peak_target` になるようスケーリング（無音はそのまま）
pub fn peak_normalize(samples: &mut [f32], peak_target: f32) {
    let max_abs = samples.iter().map(|&x| x.abs()).fold(0.0f32, f32::max);
    if max_abs > 0.0 {
        for sample in samples.iter_mut() {
            *sample = *sample / max_abs * peak_target;
        }
    }
}

/// 帯域制限（sinc 補間）リサンプル
/// - 出力長は floor(入力長 * 出力レート / 入力レート) に揃える
pub fn resample(samples: &[f32], input_rate: u32, output_rate: u32) -> PipelineResult<Vec<f32>> {
    let expected = (samples.len() as u64 * output_rate as u64 / input_rate as u64) as usize;
    if input_rate == output_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        RESAMPLE_CHUNK,
        1, // モノラル
    )
    .map_err(resample_err)?;

    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    while pos + RESAMPLE_CHUNK <= samples.len() {
        let block = vec![samples[pos..pos + RESAMPLE_CHUNK].to_vec()];
        let chunk = resampler
            .process(&block, None)
            .map_err(resample_err)?;
        output.extend_from_slice(&chunk[0]);
        pos += RESAMPLE_CHUNK;
    }

    if pos < samples.len() {
        let tail = vec![samples[pos..].to_vec()];
        let chunk = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(resample_err)?;
        output.extend_from_slice(&chunk[0]);
    }

    // フィルタ遅延ぶんを吐き出させる
    while output.len() < expected + delay {
        let chunk = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(resample_err)?;
        if chunk[0].is_empty() {
            break;
        }
        output.extend_from_slice(&chunk[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

fn resample_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::MalformedPcm(format!("resampling failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rifx_chunk(id: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn rifx_fields_and_samples_are_swapped() {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_be_bytes());
        fmt.extend_from_slice(&1u16.to_be_bytes());
        fmt.extend_from_slice(&8_000u32.to_be_bytes());
        fmt.extend_from_slice(&16_000u32.to_be_bytes());
        fmt.extend_from_slice(&2u16.to_be_bytes());
        fmt.extend_from_slice(&16u16.to_be_bytes());
        let data: Vec<u8> = [0x1234i16, -2].iter().flat_map(|s| s.to_be_bytes()).collect();

        let mut wav = b"RIFX\0\0\0\0WAVE".to_vec();
        wav.extend(rifx_chunk(b"fmt ", &fmt));
        wav.extend(rifx_chunk(b"data", &data));

        let riff = rifx_to_riff(&wav).unwrap();
        assert_eq!(&riff[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([riff[4], riff[5], riff[6], riff[7]]) as usize, riff.len() - 8);

        let reader = hound::WavReader::new(Cursor::new(riff)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0x1234, -2]);
    }

    #[test]
    fn rifx_data_before_fmt_is_malformed() {
        let mut wav = b"RIFX\0\0\0\0WAVE".to_vec();
        wav.extend(rifx_chunk(b"data", &[0, 1]));
        assert!(matches!(rifx_to_riff(&wav), Err(PipelineError::MalformedPcm(_))));
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn peak_normalize_hits_target_exactly() {
        let mut samples = vec![0.1, -0.25, 0.2];
        peak_normalize(&mut samples, 1.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn peak_normalize_leaves_silence_alone() {
        let mut samples = vec![0.0; 16];
        peak_normalize(&mut samples, 1.0);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn resample_length_is_floor_of_ratio() {
        let input: Vec<f32> = (0..44_101).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample(&input, 44_100, 16_000).unwrap();
        assert_eq!(output.len(), 44_101 * 16_000 / 44_100);
    }

    #[test]
    fn resample_preserves_low_frequency_tone() {
        // 440Hz のサイン波は 48k → 16k で振幅を保つ
        let input: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect();
        let output = resample(&input, 48_000, 16_000).unwrap();
        assert_eq!(output.len(), 16_000);

        let mid = &output[4_000..12_000];
        let peak = mid.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.5).abs() < 0.05, "peak was {}", peak);
    }
}
