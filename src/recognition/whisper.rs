use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::CanonicalPcm;
use crate::config::RecognitionConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::recognition::{Recognition, SpeechRecognizer};

/// whisper.cpp による認識器
/// - `WhisperContext` は読み取り専用で共有し、推論ごとに `state` を作る
pub struct WhisperRecognizer {
    context: WhisperContext,
    language: Option<String>,
    threads: i32,
}

impl WhisperRecognizer {
    /// モデルファイルを読み込む（GPU 初期化に失敗した場合は CPU で再試行）
    pub fn load(config: &RecognitionConfig) -> Result<Self> {
        let model_path = config.model_path.as_str();
        if !Path::new(model_path).exists() {
            return Err(anyhow::anyhow!(
                "whisper model file not found: {}\n\
                 download one with:\n\
                 wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin -P models/",
                model_path
            ));
        }

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu = config.enable_gpu;

        let context = match WhisperContext::new_with_params(model_path, ctx_params) {
            Ok(ctx) => ctx,
            Err(e) if config.enable_gpu => {
                warn!(error = %e, "GPU initialization failed, retrying on CPU");
                let mut cpu_params = WhisperContextParameters::default();
                cpu_params.use_gpu = false;
                WhisperContext::new_with_params(model_path, cpu_params)
                    .map_err(|e| anyhow::anyhow!("failed to initialize whisper context: {}", e))?
            }
            Err(e) => return Err(anyhow::anyhow!("failed to initialize whisper context: {}", e)),
        };

        let language = match config.language.trim() {
            "" => None,
            lang if lang.eq_ignore_ascii_case("auto") => None,
            lang => Some(lang.to_string()),
        };

        info!(
            model = %model_path,
            gpu = config.enable_gpu,
            threads = config.threads,
            "whisper model loaded"
        );

        Ok(Self {
            context,
            language,
            threads: config.threads.max(1) as i32,
        })
    }

    fn make_params(&self) -> FullParams<'_, 'static> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if let Some(language) = self.language.as_deref() {
            params.set_language(Some(language));
        }
        params.set_n_threads(self.threads);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_translate(false);
        params
    }
}

fn failed(what: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Recognition(format!("{}: {}", what, e))
}

impl SpeechRecognizer for WhisperRecognizer {
    fn name(&self) -> &str {
        "whisper.cpp"
    }

    fn transcribe(&self, pcm: &CanonicalPcm) -> PipelineResult<Recognition> {
        if pcm.samples.is_empty() {
            return Err(PipelineError::Recognition("no samples to recognize".to_string()));
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| failed("failed to create whisper state", e))?;

        state
            .full(self.make_params(), &pcm.samples)
            .map_err(|e| failed("inference failed", e))?;

        let segments = state
            .full_n_segments()
            .map_err(|e| failed("failed to read segment count", e))?;

        let mut text_parts = Vec::new();
        let mut prob_sum = 0.0f32;
        let mut token_count = 0usize;

        for i in 0..segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| failed("failed to read segment text", e))?;
            text_parts.push(text.trim().to_string());

            // 信頼度はトークン確率の平均
            let tokens = state
                .full_n_tokens(i)
                .map_err(|e| failed("failed to read token count", e))?;
            for t in 0..tokens {
                let prob = state
                    .full_get_token_prob(i, t)
                    .map_err(|e| failed("failed to read token probability", e))?;
                prob_sum += prob;
                token_count += 1;
            }
        }

        let confidence = if token_count == 0 {
            0.0
        } else {
            prob_sum / token_count as f32
        };

        Ok(Recognition {
            text: text_parts.join(" ").trim().to_string(),
            confidence,
        })
    }
}
