//! 認識モデルとの境界
//!
//! モデルは起動時に一度だけ読み込み、以降は読み取り専用で全リクエストから共有する。
//! 同時に複数の呼び出しが来ても、読み込みは `OnceCell` で一回にまとめる。
#[cfg(feature = "whisper")]
pub mod whisper;

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::audio::CanonicalPcm;
use crate::config::RecognitionConfig;
use crate::error::{PipelineError, PipelineResult};

/// 認識結果（confidence は [0, 1]）
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// 正規化済み PCM からテキストを得る認識器
/// - 推論は CPU を占有するため、呼び出し側で `spawn_blocking` に載せる
pub trait SpeechRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn transcribe(&self, pcm: &CanonicalPcm) -> PipelineResult<Recognition>;
}

pub type RecognizerLoader =
    Arc<dyn Fn() -> anyhow::Result<Arc<dyn SpeechRecognizer>> + Send + Sync>;

/// 一度だけ初期化される認識器の置き場
pub struct ModelRegistry {
    model_name: String,
    /// 読み込み済みで登録された場合は `None`
    loader: Option<RecognizerLoader>,
    cell: OnceCell<Result<Arc<dyn SpeechRecognizer>, String>>,
}

impl ModelRegistry {
    pub fn new(model_name: impl Into<String>, loader: RecognizerLoader) -> Self {
        Self {
            model_name: model_name.into(),
            loader: Some(loader),
            cell: OnceCell::new(),
        }
    }

    /// 設定からバックエンドを選ぶ
    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.model_name.clone(), default_loader(config))
    }

    /// 読み込み済みの認識器を直接登録する（テストや組み込み用）
    pub fn preloaded(model_name: impl Into<String>, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            model_name: model_name.into(),
            loader: None,
            cell: OnceCell::new_with(Some(Ok(recognizer))),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    /// 認識器を取得する（初回のみ読み込み、失敗も記憶する）
    pub async fn get(&self) -> PipelineResult<Arc<dyn SpeechRecognizer>> {
        let loaded = self
            .cell
            .get_or_init(|| async {
                let Some(loader) = self.loader.clone() else {
                    return Err("no model loader registered".to_string());
                };
                info!(model = %self.model_name, "loading recognition model");
                let result = match tokio::task::spawn_blocking(move || loader()).await {
                    Ok(Ok(recognizer)) => Ok(recognizer),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("model loader panicked: {}", e)),
                };
                match &result {
                    Ok(recognizer) => info!(backend = recognizer.name(), "recognition model ready"),
                    Err(reason) => error!(model = %self.model_name, error = %reason, "failed to load recognition model"),
                }
                result
            })
            .await;

        loaded
            .as_ref()
            .map(Arc::clone)
            .map_err(|reason| PipelineError::ModelUnavailable(reason.clone()))
    }

    /// 正規化済み PCM を認識する
    pub async fn recognize(&self, pcm: CanonicalPcm) -> PipelineResult<Recognition> {
        let recognizer = self.get().await?;
        let recognition = tokio::task::spawn_blocking(move || recognizer.transcribe(&pcm))
            .await
            .map_err(|e| PipelineError::Recognition(format!("recognizer task failed: {}", e)))??;

        Ok(Recognition {
            confidence: clamp_confidence(recognition.confidence),
            ..recognition
        })
    }
}

/// NaN は 0 として扱う
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(feature = "whisper")]
fn default_loader(config: &RecognitionConfig) -> RecognizerLoader {
    let config = config.clone();
    Arc::new(move || {
        let recognizer = whisper::WhisperRecognizer::load(&config)?;
        Ok(Arc::new(recognizer) as Arc<dyn SpeechRecognizer>)
    })
}

#[cfg(not(feature = "whisper"))]
fn default_loader(config: &RecognitionConfig) -> RecognizerLoader {
    let model_path = config.model_path.clone();
    Arc::new(move || {
        Err(anyhow::anyhow!(
            "no recognition backend compiled in (model: {}); rebuild with `--features whisper`",
            model_path
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_into_unit_range() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
