use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 設定ファイルのパスを上書きする環境変数名
pub const CONFIG_PATH_ENV: &str = "SPEECH_API_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub audio: AudioConfig,
    pub codec: CodecConfig,
    pub fetch: FetchConfig,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub model_path: String,
    pub model_name: String,
    pub language: String,
    pub enable_gpu: bool,
    pub threads: usize,
}

/// 正規化・長さ検証のポリシー値
/// - 下流の認識モデルに合わせて調整するため、コードに埋め込まない
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub target_sample_rate: u32,
    pub target_channels: u16,
    pub min_duration_seconds: f64,
    pub max_duration_seconds: f64,
    pub peak_target: f32,
    pub default_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecEngineKind {
    Ffmpeg,
    Symphonia,
}

impl CodecEngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecEngineKind::Ffmpeg => "ffmpeg",
            CodecEngineKind::Symphonia => "symphonia",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    pub engine: CodecEngineKind,
    pub ffmpeg_path: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub temp_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                cors_origins: vec!["*".to_string()],
                max_request_size: 100 * 1024 * 1024, // 100MB
            },
            recognition: RecognitionConfig {
                model_path: "models/ggml-small.bin".to_string(),
                model_name: "whisper-small".to_string(),
                language: "fa".to_string(),
                enable_gpu: false,
                threads: 4,
            },
            audio: AudioConfig {
                target_sample_rate: 16000,
                target_channels: 1,
                min_duration_seconds: 0.5,
                max_duration_seconds: 30.0,
                peak_target: 1.0,
                default_format: "m4a".to_string(),
            },
            codec: CodecConfig {
                engine: CodecEngineKind::Ffmpeg,
                ffmpeg_path: "ffmpeg".to_string(),
                timeout_seconds: 120,
            },
            fetch: FetchConfig {
                timeout_seconds: 30,
                user_agent: concat!("speech_ingest_api/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            paths: PathsConfig {
                temp_dir: "temp".to_string(),
            },
            limits: LimitsConfig {
                max_file_size_mb: 50,
            },
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn load_or_create_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            match Self::load_from_file(&path) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // 壊れた設定ファイルは上書きせず、デフォルト値で起動する
                    warn!(
                        path = %path.as_ref().display(),
                        error = %e,
                        "failed to parse config file, falling back to defaults"
                    );
                    Ok(Self::default())
                }
            }
        } else {
            let config = Self::default();
            config.save_to_file(&path)?;
            info!(path = %path.as_ref().display(), "wrote default config file");
            Ok(config)
        }
    }

    /// 環境変数（未設定時は `config.toml`）から設定を読み込み
    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::load_or_create_default(path)
    }

    pub fn validate(&self) -> Result<()> {
        // ポート番号の検証
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("invalid port: {}", self.server.port));
        }

        if self.audio.target_sample_rate == 0 {
            return Err(anyhow::anyhow!("target_sample_rate must be positive"));
        }

        if self.audio.target_channels == 0 {
            return Err(anyhow::anyhow!("target_channels must be positive"));
        }

        // 長さ制限の検証
        if self.audio.min_duration_seconds < 0.0 {
            return Err(anyhow::anyhow!(
                "min_duration_seconds must not be negative: {}",
                self.audio.min_duration_seconds
            ));
        }

        if self.audio.min_duration_seconds >= self.audio.max_duration_seconds {
            return Err(anyhow::anyhow!(
                "min_duration_seconds ({}) must be below max_duration_seconds ({})",
                self.audio.min_duration_seconds,
                self.audio.max_duration_seconds
            ));
        }

        if !(self.audio.peak_target > 0.0 && self.audio.peak_target <= 1.0) {
            return Err(anyhow::anyhow!(
                "peak_target must be within (0, 1]: {}",
                self.audio.peak_target
            ));
        }

        if self.codec.timeout_seconds == 0 || self.fetch.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("timeouts must be at least one second"));
        }

        // ファイルサイズ制限の検証
        if self.limits.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("max_file_size_mb must be at least 1"));
        }

        // 一時ディレクトリの存在確認と作成
        if !Path::new(&self.paths.temp_dir).exists() {
            fs::create_dir_all(&self.paths.temp_dir).map_err(|e| {
                anyhow::anyhow!("failed to create temp dir {}: {}", self.paths.temp_dir, e)
            })?;
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.limits.max_file_size_mb * 1024 * 1024
    }
}
