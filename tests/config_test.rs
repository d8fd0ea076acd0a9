use std::fs;
use std::path::Path;
use tempfile::TempDir;
use speech_ingest_api::config::*;

#[cfg(test)]
mod config_tests {
    use super::*;

    /// テスト用に一時ディレクトリを向けた設定
    fn valid_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.temp_dir = temp_dir.path().join("temp").to_string_lossy().to_string();
        config
    }

    /// Configのデフォルト値テスト
    #[test]
    fn test_config_default() {
        let config = Config::default();

        // サーバー設定
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.cors_origins, vec!["*"]);
        assert_eq!(config.server.max_request_size, 100 * 1024 * 1024);

        // 認識モデル設定
        assert_eq!(config.recognition.model_path, "models/ggml-small.bin");
        assert_eq!(config.recognition.language, "fa");
        assert!(!config.recognition.enable_gpu);

        // 音声の方針値
        assert_eq!(config.audio.target_sample_rate, 16000);
        assert_eq!(config.audio.target_channels, 1);
        assert_eq!(config.audio.min_duration_seconds, 0.5);
        assert_eq!(config.audio.max_duration_seconds, 30.0);
        assert_eq!(config.audio.peak_target, 1.0);
        assert_eq!(config.audio.default_format, "m4a");

        // コーデック
        assert_eq!(config.codec.engine, CodecEngineKind::Ffmpeg);
        assert_eq!(config.codec.ffmpeg_path, "ffmpeg");

        // 制限設定
        assert_eq!(config.limits.max_file_size_mb, 50);
    }

    /// 設定ファイルの読み書きテスト
    #[test]
    fn test_config_load_and_save() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.codec.engine = CodecEngineKind::Symphonia;
        original_config.audio.max_duration_seconds = 45.0;

        original_config.save_to_file(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded_config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded_config.server.port, original_config.server.port);
        assert_eq!(loaded_config.codec.engine, CodecEngineKind::Symphonia);
        assert_eq!(loaded_config.audio.max_duration_seconds, 45.0);

        // エンジン名は小文字で保存される
        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("engine = \"symphonia\""));
    }

    /// 不正な設定ファイルの処理テスト
    #[test]
    fn test_config_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let invalid_config_path = temp_dir.path().join("invalid_config.toml");

        fs::write(&invalid_config_path, "invalid toml content [[[").unwrap();

        assert!(Config::load_from_file(&invalid_config_path).is_err());

        // load_or_create_default はデフォルト値にフォールバックし、ファイルは上書きしない
        let config = Config::load_or_create_default(&invalid_config_path).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(
            fs::read_to_string(&invalid_config_path).unwrap(),
            "invalid toml content [[["
        );
    }

    /// load_or_create_defaultのテスト（ファイルが存在しない場合）
    #[test]
    fn test_config_load_or_create_default_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("new_config.toml");

        assert!(!config_path.exists());
        let config = Config::load_or_create_default(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(config.server.port, 8000);
    }

    /// 妥当な設定は検証を通り、一時ディレクトリが作られる
    #[test]
    fn test_config_validate_success() {
        let temp_dir = TempDir::new().unwrap();
        let config = valid_config(&temp_dir);

        assert!(config.validate().is_ok());
        assert!(Path::new(&config.paths.temp_dir).exists());
    }

    /// 不正な値はそれぞれ検証で弾かれる
    #[test]
    fn test_config_validate_rejects_bad_values() {
        let temp_dir = TempDir::new().unwrap();

        let cases: Vec<(&str, Box<dyn Fn(&mut Config)>)> = vec![
            ("port", Box::new(|c: &mut Config| c.server.port = 0)),
            ("sample rate", Box::new(|c: &mut Config| c.audio.target_sample_rate = 0)),
            ("channels", Box::new(|c: &mut Config| c.audio.target_channels = 0)),
            ("negative min", Box::new(|c: &mut Config| c.audio.min_duration_seconds = -1.0)),
            ("min >= max", Box::new(|c: &mut Config| c.audio.min_duration_seconds = 30.0)),
            ("zero peak", Box::new(|c: &mut Config| c.audio.peak_target = 0.0)),
            ("peak above one", Box::new(|c: &mut Config| c.audio.peak_target = 1.5)),
            ("codec timeout", Box::new(|c: &mut Config| c.codec.timeout_seconds = 0)),
            ("fetch timeout", Box::new(|c: &mut Config| c.fetch.timeout_seconds = 0)),
            ("file size", Box::new(|c: &mut Config| c.limits.max_file_size_mb = 0)),
        ];

        for (name, mutate) in cases {
            let mut config = valid_config(&temp_dir);
            mutate(&mut config);
            assert!(config.validate().is_err(), "{} should be rejected", name);
        }
    }

    /// ヘルパーメソッドのテスト
    #[test]
    fn test_config_helper_methods() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9000;
        config.limits.max_file_size_mb = 2;

        assert_eq!(config.server_address(), "127.0.0.1:9000");
        assert_eq!(config.max_file_size_bytes(), 2 * 1024 * 1024);
        assert_eq!(CodecEngineKind::Ffmpeg.as_str(), "ffmpeg");
    }

    /// TOML の一部だけを書き換えた設定の読み込み
    #[test]
    fn test_config_custom_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("custom.toml");

        let mut config = Config::default();
        config.recognition.language = "auto".to_string();
        config.audio.peak_target = 0.95;
        let content = toml::to_string_pretty(&config).unwrap();
        fs::write(&config_path, content).unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.recognition.language, "auto");
        assert_eq!(loaded.audio.peak_target, 0.95);
    }
}
