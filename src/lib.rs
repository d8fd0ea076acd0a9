// speech_ingest_api ライブラリ
// テストから各モジュールにアクセスできるようにするため

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod recognition;

pub use error::{DecodeError, PipelineError, PipelineResult};
