//! 一時ファイル（アーティファクト）の管理
//!
//! トランスコードはファイル経由でしか動かない外部エンジンを前提とするため、
//! リクエスト中に短命なファイルを作る。所有者は作成したステージただ一つで、
//! 成功・失敗のどちらの経路でも `Drop` で必ず削除される。
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

const ARTIFACT_PREFIX: &str = "ingest-";

/// 一時アーティファクトを払い出すストア
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// 指定ディレクトリ配下にアーティファクトを作成するストア（無ければ作成）
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// 一意な名前の空ファイルを作成してハンドルを返す
    pub fn acquire(&self, suffix: &str) -> io::Result<TempArtifact> {
        let file = Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        let path = file.into_temp_path();
        debug!(path = %path.display(), "acquired temp artifact");
        Ok(TempArtifact { path: Some(path) })
    }

    /// 作成と同時にバイト列を書き込む
    pub async fn acquire_with_bytes(&self, suffix: &str, bytes: &[u8]) -> io::Result<TempArtifact> {
        let artifact = self.acquire(suffix)?;
        tokio::fs::write(artifact.path(), bytes).await?;
        Ok(artifact)
    }
}

/// 単一所有の一時ファイル
///
/// `release` は冪等で、削除失敗はログに残して握りつぶす。
#[derive(Debug)]
pub struct TempArtifact {
    path: Option<TempPath>,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }

    pub fn release(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.display().to_string();
        match path.close() {
            Ok(()) => debug!(path = %shown, "released temp artifact"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %shown, error = %err, "could not remove temp artifact"),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}
