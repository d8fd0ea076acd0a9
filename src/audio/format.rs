//! 入力音声の形式判定
//!
//! 判定はリクエストごとに毎回行い、結果をキャッシュしない。
//! 優先順位: 明示ヒント > ファイル名の拡張子 > Content-Type > 先頭バイト > 既定値
use std::fmt;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedFormat {
    Wav,
    Mp3,
    M4a,
    Flac,
    Ogg,
    Aac,
    Wma,
    #[serde(rename = "3gp")]
    ThreeGp,
    Unknown,
}

impl ResolvedFormat {
    pub const SUPPORTED: [ResolvedFormat; 8] = [
        ResolvedFormat::Wav,
        ResolvedFormat::Mp3,
        ResolvedFormat::M4a,
        ResolvedFormat::Flac,
        ResolvedFormat::Ogg,
        ResolvedFormat::Aac,
        ResolvedFormat::Wma,
        ResolvedFormat::ThreeGp,
    ];

    /// 拡張子（先頭のドット有無・大文字小文字を問わない）から判定
    /// - mp4 は m4a として扱う
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Some(ResolvedFormat::Wav),
            "mp3" => Some(ResolvedFormat::Mp3),
            "m4a" | "mp4" => Some(ResolvedFormat::M4a),
            "flac" => Some(ResolvedFormat::Flac),
            "ogg" => Some(ResolvedFormat::Ogg),
            "aac" => Some(ResolvedFormat::Aac),
            "wma" => Some(ResolvedFormat::Wma),
            "3gp" => Some(ResolvedFormat::ThreeGp),
            _ => None,
        }
    }

    /// 宣言された Content-Type から判定（固定テーブル）
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/wav" => Some(ResolvedFormat::Wav),
            "audio/mpeg" => Some(ResolvedFormat::Mp3),
            "audio/mp4" | "audio/x-m4a" => Some(ResolvedFormat::M4a),
            "audio/flac" => Some(ResolvedFormat::Flac),
            "audio/ogg" => Some(ResolvedFormat::Ogg),
            "audio/aac" => Some(ResolvedFormat::Aac),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedFormat::Wav => "wav",
            ResolvedFormat::Mp3 => "mp3",
            ResolvedFormat::M4a => "m4a",
            ResolvedFormat::Flac => "flac",
            ResolvedFormat::Ogg => "ogg",
            ResolvedFormat::Aac => "aac",
            ResolvedFormat::Wma => "wma",
            ResolvedFormat::ThreeGp => "3gp",
            ResolvedFormat::Unknown => "unknown",
        }
    }

    /// 一時ファイルに付けるサフィックス
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ResolvedFormat::Wav => ".wav",
            ResolvedFormat::Mp3 => ".mp3",
            ResolvedFormat::M4a => ".m4a",
            ResolvedFormat::Flac => ".flac",
            ResolvedFormat::Ogg => ".ogg",
            ResolvedFormat::Aac => ".aac",
            ResolvedFormat::Wma => ".wma",
            ResolvedFormat::ThreeGp => ".3gp",
            ResolvedFormat::Unknown => ".bin",
        }
    }
}

impl fmt::Display for ResolvedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 取り込み境界で作られる生の投稿データ
#[derive(Debug, Clone, Default)]
pub struct RawAudioSubmission {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub format_hint: Option<String>,
}

impl RawAudioSubmission {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_format_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }
}

/// どのヒントで形式が決まったか（ログ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    Explicit,
    Filename,
    ContentType,
    Signature,
    Default,
}

impl HintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintSource::Explicit => "explicit",
            HintSource::Filename => "filename",
            HintSource::ContentType => "content_type",
            HintSource::Signature => "signature",
            HintSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FormatResolver {
    default_format: ResolvedFormat,
    sniff_signature: bool,
}

impl FormatResolver {
    pub fn new(default_format: ResolvedFormat) -> Self {
        Self {
            default_format,
            sniff_signature: true,
        }
    }

    /// 先頭バイトの判定を行わないリゾルバ（アップロード経路用）
    pub fn without_sniffing(mut self) -> Self {
        self.sniff_signature = false;
        self
    }

    /// 入力の形式を優先順位に従って決定する（純粋関数）
    pub fn resolve(&self, submission: &RawAudioSubmission) -> (ResolvedFormat, HintSource) {
        // 明示ヒントは未知の値でもそのまま採用し、エンジンの自動判定に任せる
        if let Some(hint) = submission.format_hint.as_deref().filter(|h| !h.trim().is_empty()) {
            let format = ResolvedFormat::from_extension(hint).unwrap_or(ResolvedFormat::Unknown);
            return (format, HintSource::Explicit);
        }

        if let Some(format) = submission
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .and_then(ResolvedFormat::from_extension)
        {
            return (format, HintSource::Filename);
        }

        if let Some(format) = submission
            .content_type
            .as_deref()
            .and_then(ResolvedFormat::from_content_type)
        {
            return (format, HintSource::ContentType);
        }

        if self.sniff_signature {
            let sniffed = sniff_signature(&submission.bytes);
            if sniffed != ResolvedFormat::Unknown {
                return (sniffed, HintSource::Signature);
            }
        }

        (self.default_format, HintSource::Default)
    }
}

/// 先頭バイトのマジックナンバーから形式を推測
pub fn sniff_signature(bytes: &[u8]) -> ResolvedFormat {
    if has_riff_header(bytes) {
        ResolvedFormat::Wav
    } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
        ResolvedFormat::Mp3
    } else if bytes.starts_with(b"fLaC") {
        ResolvedFormat::Flac
    } else if bytes.starts_with(b"OggS") {
        ResolvedFormat::Ogg
    } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        ResolvedFormat::M4a
    } else {
        ResolvedFormat::Unknown
    }
}

/// RIFF/RIFX ヘッダで始まるか
pub fn has_riff_header(bytes: &[u8]) -> bool {
    bytes.starts_with(b"RIFF") || bytes.starts_with(b"RIFX")
}

/// ログ出力用に先頭16バイトを16進表記にする
pub fn header_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(sniff_signature(b"RIFF\x24\x08\x00\x00WAVE"), ResolvedFormat::Wav);
        assert_eq!(sniff_signature(b"RIFX\x00\x00\x08\x24WAVE"), ResolvedFormat::Wav);
        assert_eq!(sniff_signature(b"ID3\x03\x00"), ResolvedFormat::Mp3);
        assert_eq!(sniff_signature(&[0xFF, 0xFB, 0x90, 0x64]), ResolvedFormat::Mp3);
        assert_eq!(sniff_signature(b"fLaC\x00\x00\x00\x22"), ResolvedFormat::Flac);
        assert_eq!(sniff_signature(b"OggS\x00\x02"), ResolvedFormat::Ogg);
        assert_eq!(sniff_signature(b"\x00\x00\x00\x20ftypM4A "), ResolvedFormat::M4a);
        assert_eq!(sniff_signature(b"garbage!"), ResolvedFormat::Unknown);
        assert_eq!(sniff_signature(b""), ResolvedFormat::Unknown);
    }

    #[test]
    fn extension_parsing_is_lenient() {
        assert_eq!(ResolvedFormat::from_extension(".M4A"), Some(ResolvedFormat::M4a));
        assert_eq!(ResolvedFormat::from_extension("mp4"), Some(ResolvedFormat::M4a));
        assert_eq!(ResolvedFormat::from_extension("3gp"), Some(ResolvedFormat::ThreeGp));
        assert_eq!(ResolvedFormat::from_extension("xyz"), None);
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(
            ResolvedFormat::from_content_type("audio/ogg; codecs=opus"),
            Some(ResolvedFormat::Ogg)
        );
        assert_eq!(ResolvedFormat::from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn header_hex_is_limited_to_sixteen_bytes() {
        let hex = header_hex(&[0xAB; 32]);
        assert_eq!(hex.split(' ').count(), 16);
        assert!(hex.starts_with("ab ab"));
    }
}
