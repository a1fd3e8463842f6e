use crate::agent::workspace::TRUNCATION_MARKER;
use crate::providers::Part;
use crate::utils::truncate_chars;
use base64::Engine;
use std::path::Path;
use tracing::{debug, error};

/// How an attachment is handed to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Inlined as a delimited text block.
    Text,
    /// Sent as an opaque base64 blob.
    Binary { mime_type: &'static str },
}

fn binary_mime(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "parquet" => "application/vnd.apache.parquet",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

fn is_text_extension(ext: &str) -> bool {
    matches!(
        ext,
        // code
        "py" | "rs" | "js" | "ts" | "tsx" | "jsx" | "sh" | "bash" | "rb" | "go" | "java"
            | "c" | "cpp" | "h" | "hpp" | "html" | "htm" | "css" | "sql" | "lua" | "php"
            | "swift" | "kt" | "scala" | "r" | "pl"
            // documents
            | "md" | "txt" | "rtf" | "org" | "rst" | "adoc" | "tex" | "log"
            // data
            | "csv" | "tsv" | "json" | "jsonl" | "ndjson" | "yaml" | "yml" | "xml" | "toml"
            | "ini" | "cfg" | "svg"
    )
}

/// Decide by extension first, then by sniffing the bytes: valid UTF-8 with
/// no NUL bytes is text, anything else is an opaque binary.
pub fn classify(path: &Path, bytes: &[u8]) -> AttachmentKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if let Some(mime_type) = binary_mime(&ext) {
        return AttachmentKind::Binary { mime_type };
    }
    if is_text_extension(&ext) {
        return AttachmentKind::Text;
    }
    if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
        AttachmentKind::Text
    } else {
        AttachmentKind::Binary {
            mime_type: "application/octet-stream",
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Load one attachment as a conversation part. Failures become an error
/// text part so the model knows the file was expected.
pub async fn load(path: &str, inline_limit: usize) -> Part {
    let p = Path::new(path);
    let bytes = match tokio::fs::read(p).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to load file {}: {}", path, e);
            return Part::text(format!("[ERROR: Failed to load {}]", path));
        }
    };

    match classify(p, &bytes) {
        AttachmentKind::Text => {
            let name = display_name(p);
            let text = String::from_utf8_lossy(&bytes);
            let body = truncate_chars(&text, inline_limit, TRUNCATION_MARKER);
            debug!("Inlining text file {} ({} bytes)", path, bytes.len());
            Part::text(format!("[FILE: {}]\n{}\n[END FILE: {}]", name, body, name))
        }
        AttachmentKind::Binary { mime_type } => {
            debug!("Attaching binary file {} as {}", path, mime_type);
            Part::InlineData {
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            }
        }
    }
}

pub async fn load_all(paths: &[String], inline_limit: usize) -> Vec<Part> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        parts.push(load(path, inline_limit).await);
    }
    parts
}

/// Estimated character volume of the attachments, using file size as the
/// proxy. Unreadable files count as zero.
pub async fn estimate_volume(paths: &[String]) -> usize {
    let mut total = 0usize;
    for path in paths {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            total = total.saturating_add(meta.len() as usize);
        }
    }
    total
}
