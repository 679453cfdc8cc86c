use std::path::PathBuf;

pub const ATTACHMENTS_DIR: &str = "attachments";
pub const FALLBACK_STEM: &str = "attachment";
pub const MAX_FILENAME_BYTES: usize = 255;

/// Closed MIME-to-extension table. Anything outside it stores as `.bin`.
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("video/mp4", "mp4"),
    ("video/3gpp", "3gp"),
    ("audio/mp3", "mp3"),
    ("audio/amr", "amr"),
    ("audio/aac", "aac"),
    ("application/pdf", "pdf"),
];

pub fn mime_extension(mime: &str) -> &'static str {
    MIME_EXTENSIONS
        .iter()
        .find(|(name, _)| *name == mime)
        .map(|(_, ext)| *ext)
        .unwrap_or("bin")
}

/// Content types that stay inline in the message XML: text bodies, vCards,
/// and SMIL presentation markup are never extracted.
pub fn is_inline_mime(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/smil"
}

/// Sanitize a vendor-supplied filename. Path separators and parent
/// references disqualify the name outright; control characters and other
/// disallowed bytes are replaced with `_`. Overlong names are rejected
/// rather than truncated.
pub fn sanitize_filename(name: &str) -> Option<String> {
    if name.is_empty() || name.len() > MAX_FILENAME_BYTES {
        return None;
    }
    if name.contains('/') || name.contains('\\') {
        return None;
    }
    if name == "." || name == ".." {
        return None;
    }
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    Some(cleaned)
}

/// File name used when the vendor supplied none (or an unusable one).
pub fn fallback_filename(mime: &str) -> String {
    format!("{FALLBACK_STEM}.{}", mime_extension(mime))
}

/// Two-hex-char shard a hash lives under.
pub fn shard_of(hash: &str) -> &str {
    &hash[..2]
}

/// Repository-relative directory of one blob: `attachments/<hh>/<hash>`.
pub fn blob_dir_rel(hash: &str) -> PathBuf {
    PathBuf::from(ATTACHMENTS_DIR)
        .join(shard_of(hash))
        .join(hash)
}

/// Repository-relative path of a blob file.
pub fn blob_file_rel(hash: &str, filename: &str) -> PathBuf {
    blob_dir_rel(hash).join(filename)
}
