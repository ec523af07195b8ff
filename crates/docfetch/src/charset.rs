//! Charset sniffing for locally supplied documents.

use std::sync::OnceLock;

use regex::bytes::Regex;

/// Pluggable detector: document bytes in, charset label out.
pub type CharsetDetector = fn(&[u8]) -> Option<String>;

/// How far into the document a `<meta>` declaration is looked for.
const SNIFF_LIMIT: usize = 1024;

fn meta_charset() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_:.\-]+)"#).ok()
    })
    .as_ref()
}

/// Detect the charset from a byte-order mark or a `<meta>` declaration.
pub fn sniff_charset(content: &[u8]) -> Option<String> {
    if content.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some("utf-8".to_string());
    }
    if content.starts_with(&[0xFF, 0xFE]) {
        return Some("utf-16le".to_string());
    }
    if content.starts_with(&[0xFE, 0xFF]) {
        return Some("utf-16be".to_string());
    }

    let head = &content[..content.len().min(SNIFF_LIMIT)];
    meta_charset()?
        .captures(head)
        .and_then(|c| c.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .map(|s| s.to_ascii_lowercase())
}

/// Detector that never reports a charset.
pub fn no_detection(_: &[u8]) -> Option<String> {
    None
}
