//! Content classification for datasets and members.
//!
//! Mainframe payloads are opaque byte runs; the extractor needs to know
//! whether to hand out synthesized text or raw binary, and which file
//! extension to append. The sniffer checks a magic-number table first,
//! then falls back to charset heuristics: printable ASCII, clean EBCDIC
//! text, or binary.

use crate::codepage::Codepage;
use log::debug;

/// A sniffed payload: MIME type, charset and the extension hint derived
/// from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mime: String,
    pub charset: String,
    pub extension: Option<String>,
}

impl Classification {
    /// Whether text synthesis applies: plain text by MIME, any non-binary
    /// charset, or a forced conversion.
    pub fn is_text(&self, force: bool) -> bool {
        force || self.mime == "text/plain" || self.charset != "binary"
    }
}

/// Magic-number table for payload types that show up inside mainframe
/// containers. First match wins.
const MAGIC: &[(&[u8], &str)] = &[
    (b"PK\x03\x04", "application/zip"),
    (b"PK\x05\x06", "application/zip"),
    (&[0x1F, 0x8B], "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"%PDF-", "application/pdf"),
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF8", "image/gif"),
    (&[0x7F, 0x45, 0x4C, 0x46], "application/x-executable"),
];

/// Known MIME-to-extension mappings; anything else falls back to the
/// MIME subtype.
const EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", ".txt"),
    ("application/octet-stream", ".bin"),
    ("application/xmit", ".xmi"),
    ("application/zip", ".zip"),
    ("application/gzip", ".gz"),
    ("application/x-bzip2", ".bz2"),
    ("application/pdf", ".pdf"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
];

/// Sniff the MIME type and charset of a payload.
pub fn sniff(data: &[u8], cp: Codepage) -> (String, String) {
    if data.is_empty() {
        return ("application/x-empty".to_string(), "binary".to_string());
    }

    for (magic, mime) in MAGIC {
        if data.starts_with(magic) {
            return (mime.to_string(), "binary".to_string());
        }
    }

    if data.iter().all(|&b| is_ascii_text_byte(b)) {
        return ("text/plain".to_string(), "us-ascii".to_string());
    }

    if cp.decode(data).chars().all(is_clean_text_char) {
        return ("text/plain".to_string(), "ebcdic".to_string());
    }

    ("application/octet-stream".to_string(), "binary".to_string())
}

/// Classify a payload, applying the nested-XMI override and the forced
/// text extension.
pub fn classify(data: &[u8], cp: Codepage, force: bool) -> Classification {
    let (mut mime, charset) = sniff(data, cp);
    let mut extension = guess_extension(&mime);

    // Plain magic cannot spot XMIT files: look for INMR01 behind the
    // first segment header.
    if mime == "application/octet-stream" && data.len() >= 8 && cp.decode(&data[2..8]) == "INMR01" {
        mime = "application/xmit".to_string();
        extension = Some(".xmi".to_string());
    }

    if force {
        extension = Some(".txt".to_string());
    }

    debug!(
        "classified payload: mime {mime} charset {charset} extension {extension:?} size {}",
        data.len()
    );
    Classification {
        mime,
        charset,
        extension,
    }
}

/// Extension for a MIME type, falling back to `.` plus the subtype.
pub fn guess_extension(mime: &str) -> Option<String> {
    for (known, ext) in EXTENSIONS {
        if *known == mime {
            return Some(ext.to_string());
        }
    }
    mime.split('/').nth(1).map(|subtype| format!(".{subtype}"))
}

fn is_ascii_text_byte(b: u8) -> bool {
    matches!(b, 0x09 | 0x0A | 0x0C | 0x0D | 0x1B) || (0x20..0x7F).contains(&b)
}

fn is_clean_text_char(c: char) -> bool {
    !c.is_control() || matches!(c, '\n' | '\r' | '\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebcdic_text_detected() {
        let data = Codepage::Cp1140.encode("HELLO WORLD, 123.  ").unwrap();
        let (mime, charset) = sniff(&data, Codepage::Cp1140);
        assert_eq!(mime, "text/plain");
        assert_eq!(charset, "ebcdic");
    }

    #[test]
    fn test_binary_payload() {
        let data: &[u8] = &[0x00, 0x01, 0x02, 0xFF, 0x10];
        let (mime, charset) = sniff(data, Codepage::Cp1140);
        assert_eq!(mime, "application/octet-stream");
        assert_eq!(charset, "binary");
    }

    #[test]
    fn test_zip_magic() {
        let data: &[u8] = b"PK\x03\x04rest-of-archive";
        let (mime, charset) = sniff(data, Codepage::Cp1140);
        assert_eq!(mime, "application/zip");
        assert_eq!(charset, "binary");
    }

    #[test]
    fn test_nested_xmit_override() {
        // two framing bytes, then EBCDIC "INMR01", then junk
        let mut data = vec![0x70, 0x20];
        data.extend(Codepage::Cp1140.encode("INMR01").unwrap());
        data.extend([0x00, 0x00, 0x13]);
        let c = classify(&data, Codepage::Cp1140, false);
        assert_eq!(c.mime, "application/xmit");
        assert_eq!(c.extension.as_deref(), Some(".xmi"));
    }

    #[test]
    fn test_force_text_extension() {
        let c = classify(&[0x00, 0x01, 0x02], Codepage::Cp1140, true);
        assert_eq!(c.extension.as_deref(), Some(".txt"));
        assert!(c.is_text(true));
    }

    #[test]
    fn test_fallback_extension_from_subtype() {
        assert_eq!(guess_extension("application/x-empty").as_deref(), Some(".x-empty"));
        assert_eq!(guess_extension("text/plain").as_deref(), Some(".txt"));
    }

    #[test]
    fn test_empty_payload() {
        let (mime, charset) = sniff(&[], Codepage::Cp1140);
        assert_eq!(mime, "application/x-empty");
        assert_eq!(charset, "binary");
    }
}
