//! # xmit_unload
//!
//! Parser and extractor for legacy IBM mainframe container formats:
//! NETDATA (also called XMIT or XMI, produced by the TSO TRANSMIT
//! command) and virtual tape files in the AWSTAPE and HET variants.
//!
//! Both containers wrap one or more mainframe datasets: sequential files
//! or partitioned datasets (PDSs) whose members are reassembled from
//! IEBCOPY unload records. Layout metadata (RECFM, LRECL, block size),
//! ISPF authoring statistics and tape labels are decoded alongside the
//! payloads, and record-format-aware EBCDIC to UTF-8 text synthesis is
//! applied to members classified as text.
//!
//! ## Example
//!
//! ```no_run
//! use xmit_unload::{open_file, Config};
//!
//! let archive = open_file("FILE100.XMI", &Config::default()).unwrap();
//! for dataset in archive.list_datasets() {
//!     println!("{dataset}");
//! }
//! ```
//!
//! Parsing is a pure function from a byte buffer (plus configuration) to
//! an [`Archive`] value; nothing is written until the extraction helpers
//! in [`extract`] are invoked:
//!
//! ```no_run
//! use xmit_unload::{extract, open_file, Config};
//!
//! let cfg = Config {
//!     output_dir: "./unloaded".into(),
//!     ..Config::default()
//! };
//! let archive = open_file("tapefile01.het", &cfg).unwrap();
//! extract::extract_all(&archive, &cfg).unwrap();
//! ```

use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub mod archive;
pub mod codepage;
pub mod convert;
pub mod dates;
pub mod error;
pub mod extract;
pub mod iebcopy;
pub mod sniff;
pub mod tape;
pub mod textunit;
pub mod xmi;

pub use archive::{Archive, Dataset, Member, MemberInfo};
pub use codepage::Codepage;
pub use error::{Error, Result};

/// Parser configuration. Value-typed; changing it after parsing requires
/// re-parsing.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// EBCDIC codepage for all byte-to-text translation.
    pub codepage: Codepage,
    /// Record length used when none can be determined from metadata.
    pub lrecl: u16,
    /// Strip the sequence-number columns (LRECL-7..LRECL) from text when
    /// they hold only digits.
    pub unnum: bool,
    /// Synthesize text for every payload, regardless of classification.
    pub force_text: bool,
    /// Never synthesize text; extraction writes raw bytes only.
    pub binary_only: bool,
    /// Reject archives whose member data disagrees with the PDS
    /// directory instead of synthesizing DELETED members.
    pub strict: bool,
    /// Dataset name to use instead of the name found in (or missing
    /// from) the container metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    /// Extraction target directory.
    pub output_dir: PathBuf,
    /// Overwrite existing files during extraction.
    pub overwrite: bool,
    /// Apply ISPF/HDR1 dates to extracted files' modification times.
    pub apply_modify_time: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            codepage: Codepage::default(),
            lrecl: 80,
            unnum: true,
            force_text: false,
            binary_only: false,
            strict: false,
            name_override: None,
            output_dir: PathBuf::from("."),
            overwrite: true,
            apply_modify_time: false,
        }
    }
}

/// Container framing recognized by [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Xmi,
    Tape,
    Unknown,
}

/// O(1) framing detection over the first bytes of a buffer.
///
/// NETDATA files carry the INMR01 record name behind the first segment
/// header; virtual tapes start with a block header whose previous-size
/// halfword must be zero.
pub fn detect(buf: &[u8], cp: Codepage) -> FileKind {
    if buf.len() >= 8 && cp.decode(&buf[2..8]) == "INMR01" {
        return FileKind::Xmi;
    }
    if buf.len() >= 4 && u16::from_le_bytes([buf[2], buf[3]]) == 0 {
        return FileKind::Tape;
    }
    FileKind::Unknown
}

/// Parse an in-memory XMI/AWS/HET buffer.
pub fn parse_bytes(buf: &[u8], cfg: &Config) -> Result<Archive> {
    parse_named(buf, cfg, None)
}

/// Parse a buffer, supplying the source file stem for the dataset-name
/// fallback of nameless XMI transmissions.
pub fn parse_named(buf: &[u8], cfg: &Config, stem: Option<&str>) -> Result<Archive> {
    match detect(buf, cfg.codepage) {
        FileKind::Xmi => Ok(Archive::Xmi(xmi::parse_archive(buf, cfg, stem)?)),
        FileKind::Tape => Ok(Archive::Tape(tape::parse_archive(buf, cfg)?)),
        FileKind::Unknown => Err(Error::invalid(
            "input is neither an XMIT nor a virtual tape file",
            0,
        )),
    }
}

/// Read and parse an XMI/AWS/HET file.
pub fn open_file(path: impl AsRef<Path>, cfg: &Config) -> Result<Archive> {
    let path = path.as_ref();
    let buf = std::fs::read(path)?;
    let stem = path.file_stem().and_then(OsStr::to_str);
    parse_named(&buf, cfg, stem)
}

/// All dataset and member names in a file, members as `DSN(MEMBER)`.
pub fn list_all(path: impl AsRef<Path>, cfg: &Config) -> Result<Vec<String>> {
    let archive = open_file(path, cfg)?;
    let mut names = Vec::new();
    for dataset in archive.datasets() {
        if dataset.is_partitioned() {
            for member in dataset.members() {
                names.push(format!("{}({})", dataset.name, member.name));
            }
        } else {
            names.push(dataset.name.clone());
        }
    }
    Ok(names)
}

/// Bounds-checked big/little-endian field access over byte slices.
pub(crate) mod buf {
    use crate::error::{Error, Result};

    pub fn slice(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(Error::Truncated {
            needed: len,
            offset: start,
        })?;
        data.get(start..end).ok_or(Error::Truncated {
            needed: end.saturating_sub(data.len()),
            offset: start.min(data.len()),
        })
    }

    pub fn byte(data: &[u8], offset: usize) -> Result<u8> {
        Ok(slice(data, offset, 1)?[0])
    }

    pub fn be_u16(data: &[u8], offset: usize) -> Result<u16> {
        let b = slice(data, offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn le_u16(data: &[u8], offset: usize) -> Result<u16> {
        let b = slice(data, offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn be_u24(data: &[u8], offset: usize) -> Result<u32> {
        let b = slice(data, offset, 3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn be_u32(data: &[u8], offset: usize) -> Result<u32> {
        let b = slice(data, offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_field_access() {
            let data: &[u8] = &[0x01, 0x02, 0x03, 0x04];
            assert_eq!(be_u16(data, 0).unwrap(), 0x0102);
            assert_eq!(le_u16(data, 0).unwrap(), 0x0201);
            assert_eq!(be_u24(data, 1).unwrap(), 0x020304);
            assert_eq!(be_u32(data, 0).unwrap(), 0x01020304);
            assert_eq!(byte(data, 3).unwrap(), 0x04);
        }

        #[test]
        fn test_out_of_bounds_is_truncated() {
            let data: &[u8] = &[0x01, 0x02];
            assert!(matches!(
                be_u32(data, 0),
                Err(Error::Truncated { needed: 2, .. })
            ));
            assert!(byte(data, 2).is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_xmi() {
        // segment length, flag, then EBCDIC "INMR01"
        let buf: &[u8] = &[0x70, 0xE0, 0xC9, 0xD5, 0xD4, 0xD9, 0xF0, 0xF1, 0x00, 0x00];
        assert_eq!(detect(buf, Codepage::Cp1140), FileKind::Xmi);
    }

    #[test]
    fn test_detect_tape() {
        // previous-block-size halfword (bytes 2..4) must be zero
        let buf: &[u8] = &[0x50, 0x00, 0x00, 0x00, 0xA0, 0x00, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(detect(buf, Codepage::Cp1140), FileKind::Tape);
    }

    #[test]
    fn test_detect_unknown() {
        let buf: &[u8] = &[0x50, 0x4B, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(detect(buf, Codepage::Cp1140), FileKind::Unknown);
        assert!(matches!(
            parse_bytes(buf, &Config::default()),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_detect_short_buffer() {
        assert_eq!(detect(&[0x01], Codepage::Cp1140), FileKind::Unknown);
        assert_eq!(detect(&[], Codepage::Cp1140), FileKind::Unknown);
    }
}
