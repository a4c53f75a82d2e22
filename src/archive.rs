//! The parsed archive model and its query interface.
//!
//! Parsing produces an [`Archive`]: either an XMI transmission or a
//! virtual tape, each holding an ordered list of datasets. Datasets are
//! sequential (one payload) or partitioned (named members). The model is
//! read-only; aliases are resolved on query through their TTR.

use crate::error::{Error, Result};
use crate::iebcopy::{Copyr1, Copyr2};
use crate::tape::{Hdr1, Hdr2, VolumeLabel};
use crate::textunit::TextUnits;
use crate::Config;
use serde::Serialize;
use serde_json::Value;

/// Decode a DSORG halfword into its symbolic organization.
pub fn get_dsorg(dsorg: u16) -> String {
    let mut org = "";
    if dsorg & 0x8000 != 0 {
        org = "ISAM";
    }
    if dsorg & 0x4000 != 0 {
        org = "PS";
    }
    if dsorg & 0x2000 != 0 {
        org = "DA";
    }
    if dsorg & 0x1000 != 0 {
        org = "BTAM";
    }
    if dsorg & 0x0200 != 0 {
        org = "PO";
    }
    let mut org = if org.is_empty() {
        "?".to_string()
    } else {
        org.to_string()
    };
    if dsorg & 0x0001 != 0 {
        org.push('U');
    }
    org
}

/// Decode a RECFM field (first byte of two) into its symbolic string:
/// F/V/U plus the B, A, M and S modifier letters.
///
/// See DS1RECFM in
/// <https://www.ibm.com/support/knowledgecenter/SSLTBW_2.3.0/com.ibm.zos.v2r3.idas300/s3013.htm>
pub fn get_recfm(recfm: &[u8]) -> String {
    let Some(&flag) = recfm.first() else {
        return "?".to_string();
    };
    let mut rfm = match flag & 0xC0 {
        0x40 => "V".to_string(),
        0x80 => "F".to_string(),
        0xC0 => "U".to_string(),
        _ => "?".to_string(),
    };
    if flag & 0x10 != 0 {
        rfm.push('B');
    }
    if flag & 0x04 != 0 {
        rfm.push('A');
    }
    if flag & 0x02 != 0 {
        rfm.push('M');
    }
    if flag & 0x08 != 0 {
        rfm.push('S');
    }
    rfm
}

/// ISPF authoring statistics of one PDS member.
#[derive(Debug, Clone, Serialize)]
pub struct IspfStats {
    /// `MM.mm` version string.
    pub version: String,
    pub flags: u8,
    /// ISO-8601 creation date, empty when unparsable.
    pub created: String,
    /// ISO-8601 last-modify date, empty when unparsable.
    pub modified: String,
    pub lines: u32,
    pub new_lines: u32,
    pub mod_lines: u32,
    /// Authoring userid.
    pub user: String,
}

/// One member of a partitioned dataset.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub name: String,
    /// Track/record locator, the identity key for alias resolution.
    pub ttr: u32,
    pub alias: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ispf: Option<IspfStats>,
    #[serde(skip)]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// Payload of a dataset: one stream, or a directory of members.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DatasetContent {
    Sequential {
        #[serde(skip)]
        data: Vec<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Partitioned { members: Vec<Member> },
}

/// One logical mainframe file inside the archive.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub name: String,
    pub dsorg: String,
    pub recfm: String,
    pub lrecl: u32,
    pub block_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdr1: Option<Hdr1>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdr2: Option<Hdr2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyr1: Option<Copyr1>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyr2: Option<Copyr2>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_labels: Vec<String>,
    pub mime: String,
    pub charset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Position of this dataset within the container, starting at 1.
    pub file_seq: u32,
    #[serde(flatten)]
    pub content: DatasetContent,
}

impl Dataset {
    pub fn is_partitioned(&self) -> bool {
        matches!(self.content, DatasetContent::Partitioned { .. })
    }

    pub fn is_sequential(&self) -> bool {
        !self.is_partitioned()
    }

    pub fn members(&self) -> &[Member] {
        match &self.content {
            DatasetContent::Partitioned { members } => members,
            DatasetContent::Sequential { .. } => &[],
        }
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members().iter().find(|m| m.name == name)
    }

    /// The canonical member an alias points at: the non-alias member
    /// sharing its TTR.
    pub fn resolve_alias(&self, member: &Member) -> Option<&Member> {
        self.members()
            .iter()
            .find(|m| !m.alias && m.ttr == member.ttr)
    }

    /// Raw EBCDIC payload of a sequential dataset; empty for a PDS.
    pub fn data(&self) -> &[u8] {
        match &self.content {
            DatasetContent::Sequential { data, .. } => data,
            DatasetContent::Partitioned { .. } => &[],
        }
    }

    /// Synthesized text of a sequential dataset.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            DatasetContent::Sequential { text, .. } => text.as_deref(),
            DatasetContent::Partitioned { .. } => None,
        }
    }

    /// Total payload bytes, member data summed for a PDS.
    pub fn size(&self) -> usize {
        match &self.content {
            DatasetContent::Sequential { data, .. } => data.len(),
            DatasetContent::Partitioned { members } => {
                members.iter().map(|m| m.data.len()).sum()
            }
        }
    }
}

/// Decoded XMI message (the text TRANSMIT sends alongside or instead of
/// a dataset).
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub lrecl: u32,
    pub text: String,
}

/// Fields of the INMR01 header record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct XmiHeader {
    pub origin_node: String,
    pub origin_user: String,
    pub destination_node: String,
    pub destination_user: String,
    /// ISO-8601 creation timestamp (INMFTIME).
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
}

/// One INMR02 file control record.
#[derive(Debug, Clone, Serialize)]
pub struct Inmr02 {
    pub file_count: u32,
    #[serde(flatten)]
    pub units: TextUnits,
}

/// A parsed XMI transmission.
#[derive(Debug, Clone, Serialize)]
pub struct XmiArchive {
    pub header: XmiHeader,
    pub inmr01: TextUnits,
    pub inmr02: Vec<Inmr02>,
    pub inmr03: Vec<TextUnits>,
    /// Raw installation-exit data from INMR04 records, uninterpreted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inmr04: Vec<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub datasets: Vec<Dataset>,
    #[serde(skip)]
    pub config: Config,
}

/// A parsed AWS/HET virtual tape.
#[derive(Debug, Clone, Serialize)]
pub struct TapeArchive {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeLabel>,
    pub datasets: Vec<Dataset>,
    #[serde(skip)]
    pub config: Config,
}

/// The product of parsing: one XMI transmission or one virtual tape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Archive {
    Xmi(XmiArchive),
    Tape(TapeArchive),
}

/// Metadata summary for one member, aliases resolved.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub recfm: String,
    pub lrecl: u32,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Archive {
    pub fn config(&self) -> &Config {
        match self {
            Archive::Xmi(x) => &x.config,
            Archive::Tape(t) => &t.config,
        }
    }

    pub fn datasets(&self) -> &[Dataset] {
        match self {
            Archive::Xmi(x) => &x.datasets,
            Archive::Tape(t) => &t.datasets,
        }
    }

    /// Ordered dataset names.
    pub fn list_datasets(&self) -> Vec<&str> {
        self.datasets().iter().map(|d| d.name.as_str()).collect()
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets().iter().find(|d| d.name == name)
    }

    fn require_dataset(&self, name: &str) -> Result<&Dataset> {
        self.dataset(name).ok_or_else(|| Error::InconsistentArchive {
            reason: format!("dataset {name} not present in archive"),
        })
    }

    fn require_member<'a>(&'a self, ds: &str, member: &str) -> Result<(&'a Dataset, &'a Member)> {
        let dataset = self.require_dataset(ds)?;
        let found = dataset.member(member).ok_or_else(|| Error::InconsistentArchive {
            reason: format!("member {member} not found in {ds}"),
        })?;
        Ok((dataset, found))
    }

    /// Member names of a partitioned dataset.
    pub fn members(&self, ds: &str) -> Result<Vec<&str>> {
        let dataset = self.require_dataset(ds)?;
        if dataset.is_sequential() {
            return Err(Error::InconsistentArchive {
                reason: format!("{ds} is a sequential dataset"),
            });
        }
        Ok(dataset.members().iter().map(|m| m.name.as_str()).collect())
    }

    pub fn is_partitioned(&self, ds: &str) -> Result<bool> {
        Ok(self.require_dataset(ds)?.is_partitioned())
    }

    pub fn is_sequential(&self, ds: &str) -> Result<bool> {
        Ok(self.require_dataset(ds)?.is_sequential())
    }

    pub fn is_alias(&self, ds: &str, member: &str) -> Result<bool> {
        Ok(self.require_member(ds, member)?.1.alias)
    }

    /// Name of the canonical member an alias resolves to.
    pub fn resolves_to(&self, ds: &str, member: &str) -> Result<Option<String>> {
        let (dataset, found) = self.require_member(ds, member)?;
        Ok(dataset.resolve_alias(found).map(|m| m.name.clone()))
    }

    /// Raw EBCDIC bytes of a member, aliases resolved.
    pub fn member_bytes(&self, ds: &str, member: &str) -> Result<&[u8]> {
        let (dataset, found) = self.require_member(ds, member)?;
        let resolved = if found.alias {
            dataset.resolve_alias(found).unwrap_or(found)
        } else {
            found
        };
        Ok(&resolved.data)
    }

    /// Text of a member, aliases resolved; falls back to a plain decode
    /// of the raw bytes when no text was synthesized.
    pub fn member_text(&self, ds: &str, member: &str) -> Result<String> {
        let (dataset, found) = self.require_member(ds, member)?;
        let resolved = if found.alias {
            dataset.resolve_alias(found).unwrap_or(found)
        } else {
            found
        };
        Ok(match &resolved.text {
            Some(text) => text.clone(),
            None => self.config().codepage.decode(&resolved.data),
        })
    }

    /// Metadata for one member, read through to the alias target.
    pub fn member_info(&self, ds: &str, member: &str) -> Result<MemberInfo> {
        let (dataset, found) = self.require_member(ds, member)?;
        let (alias_of, resolved) = if found.alias {
            match dataset.resolve_alias(found) {
                Some(target) => (Some(target.name.clone()), target),
                None => {
                    return Err(Error::InconsistentArchive {
                        reason: format!("alias target of {member} not found in {ds}"),
                    })
                }
            }
        } else {
            (None, found)
        };

        let (recfm, lrecl) = match &dataset.copyr1 {
            Some(c) => (c.recfm.clone(), u32::from(c.lrecl)),
            None => (dataset.recfm.clone(), dataset.lrecl),
        };
        let size = match (&resolved.text, self.config().binary_only) {
            (Some(text), false) => text.len(),
            _ => resolved.data.len(),
        };

        Ok(MemberInfo {
            alias_of,
            mime: resolved.mime.clone(),
            extension: resolved.extension.clone(),
            recfm,
            lrecl,
            size,
            modified: resolved.ispf.as_ref().map(|i| i.modified.clone()),
            created: resolved.ispf.as_ref().map(|i| i.created.clone()),
            owner: resolved.ispf.as_ref().map(|i| i.user.clone()),
            version: resolved.ispf.as_ref().map(|i| i.version.clone()),
        })
    }

    /// Raw EBCDIC payload of a sequential dataset.
    pub fn dataset_bytes(&self, ds: &str) -> Result<&[u8]> {
        Ok(self.require_dataset(ds)?.data())
    }

    /// Text of a sequential dataset, falling back to a plain decode.
    pub fn dataset_text(&self, ds: &str) -> Result<String> {
        let dataset = self.require_dataset(ds)?;
        Ok(match dataset.text() {
            Some(text) => text.to_string(),
            None => self.config().codepage.decode(dataset.data()),
        })
    }

    /// Decoded XMI message text, if the transmission carried one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Archive::Xmi(x) => x.message.as_ref().map(|m| m.text.as_str()),
            Archive::Tape(_) => None,
        }
    }

    /// Owner: the originating user for XMI, the volume owner for tape.
    pub fn owner(&self) -> &str {
        match self {
            Archive::Xmi(x) => &x.header.origin_user,
            Archive::Tape(t) => t.volume.as_ref().map(|v| v.owner.as_str()).unwrap_or(""),
        }
    }

    /// Tape volume serial; empty for XMI archives.
    pub fn volume_serial(&self) -> &str {
        match self {
            Archive::Xmi(_) => "",
            Archive::Tape(t) => t.volume.as_ref().map(|v| v.volser.as_str()).unwrap_or(""),
        }
    }

    /// Origin node, origin user, destination node, destination user.
    pub fn originator_nodes(&self) -> Option<[&str; 4]> {
        match self {
            Archive::Xmi(x) => Some([
                &x.header.origin_node,
                &x.header.origin_user,
                &x.header.destination_node,
                &x.header.destination_user,
            ]),
            Archive::Tape(_) => None,
        }
    }

    /// Last-modified date of a dataset: the XMI origin timestamp, or the
    /// HDR1 creation date on tape.
    pub fn last_modified(&self, ds: &str) -> String {
        match self {
            Archive::Xmi(x) => x.header.timestamp.clone(),
            Archive::Tape(_) => self
                .dataset(ds)
                .and_then(|d| d.hdr1.as_ref())
                .map(|h| h.created.clone())
                .unwrap_or_default(),
        }
    }

    /// Serialize all metadata to pretty JSON. Raw payload bytes are never
    /// included; synthesized text is included only when `include_text`.
    /// A `CONFIG` object echoing the configuration is appended.
    pub fn metadata_json(&self, include_text: bool) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if !include_text {
            strip_text(&mut value);
        }
        if let Value::Object(map) = &mut value {
            map.insert("CONFIG".to_string(), serde_json::to_value(self.config())?);
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Remove every "text" key, recursively.
fn strip_text(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("text");
            for v in map.values_mut() {
                strip_text(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                strip_text(v);
            }
        }
        _ => {}
    }
}
