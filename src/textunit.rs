//! IBM text units: the key/count/length/value metadata tuples carried by
//! XMI control records.
//!
//! Each block is a big-endian `key`, a `count` of entries, then `count`
//! length-prefixed values. A zero count makes the block exactly 4 bytes;
//! two keys give a zero count meaning (INMFACK is simply skipped, INMTERM
//! flags that the file carries a message).
//!
//! Documented at
//! <https://www.ibm.com/support/knowledgecenter/en/SSLTBW_2.1.0/com.ibm.zos.v2r1.ikjb400/txunit.htm>

use crate::buf::{be_u16, slice};
use crate::codepage::Codepage;
use crate::error::Result;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

/// How a text unit's value bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuKind {
    Character,
    Decimal,
    Hex,
}

/// Reference catalog of the recognized text-unit keys.
pub const CATALOG: &[(u16, &str, TuKind, &str)] = &[
    (0x0001, "INMDDNAM", TuKind::Character, "DDNAME for the file"),
    (0x0002, "INMDSNAM", TuKind::Character, "Name of the file"),
    (0x0003, "INMMEMBR", TuKind::Character, "Member name list"),
    (0x000B, "INMSECND", TuKind::Decimal, "Secondary space quantity"),
    (0x000C, "INMDIR", TuKind::Decimal, "Number of directory blocks"),
    (0x0022, "INMEXPDT", TuKind::Character, "Expiration date"),
    (0x0028, "INMTERM", TuKind::Character, "Data transmitted as a message"),
    (0x0030, "INMBLKSZ", TuKind::Decimal, "Block size"),
    (0x003C, "INMDSORG", TuKind::Hex, "File organization"),
    (0x0042, "INMLRECL", TuKind::Decimal, "Logical record length"),
    (0x0049, "INMRECFM", TuKind::Hex, "Record format"),
    (0x1001, "INMTNODE", TuKind::Character, "Target node name or node number"),
    (0x1002, "INMTUID", TuKind::Character, "Target user ID"),
    (0x1011, "INMFNODE", TuKind::Character, "Origin node name or node number"),
    (0x1012, "INMFUID", TuKind::Character, "Origin user ID"),
    (0x1020, "INMLREF", TuKind::Character, "Date last referenced"),
    (0x1021, "INMLCHG", TuKind::Character, "Date last changed"),
    (0x1022, "INMCREAT", TuKind::Character, "Creation date"),
    (0x1023, "INMFVERS", TuKind::Character, "Origin version number of the data format"),
    (0x1024, "INMFTIME", TuKind::Character, "Origin timestamp"),
    (0x1025, "INMTTIME", TuKind::Character, "Destination timestamp"),
    (0x1026, "INMFACK", TuKind::Character, "Originator requested notification"),
    (0x1027, "INMERRCD", TuKind::Character, "RECEIVE command error code"),
    (0x1028, "INMUTILN", TuKind::Character, "Name of utility program"),
    (0x1029, "INMUSERP", TuKind::Character, "User parameter string"),
    (0x102A, "INMRECCT", TuKind::Character, "Transmitted record count"),
    (0x102C, "INMSIZE", TuKind::Decimal, "File size in bytes"),
    (0x102F, "INMNUMF", TuKind::Decimal, "Number of files transmitted"),
    (0x8012, "INMTYPE", TuKind::Hex, "Data set type"),
];

fn catalog_lookup(key: u16) -> Option<&'static (u16, &'static str, TuKind, &'static str)> {
    CATALOG.iter().find(|entry| entry.0 == key)
}

/// A decoded text-unit value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TuValue {
    Text(String),
    Number(u64),
    Bytes(Vec<u8>),
}

/// Decoded text units of one control record, keyed by mnemonic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TextUnits {
    #[serde(flatten)]
    values: BTreeMap<String, TuValue>,

    /// Set when an INMTERM unit with a zero count was seen: the XMI
    /// carries a message instead of (or before) a dataset.
    #[serde(skip)]
    pub message: bool,
}

impl TextUnits {
    /// Decode a concatenation of text-unit blocks.
    pub fn parse(data: &[u8], cp: Codepage) -> Result<TextUnits> {
        let mut units = TextUnits::default();
        let mut dsname_parts: Vec<String> = Vec::new();
        let mut loc = 0;

        while loc + 4 <= data.len() {
            let key = be_u16(data, loc)?;
            let count = be_u16(data, loc + 2)?;

            if count == 0 {
                // A zero-count block occupies the 4 header bytes only.
                if key == 0x0028 {
                    debug!("INMTERM with zero count: file carries a message");
                    units.message = true;
                }
                loc += 4;
                continue;
            }

            for i in 0..count {
                let (length, value_start) = if i == 0 {
                    (be_u16(data, loc + 4)? as usize, loc + 6)
                } else {
                    (be_u16(data, loc)? as usize, loc + 2)
                };
                let item = slice(data, value_start, length)?;

                if let Some(&(_, mnemonic, kind, desc)) = catalog_lookup(key) {
                    let value = match kind {
                        TuKind::Character => {
                            let text = cp.decode(item);
                            if mnemonic == "INMDSNAM" {
                                dsname_parts.push(text.clone());
                            }
                            TuValue::Text(text)
                        }
                        TuKind::Decimal => TuValue::Number(be_uint(item)),
                        TuKind::Hex if mnemonic == "INMTYPE" => {
                            TuValue::Text(dataset_type(be_uint(item)).to_string())
                        }
                        TuKind::Hex => TuValue::Bytes(item.to_vec()),
                    };
                    debug!(
                        "text unit key {key:#06x} '{mnemonic}' ({desc}) entry {i}/{count} \
                         length {length}: {value:?}"
                    );
                    units.values.insert(mnemonic.to_string(), value);
                } else {
                    debug!("unrecognized text unit key {key:#06x}, length {length}");
                }

                loc = value_start + length;
            }
        }

        if !dsname_parts.is_empty() {
            // The dataset name arrives as one entry per qualifier.
            units
                .values
                .insert("INMDSNAM".to_string(), TuValue::Text(dsname_parts.join(".")));
        }

        Ok(units)
    }

    pub fn contains(&self, mnemonic: &str) -> bool {
        self.values.contains_key(mnemonic)
    }

    pub fn text(&self, mnemonic: &str) -> Option<&str> {
        match self.values.get(mnemonic) {
            Some(TuValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, mnemonic: &str) -> Option<u64> {
        match self.values.get(mnemonic) {
            Some(TuValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn bytes(&self, mnemonic: &str) -> Option<&[u8]> {
        match self.values.get(mnemonic) {
            Some(TuValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Replace or add a value. Used for the decoded DSORG/RECFM strings
    /// and the dataset-name fallback.
    pub fn set_text(&mut self, mnemonic: &str, value: impl Into<String>) {
        self.values
            .insert(mnemonic.to_string(), TuValue::Text(value.into()));
    }
}

/// Big-endian unsigned integer over an arbitrary-width value field.
fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// INMTYPE values per the IBM text-unit documentation.
fn dataset_type(value: u64) -> &'static str {
    match value {
        0x80 => "Data Library",
        0x40 => "Program Library",
        0x04 => "Extended PS",
        0x01 => "Large Format PS",
        _ => "None",
    }
}
