//! IEBCOPY unload streams: COPYR1/COPYR2 headers, PDS directory blocks
//! and member-data blocks.
//!
//! A partitioned dataset travels as an IEBCOPY dump: two control records,
//! a run of 276-byte directory pages naming the members, then the member
//! data as 12-byte-headed blocks. Member names are not repeated in the
//! data blocks; payloads are matched to names by walking the canonical
//! (non-alias) TTRs in ascending order.
//!
//! Layouts per
//! <https://www.ibm.com/support/knowledgecenter/SSLTBW_2.2.0/com.ibm.zos.v2r2.idau100/u1322.htm>
//! and the PDS directory description in the DFSMS manuals.

use crate::archive::{get_recfm, IspfStats, Member};
use crate::buf::{be_u16, be_u24, be_u32, byte, slice};
use crate::codepage::Codepage;
use crate::convert;
use crate::dates;
use crate::error::{Error, Result};
use crate::sniff;
use crate::Config;
use log::{debug, warn};
use serde::Serialize;

/// IEBCOPY eyecatcher found at offset 1 of COPYR1 (offset 9 when the
/// record still carries its tape block/segment prefix).
pub const EYECATCHER: u32 = 0xCA6D0F;

/// Directory pages are fixed 276-byte units.
const DIRECTORY_PAGE: usize = 276;

const DIRECTORY_TERMINATOR: [u8; 8] = [0xFF; 8];

/// PDS flavor recorded in COPYR1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PdsKind {
    Pds,
    Pdse,
}

/// Block/segment lengths preceding COPYR1 in tape-sourced datasets.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BlockPrefix {
    pub block_length: u16,
    pub segment_length: u16,
}

/// Device geometry from the IHADVA section of COPYR1.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeviceArea {
    pub options: u16,
    pub class: u8,
    pub unit: u8,
    pub max_record: u32,
    pub cylinders: u16,
    pub tracks_per_cylinder: u16,
    pub track_length: u16,
    pub block_overhead: u16,
}

/// Optional DS1 trailer of COPYR1 (present when bytes 38.. are nonzero).
#[derive(Debug, Clone, Serialize)]
pub struct Ds1Trailer {
    /// Last-referenced date reformatted as `yyjjjj`.
    pub last_referenced: String,
    pub secondary_extension: Vec<u8>,
    pub secondary_allocation: Vec<u8>,
    pub last_track_record: Vec<u8>,
    pub track_balance: Vec<u8>,
}

/// First IEBCOPY control record.
#[derive(Debug, Clone, Serialize)]
pub struct Copyr1 {
    pub kind: PdsKind,
    pub dsorg: u16,
    pub block_length: u16,
    pub lrecl: u16,
    pub recfm: String,
    pub key_length: u8,
    pub option_codes: u8,
    pub sms_flags: u8,
    pub tape_block_size: u16,
    pub device: DeviceArea,
    pub header_records: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ds1: Option<Ds1Trailer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<BlockPrefix>,
}

impl Copyr1 {
    /// Parse a COPYR1 record, tolerating the 8-byte block/segment prefix
    /// that tape-sourced datasets carry in front of it.
    pub fn parse(record: &[u8]) -> Result<Copyr1> {
        let eye_at_1 = be_u24(record, 1).unwrap_or(0);
        let eye_at_9 = be_u24(record, 9).unwrap_or(0);
        if eye_at_1 != EYECATCHER && eye_at_9 != EYECATCHER {
            return Err(Error::invalid("COPYR1 eyecatcher 0xCA6D0F not found", 1));
        }
        if record.len() > 64 {
            return Err(Error::invalid(
                format!("COPYR1 length {} exceeds 64 bytes", record.len()),
                0,
            ));
        }

        let (prefix, body) = if eye_at_1 == EYECATCHER {
            (None, record)
        } else {
            let prefix = BlockPrefix {
                block_length: be_u16(record, 0)?,
                segment_length: be_u16(record, 4)?,
            };
            (Some(prefix), &record[8..])
        };

        let kind = if byte(body, 0)? & 0x01 != 0 {
            PdsKind::Pdse
        } else {
            PdsKind::Pds
        };

        let device = DeviceArea {
            options: be_u16(body, 16)?,
            class: byte(body, 18)?,
            unit: byte(body, 19)?,
            max_record: be_u32(body, 20)?,
            cylinders: be_u16(body, 24)?,
            tracks_per_cylinder: be_u16(body, 26)?,
            track_length: be_u16(body, 28)?,
            block_overhead: be_u16(body, 30)?,
        };

        let ds1 = if body.len() > 38 && body[38..].iter().any(|&b| b != 0) {
            if body.len() >= 54 {
                Some(Ds1Trailer {
                    last_referenced: format!("{:02}{:04}", body[39] % 100, be_u16(body, 40)?),
                    secondary_extension: body[42..45].to_vec(),
                    secondary_allocation: body[45..49].to_vec(),
                    last_track_record: body[49..52].to_vec(),
                    track_balance: body[52..54].to_vec(),
                })
            } else {
                debug!("COPYR1 DS1 trailer present but truncated, ignoring");
                None
            }
        } else {
            None
        };

        let copyr1 = Copyr1 {
            kind,
            dsorg: be_u16(body, 4)?,
            block_length: be_u16(body, 6)?,
            lrecl: be_u16(body, 8)?,
            recfm: get_recfm(slice(body, 10, 2)?),
            key_length: byte(body, 11)?,
            option_codes: byte(body, 12)?,
            sms_flags: byte(body, 13)?,
            tape_block_size: be_u16(body, 14)?,
            device,
            header_records: be_u16(body, 36)?,
            ds1,
            prefix,
        };
        debug!(
            "COPYR1: {:?} dsorg {:#06x} blkl {} lrecl {} recfm {}",
            copyr1.kind, copyr1.dsorg, copyr1.block_length, copyr1.lrecl, copyr1.recfm
        );
        Ok(copyr1)
    }
}

/// Second IEBCOPY control record: the Data Extent Block tail plus the
/// sixteen 16-byte extent descriptors, sliced from offset 0 so that
/// extent 0 aliases the DEB bytes.
#[derive(Debug, Clone, Serialize)]
pub struct Copyr2 {
    pub deb: Vec<u8>,
    pub extents: Vec<Vec<u8>>,
}

impl Copyr2 {
    pub fn parse(record: &[u8]) -> Result<Copyr2> {
        if record.len() > DIRECTORY_PAGE {
            return Err(Error::invalid(
                format!("COPYR2 length {} exceeds 276 bytes", record.len()),
                0,
            ));
        }
        let deb = slice(record, 0, 16)?.to_vec();
        let mut extents = Vec::with_capacity(16);
        for start in (0..256).step_by(16) {
            extents.push(slice(record, start, 16)?.to_vec());
        }
        Ok(Copyr2 { deb, extents })
    }
}

/// One PDS directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ttr: u32,
    pub alias: bool,
    pub notes: u8,
    pub parms: Vec<u8>,
    pub ispf: Option<IspfStats>,
}

/// Whether the concatenated directory bytes already contain the 8×0xFF
/// terminator entry. Used to decide when to stop appending pages.
pub fn directory_complete(dir: &[u8]) -> bool {
    let mut block_loc = 0;
    while block_loc + 22 <= dir.len() {
        let dir_len = (be_u16(dir, block_loc + 20).unwrap_or(0) as usize).saturating_sub(2);
        let info_start = block_loc + 22;
        let info_end = (info_start + dir_len).min(dir.len());
        let info = &dir[info_start..info_end];
        let mut loc = 0;
        while loc + 8 <= info.len() {
            if info[loc..loc + 8] == DIRECTORY_TERMINATOR {
                return true;
            }
            if loc + 12 > info.len() {
                break;
            }
            loc += 12 + ((info[loc + 11] & 0x1F) as usize) * 2;
        }
        block_loc += DIRECTORY_PAGE;
    }
    false
}

/// Decode the PDS directory: 276-byte pages of variable-length entries,
/// ended by a name of eight 0xFF bytes.
pub fn parse_directory(dir: &[u8], cp: Codepage) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut block_loc = 0;

    'pages: while block_loc + 22 <= dir.len() {
        // Page header: 8 zero bytes, key length, data length and the
        // last-referenced member name, none of which we need.
        let dir_len = (be_u16(dir, block_loc + 20)? as usize).saturating_sub(2);
        let info = slice(dir, block_loc + 22, dir_len.min(dir.len() - block_loc - 22))?;
        let mut loc = 0;

        while loc + 8 <= info.len() {
            if info[loc..loc + 8] == DIRECTORY_TERMINATOR {
                debug!("end of directory, {} members", entries.len());
                break 'pages;
            }
            if loc + 12 > info.len() {
                break;
            }

            let name = cp.decode(&info[loc..loc + 8]).trim_end().to_string();
            let ttr = be_u24(info, loc + 8)?;
            let flags = info[loc + 11];
            let alias = flags & 0x80 != 0;
            let notes = (flags & 0x60) >> 5;
            let halfwords = ((flags & 0x1F) as usize) * 2;
            let parms = slice(info, loc + 12, halfwords.min(info.len() - loc - 12))?.to_vec();

            let ispf = if parms.len() >= 30 && notes == 0 {
                parse_ispf(&parms, cp)
            } else {
                None
            };
            debug!(
                "member {name}: ttr {ttr:#08x} alias {alias} notes {notes} \
                 parms {halfwords} bytes ispf {}",
                ispf.is_some()
            );
            entries.push(DirEntry {
                name,
                ttr,
                alias,
                notes,
                parms,
                ispf,
            });
            loc += 12 + halfwords;
        }

        // Pages are fixed-size; realign when the content ran short.
        block_loc += loc + 24;
        if block_loc % DIRECTORY_PAGE > 0 {
            block_loc = (block_loc / DIRECTORY_PAGE) * DIRECTORY_PAGE + DIRECTORY_PAGE;
        }
    }

    Ok(entries)
}

/// ISPF statistics entry in a PDS directory.
///
/// <https://www.ibm.com/support/knowledgecenter/en/SSLTBW_2.1.0/com.ibm.zos.v2r1.f54mc00/ispmc28.htm>
fn parse_ispf(parms: &[u8], cp: Codepage) -> Option<IspfStats> {
    if parms.len() < 30 {
        return None;
    }
    let flags = parms[2];
    let mut stats = IspfStats {
        version: format!("{:02}.{:02}", parms[0], parms[1]),
        flags,
        created: dates::ispf_date(&parms[4..8], 0),
        modified: dates::ispf_date(&parms[8..14], parms[3]),
        lines: u32::from(u16::from_be_bytes([parms[14], parms[15]])),
        new_lines: u32::from(u16::from_be_bytes([parms[16], parms[17]])),
        mod_lines: u32::from(u16::from_be_bytes([parms[18], parms[19]])),
        user: cp.decode(&parms[20..28]).trim_end().to_string(),
    };
    // Extended line counters replace the halfword ones.
    if flags & 0x10 != 0 {
        if parms.len() >= 40 {
            stats.lines = u32::from_be_bytes([parms[28], parms[29], parms[30], parms[31]]);
            stats.new_lines = u32::from_be_bytes([parms[32], parms[33], parms[34], parms[35]]);
            stats.mod_lines = u32::from_be_bytes([parms[36], parms[37], parms[38], parms[39]]);
        } else {
            debug!("ISPF extended statistics flagged but parms too short");
        }
    }
    Some(stats)
}

/// Promote alias entries whose TTR matches no canonical member. Handles
/// directories where every entry at a TTR is marked alias.
pub fn fix_circular_aliases(entries: &mut [DirEntry]) {
    let mut canonical: Vec<u32> = entries.iter().filter(|e| !e.alias).map(|e| e.ttr).collect();
    for entry in entries.iter_mut() {
        if entry.alias && !canonical.contains(&entry.ttr) {
            debug!("promoting circular alias {} to canonical", entry.name);
            entry.alias = false;
            canonical.push(entry.ttr);
        }
    }
}

/// Completed raw payload of one member, in block-arrival order.
struct MemberData {
    name: String,
    data: Vec<u8>,
    records: Vec<Vec<u8>>,
}

/// Walk the member-data blocks and attribute payloads to member names by
/// ascending canonical TTR. Surplus payloads become `DELETED{n}` members
/// unless `strict` rejects them.
fn walk_member_blocks(
    blocks: &[u8],
    entries: &[DirEntry],
    copyr1: &Copyr1,
    strict: bool,
) -> Result<Vec<MemberData>> {
    let is_variable = copyr1.recfm.contains('V');
    let is_pdse = copyr1.kind == PdsKind::Pdse;

    let mut order: Vec<(u32, &str)> = entries
        .iter()
        .filter(|e| !e.alias)
        .map(|e| (e.ttr, e.name.as_str()))
        .collect();
    order.sort_by_key(|&(ttr, _)| ttr);
    let mut names: Vec<String> = order.into_iter().map(|(_, n)| n.to_string()).collect();

    let mut out = Vec::new();
    let mut data: Vec<u8> = Vec::new();
    let mut records: Vec<Vec<u8>> = Vec::new();
    let mut loc = 0;
    let mut ttr_index = 0;
    let mut deleted_num = 1;
    let mut prev_ttr = 0;
    let mut record_closed = false;

    while loc + 12 <= blocks.len() {
        // Example headers from real XMI files
        // F  M  BB    CC    TT    R  KL DLen
        // 00 00 00 00 04 45 00 09 04 00 03 C0
        // 00 00 00 00 00 3E 00 05 0E 00 00 FB
        let ttr = be_u24(blocks, loc + 6)?;
        let data_len = be_u16(blocks, loc + 10)? as usize;

        if is_pdse && record_closed {
            // PDSE dumps repeat the previous TTR in empty records before
            // the next member begins.
            if ttr == prev_ttr {
                loc += data_len + 12;
                continue;
            }
            record_closed = false;
        }

        if ttr == 0 && data_len == 0 {
            loc += 12;
            continue;
        }

        if ttr_index >= names.len() {
            if strict {
                return Err(Error::InconsistentArchive {
                    reason: format!(
                        "member data blocks exceed the {} directory entries",
                        names.len()
                    ),
                });
            }
            warn!(
                "encountered more member data than directory names: {} names, file {}",
                names.len(),
                ttr_index + 1
            );
            names.push(format!("DELETED{deleted_num}"));
            deleted_num += 1;
        }

        debug!(
            "member block: {} ttr {ttr:#08x} extent {} key {} data {data_len}",
            names[ttr_index],
            blocks[loc + 1],
            blocks[loc + 9],
        );

        let payload = slice(blocks, loc + 12, data_len)?;
        if is_variable {
            records.extend(split_vb(payload));
            data = records.concat();
        } else {
            data.extend_from_slice(payload);
        }

        if data_len == 0 {
            // End of one member.
            if is_pdse {
                record_closed = true;
            }
            out.push(MemberData {
                name: names[ttr_index].clone(),
                data: std::mem::take(&mut data),
                records: std::mem::take(&mut records),
            });
            ttr_index += 1;
            prev_ttr = ttr;
        }

        loc += data_len + 12;
    }

    if !data.is_empty() {
        // Trailing records are not always followed by a zero-length block.
        debug!("flushing trailing member record");
        if ttr_index >= names.len() {
            if strict {
                return Err(Error::InconsistentArchive {
                    reason: "trailing member data with no directory entry".to_string(),
                });
            }
            names.push(format!("DELETED{deleted_num}"));
        }
        out.push(MemberData {
            name: names[ttr_index].clone(),
            data,
            records,
        });
    }

    Ok(out)
}

/// Strip the BDW from a variable-format physical record and return its
/// RDW-delimited logical records.
pub fn split_vb(block: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut loc = 4;
    while loc + 2 <= block.len() {
        let rdw = u16::from_be_bytes([block[loc], block[loc + 1]]) as usize;
        if rdw == 0 {
            out.push(Vec::new());
            break;
        }
        let end = (loc + rdw).min(block.len());
        if loc + 4 < end {
            out.push(block[loc + 4..end].to_vec());
        } else {
            out.push(Vec::new());
        }
        loc += rdw;
    }
    out
}

/// A fully reassembled partitioned dataset.
#[derive(Debug, Clone)]
pub struct Pds {
    pub copyr1: Copyr1,
    pub copyr2: Copyr2,
    pub members: Vec<Member>,
}

/// Reassemble a PDS from XMI logical records: COPYR1, COPYR2, directory
/// pages, member blocks.
pub fn from_xmi_records(records: &[Vec<u8>], cfg: &Config) -> Result<Pds> {
    let first = records
        .first()
        .ok_or_else(|| Error::invalid("empty dataset cannot be a PDS", 0))?;
    let copyr1 = Copyr1::parse(first)?;
    let second = records
        .get(1)
        .ok_or_else(|| Error::invalid("PDS dataset lacks a COPYR2 record", 0))?;
    let copyr2 = Copyr2::parse(second)?;

    let mut dir: Vec<u8> = Vec::new();
    let mut next = 2;
    while next < records.len() {
        dir.extend_from_slice(&records[next]);
        next += 1;
        if directory_complete(&dir) {
            break;
        }
    }

    let blocks: Vec<u8> = records[next..].concat();
    let members = build_members(&dir, &blocks, &copyr1, cfg)?;
    Ok(Pds {
        copyr1,
        copyr2,
        members,
    })
}

/// Reassemble a PDS from a contiguous tape dataset, where every physical
/// record carries its own block/segment descriptor words.
pub fn from_tape_data(data: &[u8], cfg: &Config) -> Result<Pds> {
    let copyr1_size = be_u16(data, 0)? as usize;
    let copyr1 = Copyr1::parse(slice(data, 0, copyr1_size)?)?;
    let copyr2_size = be_u16(data, copyr1_size)? as usize;
    if copyr2_size < 8 {
        return Err(Error::invalid("COPYR2 block too short", copyr1_size));
    }
    let copyr2 = Copyr2::parse(slice(data, copyr1_size + 8, copyr2_size - 8)?)?;

    let rest = data.get(copyr1_size + copyr2_size..).ok_or_else(|| Error::Truncated {
        needed: (copyr1_size + copyr2_size).saturating_sub(data.len()),
        offset: data.len(),
    })?;

    // Directory pages, BDW/SDW framed.
    let mut dir: Vec<u8> = Vec::new();
    let mut loc = 0;
    while loc + 8 <= rest.len() {
        let block_size = be_u16(rest, loc)? as usize;
        let seg_size = be_u16(rest, loc + 4)? as usize;
        debug!("directory BDW size {block_size} SDW size {seg_size}");
        if block_size < 8 {
            return Err(Error::invalid("directory block descriptor too short", loc));
        }
        dir.extend_from_slice(slice(rest, loc + 8, block_size - 8)?);
        loc += block_size;
        if directory_complete(&dir) {
            break;
        }
    }

    // Member data blocks until the 12-zero-byte trailer.
    let rest = &rest[loc..];
    let mut blocks: Vec<u8> = Vec::new();
    let mut loc = 0;
    while loc + 8 <= rest.len() {
        let block_size = be_u16(rest, loc)? as usize;
        if block_size < 8 {
            return Err(Error::invalid("member block descriptor too short", loc));
        }
        blocks.extend_from_slice(slice(rest, loc + 8, block_size - 8)?);
        loc += block_size;
        if blocks.len() >= 12 && blocks[blocks.len() - 12..] == [0u8; 12] {
            break;
        }
    }

    let members = build_members(&dir, &blocks, &copyr1, cfg)?;
    Ok(Pds {
        copyr1,
        copyr2,
        members,
    })
}

/// Combine directory entries with reassembled payloads, classify each
/// member and synthesize text where the classification allows it.
fn build_members(
    dir: &[u8],
    blocks: &[u8],
    copyr1: &Copyr1,
    cfg: &Config,
) -> Result<Vec<Member>> {
    let mut entries = parse_directory(dir, cfg.codepage)?;
    fix_circular_aliases(&mut entries);
    let payloads = walk_member_blocks(blocks, &entries, copyr1, cfg.strict)?;

    let mut members: Vec<Member> = entries
        .into_iter()
        .map(|e| Member {
            name: e.name,
            ttr: e.ttr,
            alias: e.alias,
            ispf: e.ispf,
            data: Vec::new(),
            text: None,
            mime: None,
            charset: None,
            extension: None,
        })
        .collect();

    let is_variable = copyr1.recfm.contains('V');
    for payload in payloads {
        let class = sniff::classify(&payload.data, cfg.codepage, cfg.force_text);
        let text = if !cfg.binary_only && class.is_text(cfg.force_text) {
            Some(if is_variable {
                convert::variable_text(cfg.codepage, &payload.records, cfg.unnum)
            } else {
                convert::fixed_text(
                    cfg.codepage,
                    &payload.data,
                    copyr1.lrecl as usize,
                    cfg.unnum,
                )
            })
        } else {
            None
        };
        debug!(
            "member {}: mime {} charset {} size {}",
            payload.name,
            class.mime,
            class.charset,
            payload.data.len()
        );

        match members.iter_mut().find(|m| m.name == payload.name) {
            Some(member) => {
                member.data = payload.data;
                member.text = text;
                member.mime = Some(class.mime);
                member.charset = Some(class.charset);
                member.extension = class.extension;
            }
            None => {
                // DELETED{n} payloads have no directory entry.
                members.push(Member {
                    name: payload.name,
                    ttr: 0,
                    alias: false,
                    ispf: None,
                    data: payload.data,
                    text,
                    mime: Some(class.mime),
                    charset: Some(class.charset),
                    extension: class.extension,
                });
            }
        }
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::default()
    }

    /// 56-byte COPYR1 for a fixed-blocked PDS, LRECL 80.
    fn copyr1_record() -> Vec<u8> {
        let mut rec = vec![0u8; 56];
        rec[1] = 0xCA;
        rec[2] = 0x6D;
        rec[3] = 0x0F;
        rec[4] = 0x02; // DSORG = PO
        rec[5] = 0x00;
        rec[6] = 0x0D; // block length 3440
        rec[7] = 0x70;
        rec[8] = 0x00; // LRECL 80
        rec[9] = 0x50;
        rec[10] = 0x90; // RECFM FB
        rec[11] = 0x00;
        rec[36] = 0x00; // header records
        rec[37] = 0x02;
        rec
    }

    fn ebcdic_name(name: &str) -> Vec<u8> {
        Codepage::Cp1140.encode(&format!("{name:<8}")).unwrap()
    }

    fn directory_entry(name: &str, ttr: u32, info: u8, parms: &[u8]) -> Vec<u8> {
        let mut e = ebcdic_name(name);
        e.extend(&ttr.to_be_bytes()[1..]);
        e.push(info);
        e.extend(parms);
        e
    }

    /// One 276-byte directory page holding the given entries plus the
    /// 0xFF terminator.
    fn directory_page(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut body: Vec<u8> = entries.concat();
        body.extend([0xFF; 8]);
        let mut page = vec![0u8; 12];
        page.extend(ebcdic_name("LASTMEM"));
        page.extend(((body.len() + 2) as u16).to_be_bytes());
        page.extend(&body);
        page.resize(276, 0);
        page
    }

    fn data_block(ttr: u32, payload: &[u8]) -> Vec<u8> {
        let mut b = vec![0u8; 6];
        b.extend(&ttr.to_be_bytes()[1..]);
        b.push(0); // key length
        b.extend((payload.len() as u16).to_be_bytes());
        b.extend(payload);
        b
    }

    #[test]
    fn test_copyr1_without_prefix() {
        let c = Copyr1::parse(&copyr1_record()).unwrap();
        assert_eq!(c.kind, PdsKind::Pds);
        assert_eq!(c.lrecl, 80);
        assert_eq!(c.recfm, "FB");
        assert_eq!(c.block_length, 3440);
        assert_eq!(c.header_records, 2);
        assert!(c.prefix.is_none());
        assert!(c.ds1.is_none());
    }

    #[test]
    fn test_copyr1_with_tape_prefix() {
        let mut rec = vec![0x00, 0x40, 0x00, 0x00, 0x00, 0x38, 0x00, 0x00];
        rec.extend(copyr1_record());
        let c = Copyr1::parse(&rec).unwrap();
        assert_eq!(c.lrecl, 80);
        let prefix = c.prefix.unwrap();
        assert_eq!(prefix.block_length, 0x40);
        assert_eq!(prefix.segment_length, 0x38);
    }

    #[test]
    fn test_copyr1_pdse_flag() {
        let mut rec = copyr1_record();
        rec[0] = 0x01;
        assert_eq!(Copyr1::parse(&rec).unwrap().kind, PdsKind::Pdse);
    }

    #[test]
    fn test_copyr1_rejects_missing_eyecatcher() {
        let rec = vec![0u8; 56];
        assert!(Copyr1::parse(&rec).is_err());
    }

    #[test]
    fn test_copyr1_ds1_trailer() {
        let mut rec = copyr1_record();
        rec[39] = 121; // 121 % 100 = 21
        rec[40] = 0x00;
        rec[41] = 0x2D; // day 45
        let c = Copyr1::parse(&rec).unwrap();
        assert_eq!(c.ds1.unwrap().last_referenced, "210045");
    }

    #[test]
    fn test_directory_two_members_with_alias() {
        let page = directory_page(&[
            directory_entry("MAIN", 0x000001, 0x00, &[]),
            directory_entry("LINK", 0x000001, 0x80, &[]),
        ]);
        let entries = parse_directory(&page, Codepage::Cp1140).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "MAIN");
        assert!(!entries[0].alias);
        assert_eq!(entries[1].name, "LINK");
        assert!(entries[1].alias);
        assert_eq!(entries[0].ttr, entries[1].ttr);
    }

    #[test]
    fn test_directory_spanning_pages() {
        // First page without a terminator, second page with it
        let mut body = directory_entry("AAA", 1, 0, &[]);
        let mut page1 = vec![0u8; 12];
        page1.extend(ebcdic_name("AAA"));
        page1.extend(((body.len() + 2) as u16).to_be_bytes());
        page1.append(&mut body);
        page1.resize(276, 0);
        assert!(!directory_complete(&page1));

        let mut dir = page1;
        dir.extend(directory_page(&[directory_entry("BBB", 2, 0, &[])]));
        assert!(directory_complete(&dir));
        let entries = parse_directory(&dir, Codepage::Cp1140).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "BBB");
    }

    #[test]
    fn test_ispf_statistics_decoded() {
        let mut parms = vec![0u8; 30];
        parms[0] = 1; // version 01.05
        parms[1] = 5;
        parms[2] = 0; // flags
        parms[3] = 0x30; // 30 seconds
        parms[4..8].copy_from_slice(&[0x01, 0x21, 0x04, 0x5F]); // 2021 day 45
        parms[8..14].copy_from_slice(&[0x01, 0x21, 0x04, 0x5F, 0x11, 0x05]);
        parms[14] = 0x00;
        parms[15] = 0x10; // 16 lines
        parms[20..28].copy_from_slice(&Codepage::Cp1140.encode("IBMUSER ").unwrap());
        let page = directory_page(&[directory_entry("STATS", 5, 15, &parms)]);

        let entries = parse_directory(&page, Codepage::Cp1140).unwrap();
        let ispf = entries[0].ispf.as_ref().unwrap();
        assert_eq!(ispf.version, "01.05");
        assert_eq!(ispf.created, "2021-02-14T00:00:00.000000");
        assert_eq!(ispf.modified, "2021-02-14T11:05:30.000000");
        assert_eq!(ispf.lines, 16);
        assert_eq!(ispf.user, "IBMUSER");
    }

    #[test]
    fn test_ispf_skipped_when_notes_nonzero() {
        let parms = vec![0u8; 30];
        // notes bits (0x60) nonzero: info byte 0x2F -> notes 1, 15 halfwords
        let page = directory_page(&[directory_entry("NOTED", 5, 0x2F, &parms)]);
        let entries = parse_directory(&page, Codepage::Cp1140).unwrap();
        assert!(entries[0].ispf.is_none());
    }

    #[test]
    fn test_circular_alias_promotion() {
        let page = directory_page(&[
            directory_entry("AAAA", 0x000007, 0x80, &[]),
            directory_entry("BBBB", 0x000007, 0x80, &[]),
        ]);
        let mut entries = parse_directory(&page, Codepage::Cp1140).unwrap();
        fix_circular_aliases(&mut entries);
        let canonical: Vec<_> = entries.iter().filter(|e| !e.alias).collect();
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].name, "AAAA");
        assert!(entries[1].alias);
    }

    #[test]
    fn test_full_pds_from_xmi_records() {
        let text = Codepage::Cp1140
            .encode(&format!("{:<80}{:<80}", "HELLO", "WORLD"))
            .unwrap();
        let records = vec![
            copyr1_record(),
            vec![0u8; 276],
            directory_page(&[
                directory_entry("MAIN", 0x000001, 0x00, &[]),
                directory_entry("LINK", 0x000001, 0x80, &[]),
            ]),
            [data_block(0x000001, &text), data_block(0x000001, &[])].concat(),
        ];
        let pds = from_xmi_records(&records, &test_config()).unwrap();
        assert_eq!(pds.members.len(), 2);

        let main = pds.members.iter().find(|m| m.name == "MAIN").unwrap();
        assert_eq!(main.data.len(), 160);
        assert_eq!(main.text.as_deref(), Some("HELLO\nWORLD\n"));
        assert!(!main.alias);

        let link = pds.members.iter().find(|m| m.name == "LINK").unwrap();
        assert!(link.alias);
        assert_eq!(link.ttr, main.ttr);
        assert!(link.data.is_empty());
    }

    #[test]
    fn test_deleted_member_synthesis() {
        let page = directory_page(&[directory_entry("ONLY", 0x000001, 0x00, &[])]);
        let blocks = [
            data_block(0x000001, b"\x01\x02"),
            data_block(0x000001, &[]),
            data_block(0x000002, b"\x03\x04"),
            data_block(0x000002, &[]),
        ]
        .concat();
        let copyr1 = Copyr1::parse(&copyr1_record()).unwrap();
        let members = build_members(&page, &blocks, &copyr1, &test_config()).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].name, "DELETED1");
        assert_eq!(members[1].data, vec![0x03, 0x04]);
    }

    #[test]
    fn test_strict_rejects_surplus_data() {
        let page = directory_page(&[directory_entry("ONLY", 0x000001, 0x00, &[])]);
        let blocks = [
            data_block(0x000001, b"\x01\x02"),
            data_block(0x000001, &[]),
            data_block(0x000002, b"\x03\x04"),
            data_block(0x000002, &[]),
        ]
        .concat();
        let copyr1 = Copyr1::parse(&copyr1_record()).unwrap();
        let cfg = Config {
            strict: true,
            ..Config::default()
        };
        assert!(matches!(
            build_members(&page, &blocks, &copyr1, &cfg),
            Err(Error::InconsistentArchive { .. })
        ));
    }

    #[test]
    fn test_split_vb_records() {
        // BDW (4 bytes), then two RDW-prefixed records
        let mut block = vec![0x00, 0x14, 0x00, 0x00];
        block.extend([0x00, 0x08, 0x00, 0x00]); // RDW: length 8
        block.extend(b"ABCD");
        block.extend([0x00, 0x07, 0x00, 0x00]); // RDW: length 7
        block.extend(b"EFG");
        let records = split_vb(&block);
        assert_eq!(records, vec![b"ABCD".to_vec(), b"EFG".to_vec()]);
    }

    #[test]
    fn test_copyr2_extents() {
        let mut rec = vec![0u8; 276];
        rec[0] = 0xAA;
        rec[16] = 0xBB;
        let c = Copyr2::parse(&rec).unwrap();
        assert_eq!(c.deb[0], 0xAA);
        assert_eq!(c.extents.len(), 16);
        assert_eq!(c.extents[0][0], 0xAA); // extent 0 aliases the DEB
        assert_eq!(c.extents[1][0], 0xBB);
    }
}
