//! AWS/HET virtual tape decoding.
//!
//! A virtual tape is a run of blocks, each behind a 6-byte header: the
//! current and previous block data lengths (little-endian) and a flag
//! halfword. NEWREC/ENDREC bracket logical records, EOF is the tape mark
//! that ends a file, and HET adds per-block zlib or bzip2 compression.
//! Standard labels (VOL1, HDR1, HDR2, user labels) ride between tape
//! marks and are consumed rather than stored as files.

use crate::archive::{get_dsorg, Dataset, DatasetContent, TapeArchive};
use crate::buf::{be_u16, le_u16, slice};
use crate::convert;
use crate::dates;
use crate::error::{Error, Result};
use crate::iebcopy;
use crate::sniff;
use crate::Config;
use bzip2::read::BzDecoder;
use flate2::read::ZlibDecoder;
use log::debug;
use serde::Serialize;
use std::io::Read;

const FLAG_NEWREC: u16 = 0x8000;
const FLAG_EOF: u16 = 0x4000;
const FLAG_ENDREC: u16 = 0x2000;
const FLAG_BZIP2: u16 = 0x0200;
const FLAG_ZLIB: u16 = 0x0100;

const LABEL_IDS: [&str; 5] = ["VOL1", "HDR1", "HDR2", "EOF1", "EOF2"];

/// VOL1 label: volume serial and owner.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeLabel {
    pub volser: String,
    pub owner: String,
}

/// HDR1 standard tape label (80 bytes).
#[derive(Debug, Clone, Serialize)]
pub struct Hdr1 {
    pub dsn: String,
    pub serial: String,
    pub volume_seq: u32,
    pub dataset_seq: u32,
    pub generation: u32,
    pub version: u32,
    /// ISO-8601 creation date, empty when unparsable.
    pub created: String,
    /// ISO-8601 expiration date, empty when unparsable.
    pub expires: String,
    pub security: bool,
    pub block_count_low: u32,
    pub system_code: String,
    pub block_count_high: u32,
}

/// HDR2 standard tape label (80 bytes).
#[derive(Debug, Clone, Serialize)]
pub struct Hdr2 {
    pub recfm: String,
    pub block_length: u32,
    pub lrecl: u32,
    pub density: u32,
    pub position: String,
    pub jobid: String,
    pub technique: String,
    pub control_char: String,
    pub block_attr: String,
    pub device_serial: String,
    pub dataset_id: String,
    pub large_block_length: String,
}

/// One file captured between tape marks, with the labels that preceded
/// it.
struct TapeFile {
    seq: u32,
    data: Vec<u8>,
    hdr1: Option<Hdr1>,
    hdr2: Option<Hdr2>,
    user_labels: Vec<String>,
}

struct RawTape {
    volume: Option<VolumeLabel>,
    files: Vec<TapeFile>,
}

/// Parse an AWS/HET buffer into a [`TapeArchive`].
pub fn parse_archive(buf: &[u8], cfg: &Config) -> Result<TapeArchive> {
    let raw = parse_raw(buf, cfg)?;
    assemble(raw, cfg)
}

/// Walk the block stream: decompress, accumulate records, recognize
/// labels and cut files at tape marks.
fn parse_raw(buf: &[u8], cfg: &Config) -> Result<RawTape> {
    let cp = cfg.codepage;
    let mut volume: Option<VolumeLabel> = None;
    let mut hdr1: Option<Hdr1> = None;
    let mut hdr2: Option<Hdr2> = None;
    let mut user_labels: Vec<String> = Vec::new();
    let mut files: Vec<TapeFile> = Vec::new();
    let mut accumulator: Vec<u8> = Vec::new();
    let mut file_num = 1u32;
    let mut loc = 0usize;

    while loc + 6 <= buf.len() {
        let cur_size = le_u16(buf, loc)? as usize;
        let prev_size = le_u16(buf, loc + 2)? as usize;
        let flags = be_u16(buf, loc + 4)?;

        if flags & (FLAG_NEWREC | FLAG_EOF | FLAG_ENDREC) == 0 {
            return Err(Error::invalid(
                format!("tape header flag {flags:#06x} unrecognized"),
                loc + 4,
            ));
        }

        let block = slice(buf, loc + 6, cur_size)?;
        let record = match flags & (FLAG_BZIP2 | FLAG_ZLIB) {
            0 => block.to_vec(),
            FLAG_BZIP2 => decompress_bzip2(block, loc + 6)?,
            FLAG_ZLIB => decompress_zlib(block, loc + 6)?,
            both => {
                return Err(Error::unsupported(
                    format!("conflicting compression flags {both:#06x}"),
                    loc + 4,
                ))
            }
        };
        accumulator.extend_from_slice(&record);

        debug!(
            "tape block at {loc}: size {cur_size} prev {prev_size} flags {flags:#06x} \
             accumulated {}",
            accumulator.len()
        );

        if volume.is_none() && accumulator.len() >= 51 && cp.decode(&accumulator[..4]) == "VOL1" {
            volume = Some(VolumeLabel {
                volser: cp.decode(&accumulator[4..10]),
                owner: cp.decode(&accumulator[41..51]),
            });
        }
        if record.len() == 80 {
            let label = cp.decode(&record);
            if label.starts_with("HDR1") {
                hdr1 = Some(parse_hdr1(&label));
            } else if label.starts_with("HDR2") {
                hdr2 = Some(parse_hdr2(&label));
            }
        }
        if record.len() == 3 && cp.decode(&record) == "UTL" {
            user_labels.push(cp.decode(&record));
        }

        if flags & FLAG_EOF != 0 {
            let head = cp.decode(&accumulator[..accumulator.len().min(4)]);
            if LABEL_IDS.contains(&head.as_str()) {
                debug!("skipping VOL/HDR/EOF label group of type {head}");
                accumulator.clear();
            } else if accumulator.is_empty() {
                debug!("empty tape entry, skipping");
            } else {
                files.push(TapeFile {
                    seq: file_num,
                    data: std::mem::take(&mut accumulator),
                    hdr1: hdr1.take(),
                    hdr2: hdr2.take(),
                    user_labels: std::mem::take(&mut user_labels),
                });
                file_num += 1;
            }
        }

        loc += cur_size + 6;
    }

    Ok(RawTape { volume, files })
}

/// Classify each tape file, synthesize text, attempt IEBCOPY and build
/// datasets.
fn assemble(raw: RawTape, cfg: &Config) -> Result<TapeArchive> {
    let cp = cfg.codepage;
    let mut datasets = Vec::new();

    for file in raw.files {
        let class = sniff::classify(&file.data, cp, cfg.force_text);
        let name = file
            .hdr1
            .as_ref()
            .map(|h| h.dsn.clone())
            .filter(|dsn| !dsn.is_empty())
            .unwrap_or_else(|| format!("FILE{:04}", file.seq));
        debug!(
            "tape file {}: {name} mime {} charset {} size {}",
            file.seq,
            class.mime,
            class.charset,
            file.data.len()
        );

        // PDS payloads carry the IEBCOPY eyecatcher behind their first
        // block descriptor.
        match iebcopy::from_tape_data(&file.data, cfg) {
            Ok(pds) => {
                datasets.push(Dataset {
                    name,
                    dsorg: get_dsorg(pds.copyr1.dsorg),
                    recfm: pds.copyr1.recfm.clone(),
                    lrecl: u32::from(pds.copyr1.lrecl),
                    block_size: u32::from(pds.copyr1.block_length),
                    created: file.hdr1.as_ref().map(|h| h.created.clone()),
                    hdr1: file.hdr1,
                    hdr2: file.hdr2,
                    copyr1: Some(pds.copyr1),
                    copyr2: Some(pds.copyr2),
                    user_labels: file.user_labels,
                    mime: "pds/directory".to_string(),
                    charset: "binary".to_string(),
                    extension: None,
                    file_seq: file.seq,
                    content: DatasetContent::Partitioned {
                        members: pds.members,
                    },
                });
            }
            Err(err) => {
                debug!("{name} is not a PDS: {err}");
                let text = if !cfg.binary_only && class.is_text(cfg.force_text) {
                    match &file.hdr2 {
                        Some(h2) if h2.recfm.contains('F') => Some(convert::fixed_text(
                            cp,
                            &file.data,
                            h2.lrecl as usize,
                            cfg.unnum,
                        )),
                        Some(_) => None,
                        None => Some(convert::fixed_text(
                            cp,
                            &file.data,
                            cfg.lrecl as usize,
                            cfg.unnum,
                        )),
                    }
                } else {
                    None
                };
                let (recfm, lrecl) = match &file.hdr2 {
                    Some(h2) => (h2.recfm.clone(), h2.lrecl),
                    None => ("U".to_string(), u32::from(cfg.lrecl)),
                };
                datasets.push(Dataset {
                    name,
                    dsorg: "PS".to_string(),
                    recfm,
                    lrecl,
                    block_size: file.hdr2.as_ref().map(|h| h.block_length).unwrap_or(0),
                    created: file.hdr1.as_ref().map(|h| h.created.clone()),
                    hdr1: file.hdr1,
                    hdr2: file.hdr2,
                    copyr1: None,
                    copyr2: None,
                    user_labels: file.user_labels,
                    mime: class.mime,
                    charset: class.charset,
                    extension: class.extension,
                    file_seq: file.seq,
                    content: DatasetContent::Sequential {
                        data: file.data,
                        text,
                    },
                });
            }
        }
    }

    Ok(TapeArchive {
        volume: raw.volume,
        datasets,
        config: cfg.clone(),
    })
}

fn decompress_zlib(data: &[u8], offset: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid(format!("zlib decompression failed: {e}"), offset))?;
    Ok(out)
}

fn decompress_bzip2(data: &[u8], offset: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    BzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid(format!("bzip2 decompression failed: {e}"), offset))?;
    Ok(out)
}

/// Lenient label-field integer: blanks count as zero.
fn lenient_u32(field: &str) -> u32 {
    field.trim().parse().unwrap_or(0)
}

fn chars_of(label: &str) -> Vec<char> {
    label.chars().collect()
}

fn field(chars: &[char], from: usize, to: usize) -> String {
    chars[from..to].iter().collect()
}

/// Decode an 80-character HDR1 label.
fn parse_hdr1(label: &str) -> Hdr1 {
    let t = chars_of(label);
    Hdr1 {
        dsn: field(&t, 4, 21).trim().to_string(),
        serial: field(&t, 21, 27),
        volume_seq: lenient_u32(&field(&t, 27, 31)),
        dataset_seq: lenient_u32(&field(&t, 31, 35)),
        generation: lenient_u32(&field(&t, 35, 39)),
        version: lenient_u32(&field(&t, 39, 41)),
        created: dates::tape_date(&field(&t, 41, 47)),
        expires: dates::tape_date(&field(&t, 47, 53)),
        security: lenient_u32(&field(&t, 53, 54)) != 0,
        block_count_low: lenient_u32(&field(&t, 54, 60)),
        system_code: field(&t, 60, 73),
        block_count_high: lenient_u32(&field(&t, 76, 80)),
    }
}

/// Decode an 80-character HDR2 label.
fn parse_hdr2(label: &str) -> Hdr2 {
    let t = chars_of(label);
    Hdr2 {
        recfm: field(&t, 4, 5),
        block_length: lenient_u32(&field(&t, 5, 10)),
        lrecl: lenient_u32(&field(&t, 10, 15)),
        density: lenient_u32(&field(&t, 15, 16)),
        position: field(&t, 16, 17),
        jobid: field(&t, 17, 34),
        technique: field(&t, 34, 36),
        control_char: field(&t, 36, 37),
        block_attr: field(&t, 38, 39),
        device_serial: field(&t, 41, 47),
        dataset_id: field(&t, 47, 48),
        large_block_length: field(&t, 70, 80),
    }
}
