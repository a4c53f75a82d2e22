//! NETDATA (XMI) stream decoding.
//!
//! An XMI file is a run of segments: a length byte (which counts itself
//! and the flag byte), a flag byte, then payload. Control records carry a
//! six-character EBCDIC name (INMR01..INMR07) and text units; data
//! segments carry dataset or message content, reassembled into logical
//! records by the first/last flag bits.
//!
//! Control records handled here:
//!
//! * INMR01 - header record (originator, timestamps)
//! * INMR02 - file control record(s), one or two per file
//! * INMR03 - data control record(s), parallel to INMR02
//! * INMR04 - installation-exit data, recorded but not interpreted
//! * INMR06 - terminator
//! * INMR07 - notification, ignored

use crate::archive::{
    get_dsorg, get_recfm, Dataset, DatasetContent, Inmr02, Message, XmiArchive, XmiHeader,
};
use crate::buf::{be_u32, slice};
use crate::convert;
use crate::dates;
use crate::error::{Error, Result};
use crate::iebcopy;
use crate::sniff;
use crate::textunit::TextUnits;
use crate::Config;
use log::{debug, warn};

const FLAG_CONTROL: u8 = 0x20;
const FLAG_FIRST: u8 = 0x80;
const FLAG_LAST: u8 = 0x40;

/// Everything gathered by the segment walk, before datasets are built.
struct RawXmi {
    inmr01: TextUnits,
    inmr02: Vec<Inmr02>,
    inmr03: Vec<TextUnits>,
    inmr04: Vec<Vec<u8>>,
    has_message: bool,
    message_data: Vec<u8>,
    /// Logical records per dataset, with the 1-based INMR02 index the
    /// dataset belongs to.
    datasets: Vec<(String, usize, Vec<Vec<u8>>)>,
}

/// Parse an XMI buffer into an [`XmiArchive`]. `stem` is the input file
/// stem, used to name datasets whose INMR02 omits INMDSNAM.
pub fn parse_archive(buf: &[u8], cfg: &Config, stem: Option<&str>) -> Result<XmiArchive> {
    let raw = walk_segments(buf, cfg, stem)?;
    assemble(raw, cfg)
}

fn walk_segments(buf: &[u8], cfg: &Config, stem: Option<&str>) -> Result<RawXmi> {
    let cp = cfg.codepage;
    let mut inmr01: Option<TextUnits> = None;
    let mut inmr02: Vec<Inmr02> = Vec::new();
    let mut inmr03: Vec<TextUnits> = Vec::new();
    let mut inmr04: Vec<Vec<u8>> = Vec::new();
    let mut has_message = false;
    let mut message_data: Vec<u8> = Vec::new();
    let mut datasets: Vec<(String, usize, Vec<Vec<u8>>)> = Vec::new();

    let mut record_data: Vec<u8> = Vec::new();
    let mut file_location = 1usize;
    let mut pos = 0usize;

    while pos + 2 <= buf.len() {
        let segment_length = buf[pos] as usize;
        let flag = buf[pos + 1];
        if segment_length < 2 {
            return Err(Error::invalid("segment length below header size", pos));
        }
        let payload = slice(buf, pos + 2, segment_length - 2)?;

        if flag & FLAG_CONTROL != 0 {
            let name = cp.decode(payload.get(..6).ok_or_else(|| Error::Truncated {
                needed: 6 - payload.len(),
                offset: pos + 2,
            })?);
            debug!("control record {name} at {pos}");
            let body = &payload[6..];

            match name.as_str() {
                "INMR01" => {
                    let mut units = TextUnits::parse(body, cp)?;
                    has_message |= units.message;
                    if let Some(raw_time) = units.text("INMFTIME").map(str::to_string) {
                        match dates::transmit_time(&raw_time) {
                            Some(dt) => units.set_text("INMFTIME", dates::iso_micro(&dt)),
                            None => warn!("unparsable INMFTIME value {raw_time:?}"),
                        }
                    }
                    inmr01 = Some(units);
                }
                "INMR02" => {
                    let file_count = be_u32(body, 0)?;
                    let mut units = TextUnits::parse(&body[4..], cp)?;
                    has_message |= units.message;
                    decode_attribute_units(&mut units);
                    if units.text("INMUTILN") == Some("AMSCIPHR") {
                        return Err(Error::unsupported(
                            "encrypted (AMSCIPHR) transmissions cannot be extracted",
                            pos,
                        ));
                    }
                    inmr02.push(Inmr02 { file_count, units });
                }
                "INMR03" => {
                    let mut units = TextUnits::parse(body, cp)?;
                    has_message |= units.message;
                    decode_attribute_units(&mut units);
                    inmr03.push(units);
                }
                "INMR04" => {
                    debug!("INMR04 installation data: {:?}", cp.decode(body));
                    inmr04.push(body.to_vec());
                }
                "INMR06" => {
                    debug!("INMR06 terminator, parsing complete");
                    break;
                }
                "INMR07" => {
                    debug!("INMR07 notification record ignored");
                }
                other => {
                    warn!("unrecognized control record {other:?}");
                }
            }
        } else {
            // Data segment: message content when the message flag is up
            // and the first file has no dataset name yet, dataset content
            // otherwise.
            let to_message = has_message
                && inmr03.len() < 2
                && inmr02
                    .first()
                    .is_none_or(|r| !r.units.contains("INMDSNAM"));

            if to_message {
                message_data.extend_from_slice(payload);
                file_location = 2;
            } else {
                let index = file_location;
                let record = inmr02.get_mut(index - 1).ok_or_else(|| {
                    Error::invalid("data segment before its INMR02 control record", pos)
                })?;
                if !record.units.contains("INMDSNAM") {
                    // Some generators (XMIT370) omit the dataset name on
                    // sequential transmissions.
                    let fallback = cfg
                        .name_override
                        .clone()
                        .or_else(|| stem.map(|s| s.to_uppercase()))
                        .unwrap_or_else(|| "XMIT".to_string());
                    debug!("no INMDSNAM, using {fallback}");
                    record.units.set_text("INMDSNAM", fallback);
                }
                let dsn = record.units.text("INMDSNAM").unwrap_or_default().to_string();

                record_data.extend_from_slice(payload);
                debug!(
                    "data segment at {pos}: {} bytes, first {} last {}",
                    payload.len(),
                    flag & FLAG_FIRST != 0,
                    flag & FLAG_LAST != 0,
                );
                if flag & FLAG_LAST != 0 {
                    let position = match datasets.iter().position(|(name, _, _)| *name == dsn) {
                        Some(position) => position,
                        None => {
                            debug!("dataset {dsn} not yet recorded, creating");
                            datasets.push((dsn, index, Vec::new()));
                            datasets.len() - 1
                        }
                    };
                    datasets[position].2.push(std::mem::take(&mut record_data));
                }
            }
        }

        pos += segment_length;
    }

    let inmr01 = inmr01.ok_or_else(|| Error::invalid("no INMR01 record found", 0))?;
    Ok(RawXmi {
        inmr01,
        inmr02,
        inmr03,
        inmr04,
        has_message,
        message_data,
        datasets,
    })
}

/// Replace the raw DSORG and RECFM unit values with their symbolic
/// strings.
fn decode_attribute_units(units: &mut TextUnits) {
    if let Some(bytes) = units.bytes("INMDSORG").map(<[u8]>::to_vec) {
        let dsorg = bytes.iter().fold(0u16, |a, &b| (a << 8) | u16::from(b));
        units.set_text("INMDSORG", get_dsorg(dsorg));
    }
    if let Some(bytes) = units.bytes("INMRECFM").map(<[u8]>::to_vec) {
        units.set_text("INMRECFM", get_recfm(&bytes));
    }
}

fn assemble(raw: RawXmi, cfg: &Config) -> Result<XmiArchive> {
    let cp = cfg.codepage;
    let header = XmiHeader {
        origin_node: raw.inmr01.text("INMFNODE").unwrap_or_default().to_string(),
        origin_user: raw.inmr01.text("INMFUID").unwrap_or_default().to_string(),
        destination_node: raw.inmr01.text("INMTNODE").unwrap_or_default().to_string(),
        destination_user: raw.inmr01.text("INMTUID").unwrap_or_default().to_string(),
        timestamp: raw.inmr01.text("INMFTIME").unwrap_or_default().to_string(),
        version: raw.inmr01.text("INMFVERS").map(str::to_string),
        file_count: raw.inmr01.number("INMNUMF"),
    };

    let message = if raw.has_message && !raw.message_data.is_empty() {
        let lrecl = raw
            .inmr03
            .first()
            .and_then(|u| u.number("INMLRECL"))
            .unwrap_or(u64::from(cfg.lrecl)) as u32;
        let text = convert::fixed_text(cp, &raw.message_data, lrecl as usize, cfg.unnum);
        Some(Message {
            data: raw.message_data,
            lrecl,
            text,
        })
    } else {
        None
    };

    let mut datasets = Vec::new();
    for (seq, (name, index, records)) in raw.datasets.into_iter().enumerate() {
        let file_units = raw.inmr02.get(index - 1).map(|r| &r.units);
        let data_units = raw.inmr03.get(index - 1);
        let lrecl = data_units
            .and_then(|u| u.number("INMLRECL"))
            .unwrap_or(u64::from(cfg.lrecl)) as u32;
        let recfm = file_units
            .and_then(|u| u.text("INMRECFM"))
            .unwrap_or("?")
            .to_string();
        let dsorg = file_units
            .and_then(|u| u.text("INMDSORG"))
            .unwrap_or("?")
            .to_string();
        let block_size = file_units
            .and_then(|u| u.number("INMBLKSZ"))
            .or_else(|| data_units.and_then(|u| u.number("INMBLKSZ")))
            .unwrap_or(0) as u32;
        let created = file_units
            .and_then(|u| u.text("INMCREAT"))
            .map(str::to_string);

        let joined: Vec<u8> = records.concat();
        let class = sniff::classify(&joined, cp, cfg.force_text);
        debug!(
            "dataset {name}: mime {} charset {} size {}",
            class.mime,
            class.charset,
            joined.len()
        );

        match iebcopy::from_xmi_records(&records, cfg) {
            Ok(pds) => datasets.push(Dataset {
                name,
                dsorg,
                recfm: pds.copyr1.recfm.clone(),
                lrecl: u32::from(pds.copyr1.lrecl),
                block_size,
                created,
                hdr1: None,
                hdr2: None,
                copyr1: Some(pds.copyr1),
                copyr2: Some(pds.copyr2),
                user_labels: Vec::new(),
                mime: "pds/directory".to_string(),
                charset: "binary".to_string(),
                extension: None,
                file_seq: (seq + 1) as u32,
                content: DatasetContent::Partitioned {
                    members: pds.members,
                },
            }),
            Err(err) => {
                debug!("{name} is not a PDS: {err}");
                let text = if !cfg.binary_only && class.is_text(cfg.force_text) {
                    Some(if recfm.contains('F') {
                        convert::fixed_text(cp, &joined, lrecl as usize, cfg.unnum)
                    } else if recfm.contains('V') {
                        convert::variable_text(cp, &records, cfg.unnum)
                    } else {
                        convert::fixed_text(cp, &joined, cfg.lrecl as usize, cfg.unnum)
                    })
                } else {
                    None
                };
                datasets.push(Dataset {
                    name,
                    dsorg,
                    recfm,
                    lrecl,
                    block_size,
                    created,
                    hdr1: None,
                    hdr2: None,
                    copyr1: None,
                    copyr2: None,
                    user_labels: Vec::new(),
                    mime: class.mime,
                    charset: class.charset,
                    extension: class.extension,
                    file_seq: (seq + 1) as u32,
                    content: DatasetContent::Sequential { data: joined, text },
                });
            }
        }
    }

    Ok(XmiArchive {
        header,
        inmr01: raw.inmr01,
        inmr02: raw.inmr02,
        inmr03: raw.inmr03,
        inmr04: raw.inmr04,
        message,
        datasets,
        config: cfg.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::Codepage;

    fn ebcdic(text: &str) -> Vec<u8> {
        Codepage::Cp1140.encode(text).unwrap()
    }

    fn control_segment(name: &str, body: &[u8]) -> Vec<u8> {
        let mut payload = ebcdic(name);
        payload.extend_from_slice(body);
        let mut seg = vec![(payload.len() + 2) as u8, 0xE0];
        seg.extend(payload);
        seg
    }

    fn data_segment(flags: u8, body: &[u8]) -> Vec<u8> {
        let mut seg = vec![(body.len() + 2) as u8, flags];
        seg.extend_from_slice(body);
        seg
    }

    fn text_unit(key: u16, values: &[&[u8]]) -> Vec<u8> {
        let mut unit = Vec::new();
        unit.extend(key.to_be_bytes());
        unit.extend((values.len() as u16).to_be_bytes());
        for value in values {
            unit.extend((value.len() as u16).to_be_bytes());
            unit.extend(*value);
        }
        unit
    }

    fn inmr01_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(text_unit(0x1011, &[&ebcdic("NODEA")]));
        body.extend(text_unit(0x1012, &[&ebcdic("USER")]));
        body.extend(text_unit(0x1001, &[&ebcdic("NODEB")]));
        body.extend(text_unit(0x1002, &[&ebcdic("OTHER")]));
        body.extend(text_unit(0x1024, &[&ebcdic("20210214133742")]));
        body
    }

    fn inmr02_body(dsn: Option<&str>) -> Vec<u8> {
        let mut body = vec![0x00, 0x00, 0x00, 0x01]; // file count
        if let Some(dsn) = dsn {
            let parts: Vec<Vec<u8>> = dsn.split('.').map(ebcdic).collect();
            let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
            body.extend(text_unit(0x0002, &refs));
        }
        body.extend(text_unit(0x003C, &[&[0x40, 0x00]])); // DSORG PS
        body.extend(text_unit(0x0049, &[&[0x80, 0x00]])); // RECFM F
        body.extend(text_unit(0x1028, &[&ebcdic("INMCOPY")]));
        body
    }

    fn inmr03_body(lrecl: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(text_unit(0x003C, &[&[0x40, 0x00]]));
        body.extend(text_unit(0x0042, &[&lrecl.to_be_bytes()]));
        body
    }

    #[test]
    fn test_empty_xmi_has_header_and_no_datasets() {
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR06", &[]));
        let archive = parse_archive(&buf, &Config::default(), None).unwrap();
        assert!(archive.datasets.is_empty());
        assert!(archive.message.is_none());
        assert_eq!(archive.header.origin_user, "USER");
        assert_eq!(archive.header.origin_node, "NODEA");
        assert_eq!(archive.header.timestamp, "2021-02-14T13:37:42.000000");
    }

    #[test]
    fn test_sequential_fixed_dataset() {
        let record = ebcdic(&format!("{:<80}{:<80}", "HELLO", "WORLD"));
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR02", &inmr02_body(Some("USER.SEQ"))));
        buf.extend(control_segment("INMR03", &inmr03_body(80)));
        // the 160-byte record crosses two segments
        buf.extend(data_segment(0x80, &record[..100]));
        buf.extend(data_segment(0x40, &record[100..]));
        buf.extend(control_segment("INMR06", &[]));

        let archive = parse_archive(&buf, &Config::default(), None).unwrap();
        assert_eq!(archive.datasets.len(), 1);
        let ds = &archive.datasets[0];
        assert_eq!(ds.name, "USER.SEQ");
        assert_eq!(ds.dsorg, "PS");
        assert_eq!(ds.recfm, "F");
        assert_eq!(ds.lrecl, 80);
        assert_eq!(ds.data().len(), 160);
        assert_eq!(ds.text().unwrap(), "HELLO\nWORLD\n");
    }

    #[test]
    fn test_logical_record_round_trip() {
        // concatenation of logical records equals concatenation of all
        // data-segment payloads in arrival order
        let part1 = ebcdic(&format!("{:<40}", "AAAA"));
        let part2 = ebcdic(&format!("{:<40}", "BBBB"));
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR02", &inmr02_body(Some("USER.SEQ"))));
        buf.extend(control_segment("INMR03", &inmr03_body(40)));
        buf.extend(data_segment(0xC0, &part1));
        buf.extend(data_segment(0xC0, &part2));
        buf.extend(control_segment("INMR06", &[]));

        let archive = parse_archive(&buf, &Config::default(), None).unwrap();
        let expected: Vec<u8> = [part1, part2].concat();
        assert_eq!(archive.datasets[0].data(), &expected[..]);
    }

    #[test]
    fn test_message_routed_before_dataset() {
        let msg = ebcdic(&format!("{:<80}", "THIS IS A MESSAGE"));
        let record = ebcdic(&format!("{:<80}", "PAYLOAD"));
        let mut inmr01 = inmr01_body();
        inmr01.extend(text_unit(0x0028, &[])); // INMTERM, zero count

        let mut buf = control_segment("INMR01", &inmr01);
        buf.extend(control_segment("INMR02", &inmr02_body(None)));
        buf.extend(control_segment("INMR03", &inmr03_body(80)));
        buf.extend(data_segment(0xC0, &msg));
        buf.extend(control_segment("INMR02", &inmr02_body(Some("USER.AFTER"))));
        buf.extend(control_segment("INMR03", &inmr03_body(80)));
        buf.extend(data_segment(0xC0, &record));
        buf.extend(control_segment("INMR06", &[]));

        let archive = parse_archive(&buf, &Config::default(), None).unwrap();
        let message = archive.message.as_ref().unwrap();
        assert_eq!(message.text, "THIS IS A MESSAGE\n");
        assert_eq!(archive.datasets.len(), 1);
        assert_eq!(archive.datasets[0].name, "USER.AFTER");
    }

    #[test]
    fn test_dataset_name_falls_back_to_stem() {
        let record = ebcdic(&format!("{:<80}", "X"));
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR02", &inmr02_body(None)));
        buf.extend(control_segment("INMR03", &inmr03_body(80)));
        buf.extend(data_segment(0xC0, &record));
        buf.extend(control_segment("INMR06", &[]));

        let archive = parse_archive(&buf, &Config::default(), Some("file720")).unwrap();
        assert_eq!(archive.datasets[0].name, "FILE720");
    }

    #[test]
    fn test_name_override_wins_over_stem() {
        let record = ebcdic(&format!("{:<80}", "X"));
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR02", &inmr02_body(None)));
        buf.extend(control_segment("INMR03", &inmr03_body(80)));
        buf.extend(data_segment(0xC0, &record));
        buf.extend(control_segment("INMR06", &[]));

        let cfg = Config {
            name_override: Some("MY.NAME".to_string()),
            ..Config::default()
        };
        let archive = parse_archive(&buf, &cfg, Some("file720")).unwrap();
        assert_eq!(archive.datasets[0].name, "MY.NAME");
    }

    #[test]
    fn test_encrypted_transmission_rejected() {
        let mut body = vec![0x00, 0x00, 0x00, 0x01];
        body.extend(text_unit(0x1028, &[&ebcdic("AMSCIPHR")]));
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR02", &body));
        assert!(matches!(
            parse_archive(&buf, &Config::default(), None),
            Err(Error::UnsupportedRecord { .. })
        ));
    }

    #[test]
    fn test_missing_inmr01_rejected() {
        let buf = control_segment("INMR06", &[]);
        assert!(parse_archive(&buf, &Config::default(), None).is_err());
    }

    #[test]
    fn test_bytes_after_terminator_ignored() {
        let mut buf = control_segment("INMR01", &inmr01_body());
        buf.extend(control_segment("INMR06", &[]));
        buf.extend([0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(parse_archive(&buf, &Config::default(), None).is_ok());
    }
}
