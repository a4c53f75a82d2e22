// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem extraction of parsed archives.
//!
//! Sequential datasets become single files, partitioned datasets become
//! directories with one file per member, and alias members become
//! symbolic links to their canonical member's file. Failures on one
//! member are reported and do not stop the remaining extraction.

use crate::archive::{Archive, Dataset, Member};
use crate::error::Result;
use crate::Config;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extract the message (if any) and every dataset to the configured
/// output directory.
pub fn extract_all(archive: &Archive, cfg: &Config) -> Result<()> {
    fs::create_dir_all(&cfg.output_dir)?;

    if let Some(text) = archive.message() {
        let first = archive
            .datasets()
            .first()
            .map(|d| d.name.as_str())
            .unwrap_or("XMIT");
        let path = cfg.output_dir.join(format!("{first}.msg"));
        info!("message -> {}", path.display());
        fs::write(&path, text)?;
    }

    for dataset in archive.datasets() {
        extract_dataset(archive, &dataset.name, cfg)?;
    }
    Ok(())
}

/// Extract one dataset: a single file for sequential datasets, a
/// directory of members for partitioned ones.
pub fn extract_dataset(archive: &Archive, ds: &str, cfg: &Config) -> Result<()> {
    let dataset = match archive.datasets().iter().find(|d| d.name == ds) {
        Some(d) => d,
        None => {
            warn!("dataset {ds} not present in archive");
            return Ok(());
        }
    };
    fs::create_dir_all(&cfg.output_dir)?;

    if dataset.is_sequential() {
        let path = cfg
            .output_dir
            .join(format!("{}{}", dataset.name, dataset.extension.as_deref().unwrap_or("")));
        if !cfg.overwrite && path.exists() {
            debug!("{} exists and overwrite is disabled", path.display());
            return Ok(());
        }
        info!("{}\t->\t{}", dataset.name, path.display());
        write_payload(&path, dataset.text(), dataset.data(), cfg)?;
        if cfg.apply_modify_time {
            apply_mtime(&path, &archive.last_modified(ds));
        }
        return Ok(());
    }

    let folder = cfg.output_dir.join(&dataset.name);
    fs::create_dir_all(&folder)?;
    for member in dataset.members() {
        if let Err(err) = extract_member_into(archive, dataset, member, &folder, cfg) {
            warn!("failed to extract {}({}): {err}", dataset.name, member.name);
        }
    }
    Ok(())
}

/// Extract a single member to the output directory root. Aliases are
/// read through to their canonical member's payload.
pub fn extract_member(archive: &Archive, ds: &str, member: &str, cfg: &Config) -> Result<()> {
    let info = archive.member_info(ds, member)?;
    let Some(found) = archive.dataset(ds).and_then(|d| d.member(member)) else {
        warn!("member {ds}({member}) not present in archive");
        return Ok(());
    };
    let resolved = match (found.alias, archive.dataset(ds)) {
        (true, Some(dataset)) => dataset.resolve_alias(found).unwrap_or(found),
        _ => found,
    };

    fs::create_dir_all(&cfg.output_dir)?;
    let path = cfg
        .output_dir
        .join(format!("{member}{}", info.extension.as_deref().unwrap_or("")));
    if !cfg.overwrite && path.exists() {
        debug!("{} exists and overwrite is disabled", path.display());
        return Ok(());
    }
    info!("{ds}({member})\t->\t{}", path.display());
    write_payload(&path, resolved.text.as_deref(), &resolved.data, cfg)?;
    if cfg.apply_modify_time {
        if let Some(modified) = &info.modified {
            apply_mtime(&path, modified);
        }
    }
    Ok(())
}

fn extract_member_into(
    archive: &Archive,
    dataset: &Dataset,
    member: &Member,
    folder: &Path,
    cfg: &Config,
) -> Result<()> {
    let info = archive.member_info(&dataset.name, &member.name)?;
    let extension = info.extension.as_deref().unwrap_or("");
    let path = folder.join(format!("{}{}", member.name, extension));

    if !cfg.overwrite && path.exists() {
        debug!("{} exists and overwrite is disabled", path.display());
        return Ok(());
    }

    if let Some(target) = &info.alias_of {
        let target_name = format!("{target}{extension}");
        info!(
            "linking {} -> {}",
            path.display(),
            folder.join(&target_name).display()
        );
        link_member(&path, &target_name, archive, dataset, member, cfg)?;
        return Ok(());
    }

    info!("{}({})\t->\t{}", dataset.name, member.name, path.display());
    write_payload(&path, member.text.as_deref(), &member.data, cfg)?;

    if cfg.apply_modify_time {
        if let Some(modified) = &info.modified {
            apply_mtime(&path, modified);
        }
    }
    Ok(())
}

/// Write decoded text unless binary extraction was requested.
fn write_payload(path: &Path, text: Option<&str>, data: &[u8], cfg: &Config) -> Result<()> {
    match text {
        Some(text) if !cfg.binary_only => fs::write(path, text)?,
        _ => fs::write(path, data)?,
    }
    Ok(())
}

#[cfg(unix)]
fn link_member(
    path: &Path,
    target_name: &str,
    _archive: &Archive,
    _dataset: &Dataset,
    _member: &Member,
    _cfg: &Config,
) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path)?;
    }
    std::os::unix::fs::symlink(target_name, path)?;
    Ok(())
}

/// Platforms without symlinks get a copy of the resolved data.
#[cfg(not(unix))]
fn link_member(
    path: &Path,
    _target_name: &str,
    archive: &Archive,
    dataset: &Dataset,
    member: &Member,
    cfg: &Config,
) -> Result<()> {
    let data = archive.member_bytes(&dataset.name, &member.name)?.to_vec();
    let text = archive.member_text(&dataset.name, &member.name)?;
    write_payload(path, Some(&text), &data, cfg)
}

/// Write the metadata JSON next to the extracted files, named after the
/// input file stem.
pub fn dump_json(archive: &Archive, cfg: &Config, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(&cfg.output_dir)?;
    let path = cfg.output_dir.join(format!("{stem}.json"));
    debug!("dumping JSON to {}", path.display());
    fs::write(&path, archive.metadata_json(false)?)?;
    Ok(path)
}

/// Set a file's modification time from an ISO-8601 metadata date.
fn apply_mtime(path: &Path, iso: &str) {
    if iso.is_empty() {
        return;
    }
    let parsed = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f");
    let Ok(dt) = parsed else {
        debug!("cannot parse modify date {iso:?}");
        return;
    };
    let timestamp = dt.and_utc().timestamp();
    if timestamp < 0 {
        return;
    }
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(timestamp as u64);
    debug!("setting mtime of {} to {iso}", path.display());
    let result = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(mtime));
    if let Err(err) = result {
        warn!("cannot set modify date on {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{DatasetContent, TapeArchive, XmiArchive, XmiHeader};
    use crate::codepage::Codepage;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("xmit_unload_{}_{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn member(name: &str, ttr: u32, alias: bool, text: Option<&str>) -> Member {
        Member {
            name: name.to_string(),
            ttr,
            alias,
            ispf: None,
            data: Codepage::Cp1140.encode(text.unwrap_or("")).unwrap(),
            text: text.map(str::to_string),
            mime: Some("text/plain".to_string()),
            charset: Some("ebcdic".to_string()),
            extension: Some(".txt".to_string()),
        }
    }

    fn pds_archive(cfg: &Config) -> Archive {
        use crate::iebcopy::Copyr1;
        let mut copyr1_rec = vec![0u8; 56];
        copyr1_rec[1] = 0xCA;
        copyr1_rec[2] = 0x6D;
        copyr1_rec[3] = 0x0F;
        copyr1_rec[8] = 0x00;
        copyr1_rec[9] = 0x50;
        copyr1_rec[10] = 0x90;
        let copyr1 = Copyr1::parse(&copyr1_rec).unwrap();

        Archive::Tape(TapeArchive {
            volume: None,
            datasets: vec![Dataset {
                name: "TEST.PDS".to_string(),
                dsorg: "PO".to_string(),
                recfm: "FB".to_string(),
                lrecl: 80,
                block_size: 3120,
                created: None,
                hdr1: None,
                hdr2: None,
                copyr1: Some(copyr1),
                copyr2: None,
                user_labels: Vec::new(),
                mime: "pds/directory".to_string(),
                charset: "binary".to_string(),
                extension: None,
                file_seq: 1,
                content: DatasetContent::Partitioned {
                    members: vec![
                        member("MAIN", 1, false, Some("CONTENT\n")),
                        member("LINK", 1, true, None),
                    ],
                },
            }],
            config: cfg.clone(),
        })
    }

    fn seq_archive(cfg: &Config) -> Archive {
        Archive::Xmi(XmiArchive {
            header: XmiHeader::default(),
            inmr01: Default::default(),
            inmr02: Vec::new(),
            inmr03: Vec::new(),
            inmr04: Vec::new(),
            message: None,
            datasets: vec![Dataset {
                name: "USER.SEQ".to_string(),
                dsorg: "PS".to_string(),
                recfm: "F".to_string(),
                lrecl: 80,
                block_size: 80,
                created: None,
                hdr1: None,
                hdr2: None,
                copyr1: None,
                copyr2: None,
                user_labels: Vec::new(),
                mime: "text/plain".to_string(),
                charset: "ebcdic".to_string(),
                extension: Some(".txt".to_string()),
                file_seq: 1,
                content: DatasetContent::Sequential {
                    data: Codepage::Cp1140.encode("HELLO").unwrap(),
                    text: Some("HELLO\n".to_string()),
                },
            }],
            config: cfg.clone(),
        })
    }

    #[test]
    fn test_extract_sequential_dataset() {
        let cfg = Config {
            output_dir: test_dir("seq"),
            ..Config::default()
        };
        let archive = seq_archive(&cfg);
        extract_all(&archive, &cfg).unwrap();
        let written = fs::read_to_string(cfg.output_dir.join("USER.SEQ.txt")).unwrap();
        assert_eq!(written, "HELLO\n");
    }

    #[test]
    fn test_extract_pds_with_alias_symlink() {
        let cfg = Config {
            output_dir: test_dir("pds"),
            ..Config::default()
        };
        let archive = pds_archive(&cfg);
        extract_all(&archive, &cfg).unwrap();

        let main = cfg.output_dir.join("TEST.PDS").join("MAIN.txt");
        assert_eq!(fs::read_to_string(&main).unwrap(), "CONTENT\n");

        let link = cfg.output_dir.join("TEST.PDS").join("LINK.txt");
        #[cfg(unix)]
        {
            let meta = fs::symlink_metadata(&link).unwrap();
            assert!(meta.file_type().is_symlink());
            assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("MAIN.txt"));
        }
        assert_eq!(fs::read_to_string(&link).unwrap(), "CONTENT\n");
    }

    #[test]
    fn test_overwrite_disabled_skips() {
        let cfg = Config {
            output_dir: test_dir("noclobber"),
            overwrite: false,
            ..Config::default()
        };
        let archive = seq_archive(&cfg);
        let path = cfg.output_dir.join("USER.SEQ.txt");
        fs::write(&path, "KEEP ME").unwrap();
        extract_all(&archive, &cfg).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "KEEP ME");
    }

    #[test]
    fn test_binary_extraction_writes_raw_bytes() {
        let cfg = Config {
            output_dir: test_dir("binary"),
            binary_only: true,
            ..Config::default()
        };
        let archive = seq_archive(&cfg);
        extract_all(&archive, &cfg).unwrap();
        let written = fs::read(cfg.output_dir.join("USER.SEQ.txt")).unwrap();
        assert_eq!(written, Codepage::Cp1140.encode("HELLO").unwrap());
    }

    #[test]
    fn test_extract_single_member() {
        let cfg = Config {
            output_dir: test_dir("single"),
            ..Config::default()
        };
        let archive = pds_archive(&cfg);
        extract_member(&archive, "TEST.PDS", "MAIN", &cfg).unwrap();
        let written = fs::read_to_string(cfg.output_dir.join("MAIN.txt")).unwrap();
        assert_eq!(written, "CONTENT\n");
    }

    #[test]
    fn test_dump_json_excludes_text() {
        let cfg = Config {
            output_dir: test_dir("json"),
            ..Config::default()
        };
        let archive = seq_archive(&cfg);
        let path = dump_json(&archive, &cfg, "input").unwrap();
        let json = fs::read_to_string(path).unwrap();
        assert!(json.contains("USER.SEQ"));
        assert!(json.contains("CONFIG"));
        assert!(!json.contains("HELLO"));
    }
}
