//! TSO XMIT / AWS / HET file unload utility.
//!
//! Default action extracts every dataset and member to the output
//! directory, converting text payloads from EBCDIC and appending file
//! extensions based on their detected type.

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use xmit_unload::{extract, open_file, Archive, Codepage, Config};

#[derive(Parser)]
#[command(
    name = "xmit-unload",
    about = "TSO XMIT / AWS / HET virtual tape unload utility",
    version
)]
struct Cli {
    /// XMI/AWS/HET file to read
    file: PathBuf,

    /// Member or DATASET(MEMBER) to extract instead of everything
    target: Option<String>,

    /// List all datasets and members, then exit
    #[arg(short, long)]
    list: bool,

    /// Print dataset information only (no file creation)
    #[arg(short, long)]
    print: bool,

    /// Print file sizes human readable
    #[arg(short = 'H', long)]
    human: bool,

    /// Write file metadata to a JSON file in the output directory
    #[arg(short, long)]
    json: bool,

    /// Print the XMI message, if the file has one, then exit
    #[arg(long)]
    message: bool,

    /// Translate every file to plain text regardless of mimetype
    #[arg(short, long)]
    force: bool,

    /// Store all files as binary, without EBCDIC translation
    #[arg(short, long)]
    binary: bool,

    /// Do not remove the number column from text files
    #[arg(short, long)]
    unnum: bool,

    /// Set extracted files' last-modify date from ISPF statistics or
    /// tape labels when available
    #[arg(short, long)]
    modify: bool,

    /// Folder to place extracted files in
    #[arg(long, default_value = ".")]
    outputdir: PathBuf,

    /// EBCDIC encoding translation table
    #[arg(long, default_value = "cp1140")]
    encoding: String,

    /// Record length used when none is found in the metadata
    #[arg(long, default_value_t = 80)]
    lrecl: u16,

    /// Print lots of debugging statements
    #[arg(short, long)]
    debug: bool,

    /// Don't print progress output while extracting
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.debug {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let codepage: Codepage = cli
        .encoding
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let cfg = Config {
        codepage,
        lrecl: cli.lrecl,
        unnum: !cli.unnum,
        force_text: cli.force,
        binary_only: cli.binary,
        output_dir: cli.outputdir.clone(),
        apply_modify_time: cli.modify,
        ..Config::default()
    };

    let archive = open_file(&cli.file, &cfg)
        .with_context(|| format!("cannot read {}", cli.file.display()))?;

    if cli.list {
        for dataset in archive.datasets() {
            if dataset.is_partitioned() {
                for member in dataset.members() {
                    println!("{}({})", dataset.name, member.name);
                }
            } else {
                println!("{}", dataset.name);
            }
        }
        return Ok(());
    }

    if cli.message {
        match archive.message() {
            Some(message) => print!("{message}"),
            None => println!("no message included in {}", cli.file.display()),
        }
        return Ok(());
    }

    if cli.print {
        print_details(&archive, cli.human)?;
        return Ok(());
    }

    match &cli.target {
        Some(target) => extract_target(&archive, target, &cfg)?,
        None => extract::extract_all(&archive, &cfg)?,
    }

    if cli.json {
        let stem = cli
            .file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("archive");
        let path = extract::dump_json(&archive, &cfg, stem)?;
        println!("metadata written to {}", path.display());
    }
    Ok(())
}

/// Extract `DSN(MEMBER)`, a dataset name, or a member searched across
/// every PDS in the archive.
fn extract_target(archive: &Archive, target: &str, cfg: &Config) -> anyhow::Result<()> {
    if let Some((ds, member)) = split_target(target) {
        extract::extract_member(archive, ds, member, cfg)?;
        return Ok(());
    }

    if archive.dataset(target).is_some() {
        extract::extract_dataset(archive, target, cfg)?;
        return Ok(());
    }

    for dataset in archive.datasets() {
        if dataset.member(target).is_some() {
            extract::extract_member(archive, &dataset.name, target, cfg)?;
            return Ok(());
        }
    }
    bail!("{target} matches no dataset or member in the archive");
}

fn split_target(target: &str) -> Option<(&str, &str)> {
    let open = target.find('(')?;
    let rest = &target[open + 1..];
    let close = rest.find(')')?;
    Some((&target[..open], &rest[..close]))
}

/// Aligned table of dataset and member metadata.
fn print_details(archive: &Archive, human: bool) -> anyhow::Result<()> {
    let headers = [
        "filename", "member", "mimetype", "ext", "size", "modified", "owner", "version", "alias",
    ];
    let mut rows: Vec<Vec<String>> = Vec::new();

    for dataset in archive.datasets() {
        rows.push(vec![
            dataset.name.clone(),
            String::new(),
            dataset.mime.clone(),
            dataset.extension.clone().unwrap_or_default(),
            size_cell(dataset.size(), human),
            archive.last_modified(&dataset.name),
            archive.owner().to_string(),
            String::new(),
            String::new(),
        ]);
        for member in dataset.members() {
            let info = archive.member_info(&dataset.name, &member.name)?;
            rows.push(vec![
                dataset.name.clone(),
                member.name.clone(),
                info.mime.unwrap_or_default(),
                info.extension.unwrap_or_default(),
                size_cell(info.size, human),
                info.modified.unwrap_or_default(),
                info.owner.unwrap_or_default(),
                info.version.unwrap_or_default(),
                info.alias_of.unwrap_or_default(),
            ]);
        }
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+";
    let format_row = |cells: &[String]| {
        cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(c, w)| format!("| {c:<w$} "))
            .collect::<String>()
            + "|"
    };

    println!("{separator}");
    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    println!("{}", format_row(&header_cells));
    println!("{separator}");
    for row in &rows {
        println!("{}", format_row(row));
    }
    println!("{separator}");
    Ok(())
}

fn size_cell(size: usize, human: bool) -> String {
    if human {
        human_size(size as f64)
    } else {
        size.to_string()
    }
}

/// Human friendly size, `1.5K` style.
fn human_size(mut size: f64) -> String {
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if size.abs() < 1024.0 {
            let formatted = format!("{size:.1}");
            let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
            return format!("{trimmed}{unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1}Y")
}
