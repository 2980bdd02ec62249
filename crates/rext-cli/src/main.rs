#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rext::{CollectingSink, FileEntry, InodeNumber, Volume, VolumeOptions};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Default)]
struct Flags {
    json: bool,
    verbose: bool,
    offset: u64,
    from: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    flavor: String,
    block_size: u32,
    inode_size: u16,
    blocks_count: u64,
    inodes_count: u32,
    groups: u64,
    volume_name: String,
    uuid: String,
    compat: String,
    incompat: String,
    ro_compat: String,
}

#[derive(Debug, Serialize)]
struct ListingRow {
    name: String,
    inode: u64,
    kind: &'static str,
    size: u64,
    mode: u16,
    uid: u32,
    gid: u32,
    mtime: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl ListingRow {
    fn from_entry(entry: &FileEntry) -> Self {
        Self {
            name: entry.name_str(),
            inode: entry.inode.0,
            kind: if entry.is_directory { "dir" } else { "file" },
            size: entry.size,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime,
            path: entry.full_path.clone(),
        }
    }
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "inspect" => {
            let (image, rest) = take_image(&mut args, "inspect <image>")?;
            let flags = parse_flags(&rest)?;
            init_logging(&flags);
            inspect(&image, &flags)
        }
        "ls" => {
            let (image, rest) = take_image(&mut args, "ls <image> <path>")?;
            let (path, rest) = take_arg(rest, "ls <image> <path>")?;
            let flags = parse_flags(&rest)?;
            init_logging(&flags);
            ls(&image, &path, &flags)
        }
        "cat" => {
            let (image, rest) = take_image(&mut args, "cat <image> <path>")?;
            let (path, rest) = take_arg(rest, "cat <image> <path>")?;
            let flags = parse_flags(&rest)?;
            init_logging(&flags);
            cat(&image, &path, &flags)
        }
        "readlink" => {
            let (image, rest) = take_image(&mut args, "readlink <image> <path>")?;
            let (path, rest) = take_arg(rest, "readlink <image> <path>")?;
            let flags = parse_flags(&rest)?;
            init_logging(&flags);
            readlink(&image, &path, &flags)
        }
        "find" => {
            let (image, rest) = take_image(&mut args, "find <image> <query>")?;
            let (query, rest) = take_arg(rest, "find <image> <query>")?;
            let flags = parse_flags(&rest)?;
            init_logging(&flags);
            find(&image, &query, &flags)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("rext-cli\n");
    println!("USAGE:");
    println!("  rext-cli inspect <image> [--json] [--offset <bytes>]");
    println!("  rext-cli ls <image> <path> [--json] [--offset <bytes>]");
    println!("  rext-cli cat <image> <path> [--offset <bytes>]");
    println!("  rext-cli readlink <image> <path> [--offset <bytes>]");
    println!("  rext-cli find <image> <query> [--from <path>] [--json] [--offset <bytes>]");
    println!();
    println!("FLAGS:");
    println!("  --json             machine-readable output");
    println!("  --offset <bytes>   filesystem start within the image");
    println!("  --from <path>      directory a find starts under (default /)");
    println!("  --verbose          debug logging on stderr");
}

fn take_image(args: &mut impl Iterator<Item = String>, usage: &str) -> Result<(String, Vec<String>)> {
    let Some(image) = args.next() else {
        bail!("usage: rext-cli {usage}");
    };
    Ok((image, args.collect()))
}

fn take_arg(mut rest: Vec<String>, usage: &str) -> Result<(String, Vec<String>)> {
    if rest.is_empty() || rest[0].starts_with("--") {
        bail!("usage: rext-cli {usage}");
    }
    Ok((rest.remove(0), rest))
}

fn parse_flags(rest: &[String]) -> Result<Flags> {
    let mut flags = Flags::default();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => flags.json = true,
            "--verbose" => flags.verbose = true,
            "--offset" => {
                let value = iter.next().context("--offset requires a byte value")?;
                flags.offset = value.parse().context("--offset expects an integer")?;
            }
            "--from" => {
                let value = iter.next().context("--from requires a path")?;
                flags.from = Some(value.clone());
            }
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok(flags)
}

fn init_logging(flags: &Flags) {
    if flags.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn mount(image: &str, flags: &Flags) -> Result<(Volume, CollectingSink)> {
    let options = VolumeOptions {
        base_offset: flags.offset,
        ..VolumeOptions::default()
    };
    let mut volume = Volume::mount_with(rext::FileByteSource::open(Path::new(image))?, &options)
        .with_context(|| format!("failed to mount {image}"))?;
    let sink = CollectingSink::new();
    volume.set_diagnostic_sink(Box::new(sink.clone()));
    Ok((volume, sink))
}

fn report_damage(sink: &CollectingSink) {
    let events = sink.events();
    if !events.is_empty() {
        eprintln!("tolerated {} damage event(s):", events.len());
        for event in events {
            eprintln!("  {event}");
        }
    }
}

fn inspect(image: &str, flags: &Flags) -> Result<()> {
    let (volume, _) = mount(image, flags)?;
    let (compat, incompat, ro_compat) = volume.features();

    let output = InspectOutput {
        flavor: volume.flavor().to_string(),
        block_size: volume.block_size().get(),
        inode_size: volume.inode_size(),
        blocks_count: volume.blocks_count(),
        inodes_count: volume.inodes_count(),
        groups: volume.group_count(),
        volume_name: volume.volume_name().to_owned(),
        uuid: volume.uuid_string(),
        compat: compat.describe(),
        incompat: incompat.describe(),
        ro_compat: ro_compat.describe(),
    };

    if flags.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("flavor: {}", output.flavor);
        println!("block_size: {}", output.block_size);
        println!("inode_size: {}", output.inode_size);
        println!("blocks_count: {}", output.blocks_count);
        println!("inodes_count: {}", output.inodes_count);
        println!("groups: {}", output.groups);
        println!("volume_name: {}", output.volume_name);
        println!("uuid: {}", output.uuid);
        println!("compat: {}", output.compat);
        println!("incompat: {}", output.incompat);
        println!("ro_compat: {}", output.ro_compat);
    }
    Ok(())
}

fn ls(image: &str, path: &str, flags: &Flags) -> Result<()> {
    let (volume, sink) = mount(image, flags)?;
    let (ino, _) = volume
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    let entries = volume.list_directory(ino)?;
    let rows: Vec<ListingRow> = entries.iter().map(ListingRow::from_entry).collect();

    if flags.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("serialize output")?
        );
    } else {
        for row in &rows {
            let tag = if row.kind == "dir" { 'd' } else { '-' };
            println!(
                "{tag}{:04o} {:>6} {:>6} {:>12} {} {}",
                row.mode & 0o7777,
                row.uid,
                row.gid,
                row.size,
                format_mtime(row.mtime),
                row.name
            );
        }
    }
    report_damage(&sink);
    Ok(())
}

/// Civil-time rendering of an epoch-seconds mtime; JSON keeps the raw value.
fn format_mtime(mtime: u32) -> String {
    DateTime::<Utc>::from_timestamp(i64::from(mtime), 0)
        .map_or_else(|| mtime.to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn cat(image: &str, path: &str, flags: &Flags) -> Result<()> {
    let (volume, sink) = mount(image, flags)?;
    let (ino, inode) = volume
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    if inode.is_dir() {
        bail!("{path} is a directory");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    volume
        .read_file(ino, &mut out)
        .with_context(|| format!("cannot read {path}"))?;
    out.flush()?;
    report_damage(&sink);
    Ok(())
}

fn readlink(image: &str, path: &str, flags: &Flags) -> Result<()> {
    let (volume, _) = mount(image, flags)?;
    let (ino, _) = volume
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    let target = volume
        .read_symlink(ino)
        .with_context(|| format!("cannot read link {path}"))?;
    println!("{}", String::from_utf8_lossy(&target));
    Ok(())
}

fn find(image: &str, query: &str, flags: &Flags) -> Result<()> {
    let (volume, sink) = mount(image, flags)?;
    let start = match flags.from.as_deref() {
        Some(path) => {
            volume
                .resolve_path(path)
                .with_context(|| format!("cannot resolve {path}"))?
                .0
        }
        None => InodeNumber::ROOT,
    };

    let matches = volume.search_files(start, query)?;
    let rows: Vec<ListingRow> = matches.iter().map(ListingRow::from_entry).collect();

    if flags.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("serialize output")?
        );
    } else {
        for row in &rows {
            if let Some(path) = &row.path {
                println!("{path}");
            }
        }
    }
    report_damage(&sink);
    Ok(())
}
