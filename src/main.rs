use std::env::set_var;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{arg, command, ArgAction, ArgMatches, Command};
use log::info;

use gtaimg::{guess_version, Archive, OpenMode, Version};

fn main() -> Result<()> {
    let matches = command!()
        .subcommand_required(true)
        .arg(arg!(-v --verbose "Print more debug information, or set `RUST_LOG=debug`").action(ArgAction::SetTrue))
        .subcommand(
            Command::new("create")
                .about("Create an empty archive")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(--ver1 "Create a VER1 (paired .dir/.img) archive instead of VER2").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("info")
                .about("Print version and entry count")
                .arg(arg!(<ARCHIVE> "Path to the .img file")),
        )
        .subcommand(
            Command::new("list")
                .about("List entries")
                .arg(arg!(<ARCHIVE> "Path to the .img file")),
        )
        .subcommand(
            Command::new("import")
                .about("Import a file into the archive under a given name")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(<SOURCE> "File to import"))
                .arg(arg!(<NAME> "Entry name inside the archive"))
                .arg(no_sync_arg()),
        )
        .subcommand(
            Command::new("extract")
                .about("Extract an entry to a file")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(<NAME> "Entry name inside the archive"))
                .arg(arg!(<DEST> "Destination path")),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename an entry")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(<OLD> "Current entry name"))
                .arg(arg!(<NEW> "New entry name"))
                .arg(no_sync_arg()),
        )
        .subcommand(
            Command::new("replace")
                .about("Replace an entry's payload in place")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(<NAME> "Entry name inside the archive"))
                .arg(arg!(<SOURCE> "Replacement file"))
                .arg(no_sync_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an entry")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(arg!(<NAME> "Entry name inside the archive"))
                .arg(no_sync_arg()),
        )
        .subcommand(
            Command::new("pack")
                .about("Compact the archive, reclaiming holes left by remove/replace")
                .arg(arg!(<ARCHIVE> "Path to the .img file"))
                .arg(no_sync_arg()),
        )
        .subcommand(
            Command::new("sync")
                .about("Persist the in-memory directory to disk (no-op if not dirty)")
                .arg(arg!(<ARCHIVE> "Path to the .img file")),
        )
        .get_matches();

    if matches.get_flag("verbose") {
        set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    match matches.subcommand() {
        Some(("create", sub)) => cmd_create(sub),
        Some(("info", sub)) => cmd_info(sub),
        Some(("list", sub)) => cmd_list(sub),
        Some(("import", sub)) => cmd_import(sub),
        Some(("extract", sub)) => cmd_extract(sub),
        Some(("rename", sub)) => cmd_rename(sub),
        Some(("replace", sub)) => cmd_replace(sub),
        Some(("remove", sub)) => cmd_remove(sub),
        Some(("pack", sub)) => cmd_pack(sub),
        Some(("sync", sub)) => cmd_sync(sub),
        _ => unreachable!("subcommand_required(true)"),
    }
}

fn no_sync_arg() -> clap::Arg {
    arg!(--"no-sync" "Leave the directory dirty instead of syncing immediately").action(ArgAction::SetTrue)
}

fn archive_path(sub: &ArgMatches) -> PathBuf {
    PathBuf::from(sub.get_one::<String>("ARCHIVE").expect("required"))
}

fn sync_unless_requested_otherwise(sub: &ArgMatches, archive: &mut Archive) -> Result<()> {
    if !sub.get_flag("no-sync") {
        archive.sync()?;
    }
    Ok(())
}

fn cmd_create(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let version = if sub.get_flag("ver1") { Version::Ver1 } else { Version::Ver2 };
    let mut archive = Archive::create(&path, version).with_context(|| format!("creating {}", path.display()))?;
    archive.sync()?;
    info!("created {:?} archive at {}", version, path.display());
    Ok(())
}

fn cmd_info(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let version = guess_version(&path).with_context(|| format!("probing {}", path.display()))?;
    let mut archive = Archive::open(&path, OpenMode::ReadOnly)?;
    println!("version: {:?}", version);
    println!("entries: {}", archive.entry_count());
    println!("size (blocks): {}", archive.size_in_blocks()?);
    Ok(())
}

fn cmd_list(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let archive = Archive::open(&path, OpenMode::ReadOnly)?;
    for entry in archive.iterate() {
        println!("{:>10} {:>10} {}", entry.offset, entry.size, entry.name);
    }
    Ok(())
}

fn cmd_import(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let source = sub.get_one::<String>("SOURCE").expect("required");
    let name = sub.get_one::<String>("NAME").expect("required");
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    archive.import(source, name).with_context(|| format!("importing {source} as {name}"))?;
    sync_unless_requested_otherwise(sub, &mut archive)
}

fn cmd_extract(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let name = sub.get_one::<String>("NAME").expect("required");
    let dest = sub.get_one::<String>("DEST").expect("required");
    let mut archive = Archive::open(&path, OpenMode::ReadOnly)?;
    archive.extract(name, dest).with_context(|| format!("extracting {name} to {dest}"))?;
    Ok(())
}

fn cmd_rename(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let old = sub.get_one::<String>("OLD").expect("required");
    let new = sub.get_one::<String>("NEW").expect("required");
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    archive.rename(old, new).with_context(|| format!("renaming {old} to {new}"))?;
    sync_unless_requested_otherwise(sub, &mut archive)
}

fn cmd_replace(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let name = sub.get_one::<String>("NAME").expect("required");
    let source = sub.get_one::<String>("SOURCE").expect("required");
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    archive.replace(name, source).with_context(|| format!("replacing {name} from {source}"))?;
    sync_unless_requested_otherwise(sub, &mut archive)
}

fn cmd_remove(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let name = sub.get_one::<String>("NAME").expect("required");
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    archive.remove(name).with_context(|| format!("removing {name}"))?;
    sync_unless_requested_otherwise(sub, &mut archive)
}

fn cmd_pack(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    let new_size = archive.pack()?;
    info!("packed {} to {} blocks", path.display(), new_size);
    sync_unless_requested_otherwise(sub, &mut archive)
}

fn cmd_sync(sub: &ArgMatches) -> Result<()> {
    let path = archive_path(sub);
    let mut archive = Archive::open(&path, OpenMode::ReadWrite)?;
    archive.sync()?;
    Ok(())
}
