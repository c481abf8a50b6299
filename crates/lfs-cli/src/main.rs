#![forbid(unsafe_code)]
//! LatticeFS command-line toolkit.
//!
//! The binary owns image-file provisioning — creating, loading and
//! flushing the backing file — and drives the core engine through
//! three subcommands: `format`, `inspect` and the interactive `shell`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lfs_block::BlockDevice;
use lfs_core::{DirRecord, LatticeFs};
use lfs_types::{BLOCK_SIZE, MODE_EXEC, MODE_READ, MODE_WRITE};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "lfs", about = "LatticeFS — block filesystem in a single image file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or re-initialize) an image file and format it.
    Format {
        /// Path to the image file.
        image: PathBuf,
        /// Image size in MiB.
        #[arg(long, default_value_t = 16)]
        size_mib: u64,
    },
    /// Print the superblock geometry and free-space counters.
    Inspect {
        /// Path to the image file.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Run the interactive shell against an image.
    Shell {
        /// Path to the image file.
        image: PathBuf,
        /// Create and format the image at this size if it is missing.
        #[arg(long)]
        create_mib: Option<u64>,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    total_blocks: u64,
    total_inodes: u64,
    blocks_per_group: u64,
    inodes_per_group: u64,
    group_count: u64,
    root_inode: u64,
    free_blocks: u64,
    free_inodes: u64,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Format { image, size_mib } => cmd_format(&image, size_mib),
        Command::Inspect { image, json } => cmd_inspect(&image, json),
        Command::Shell { image, create_mib } => cmd_shell(&image, create_mib),
    }
}

// ── Image provisioning ──────────────────────────────────────────────────────

/// Load the whole image file into a byte region.
fn load_region(path: &Path) -> Result<Vec<u8>> {
    let region = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if region.is_empty() || region.len() % BLOCK_SIZE != 0 {
        bail!(
            "{} is not a block image (size {} is not a multiple of {BLOCK_SIZE})",
            path.display(),
            region.len()
        );
    }
    Ok(region)
}

/// Write the region back to the image file and sync it to disk.
fn flush_region(path: &Path, region: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;
    file.write_all(region)?;
    file.sync_all()?;
    Ok(())
}

fn cmd_format(image: &Path, size_mib: u64) -> Result<()> {
    let bytes = usize::try_from(size_mib * 1024 * 1024).context("image size overflows usize")?;
    let dev = BlockDevice::new(vec![0_u8; bytes])?;
    let fs = LatticeFs::format(dev)?;

    let region = fs.into_device().into_region();
    flush_region(image, &region)?;
    println!("formatted {} ({size_mib} MiB)", image.display());
    Ok(())
}

fn cmd_inspect(image: &Path, json: bool) -> Result<()> {
    let dev = BlockDevice::new(load_region(image)?)?;
    let fs = LatticeFs::mount(dev)?;

    let geo = *fs.geometry();
    let output = InspectOutput {
        total_blocks: geo.total_blocks,
        total_inodes: geo.total_inodes,
        blocks_per_group: geo.blocks_per_group,
        inodes_per_group: geo.inodes_per_group,
        group_count: geo.group_count,
        root_inode: fs.superblock().root_inode.0,
        free_blocks: lfs_alloc::free_block_count(fs.device(), fs.geometry())?,
        free_inodes: lfs_alloc::free_inode_count(fs.device(), fs.geometry())?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("image:            {}", image.display());
        println!("total blocks:     {}", output.total_blocks);
        println!("total inodes:     {}", output.total_inodes);
        println!("blocks per group: {}", output.blocks_per_group);
        println!("inodes per group: {}", output.inodes_per_group);
        println!("groups:           {}", output.group_count);
        println!("root inode:       {}", output.root_inode);
        println!("free blocks:      {}", output.free_blocks);
        println!("free inodes:      {}", output.free_inodes);
    }
    Ok(())
}

// ── Shell ───────────────────────────────────────────────────────────────────

fn cmd_shell(image: &Path, create_mib: Option<u64>) -> Result<()> {
    let mut fs = if image.exists() {
        LatticeFs::mount(BlockDevice::new(load_region(image)?)?)?
    } else if let Some(size_mib) = create_mib {
        let bytes =
            usize::try_from(size_mib * 1024 * 1024).context("image size overflows usize")?;
        println!("creating {} ({size_mib} MiB)", image.display());
        LatticeFs::format(BlockDevice::new(vec![0_u8; bytes])?)?
    } else {
        bail!(
            "{} does not exist (pass --create-mib to create it)",
            image.display()
        );
    };

    println!("LatticeFS shell — type `help` for commands, `exit` to quit");
    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        print!("lfs> ");
        out.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        match dispatch(&mut fs, line.trim_end()) {
            Dispatch::Quit => break,
            Dispatch::Output(text) => {
                if !text.is_empty() {
                    println!("{text}");
                }
            }
        }
    }

    // Durability happens here: the mutated region goes back to the file.
    let region = fs.into_device().into_region();
    flush_region(image, &region)?;
    println!("flushed {}", image.display());
    Ok(())
}

enum Dispatch {
    Output(String),
    Quit,
}

/// Execute one shell line. Errors come back as printable text so the
/// loop keeps running.
fn dispatch(fs: &mut LatticeFs<Vec<u8>>, line: &str) -> Dispatch {
    match execute(fs, line) {
        Ok(None) => Dispatch::Quit,
        Ok(Some(text)) => Dispatch::Output(text),
        Err(error) => Dispatch::Output(format!("error: {error}")),
    }
}

/// `Ok(None)` means exit.
fn execute(fs: &mut LatticeFs<Vec<u8>>, line: &str) -> Result<Option<String>> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(Some(String::new()));
    };

    let output = match cmd {
        "exit" | "quit" => return Ok(None),
        "help" => HELP.to_owned(),
        "ls" => {
            let path = words.next().unwrap_or("/");
            let records = fs.list_dir(path)?;
            if records.is_empty() {
                "(empty)".to_owned()
            } else {
                records
                    .iter()
                    .map(render_record)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "touch" => {
            let path = words.next().context("usage: touch <path>")?;
            fs.create_file(path)?;
            String::new()
        }
        "mkdir" => {
            let path = words.next().context("usage: mkdir <path>")?;
            fs.create_dir(path)?;
            String::new()
        }
        "rm" => {
            let path = words.next().context("usage: rm <path>")?;
            fs.delete_file(path)?;
            String::new()
        }
        "rmdir" => {
            let path = words.next().context("usage: rmdir <path>")?;
            fs.delete_dir(path)?;
            String::new()
        }
        "write" => {
            let path = words.next().context("usage: write <path> <text>")?;
            // Everything after the path, verbatim.
            let content = line
                .splitn(3, char::is_whitespace)
                .nth(2)
                .unwrap_or("");
            fs.write_file(path, content.as_bytes())?;
            String::new()
        }
        "read" => {
            let path = words.next().context("usage: read <path>")?;
            let data = fs.read_file(path)?;
            String::from_utf8_lossy(&data).into_owned()
        }
        "login" => {
            let uid: u16 = words
                .next()
                .context("usage: login <uid> <gid>")?
                .parse()
                .context("uid must be a number")?;
            let gid: u16 = words
                .next()
                .context("usage: login <uid> <gid>")?
                .parse()
                .context("gid must be a number")?;
            fs.login(uid, gid);
            format!("identity is now {uid}:{gid}")
        }
        "logout" => {
            fs.logout();
            "identity is now 0:0".to_owned()
        }
        "whoami" => {
            let cred = fs.credentials();
            format!("{}:{}", cred.uid, cred.gid)
        }
        other => format!("unknown command: {other} (try `help`)"),
    };
    Ok(Some(output))
}

const HELP: &str = "\
commands:
  ls [path]            list a directory
  touch <path>         create an empty file
  mkdir <path>         create a directory
  write <path> <text>  replace a file's content
  read <path>          print a file's content
  rm <path>            delete a file
  rmdir <path>         delete a directory tree
  login <uid> <gid>    assume an identity
  logout               return to root
  whoami               print the current identity
  exit                 flush and quit";

/// One `ls` row: kind, permissions, owner and name.
fn render_record(record: &DirRecord) -> String {
    let kind = if record.is_directory { 'd' } else { '-' };
    let mut perms = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let triplet = record.permissions >> shift;
        perms.push(if triplet & MODE_READ != 0 { 'r' } else { '-' });
        perms.push(if triplet & MODE_WRITE != 0 { 'w' } else { '-' });
        perms.push(if triplet & MODE_EXEC != 0 { 'x' } else { '-' });
    }
    format!(
        "{kind}{perms}  {:>5} {:>5}  {}",
        record.uid, record.gid, record.name
    )
}
