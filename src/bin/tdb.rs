//! tdb admin tool
//!
//! Offline inspection and maintenance of a tdb data directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tdb::wal::Wal;
use tdb::{Config, Db, DirLockRegistry};
use tracing_subscriber::{fmt, EnvFilter};

/// tdb admin tool
#[derive(Parser, Debug)]
#[command(name = "tdb")]
#[command(about = "Inspect and maintain tdb data directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print counters for a data directory
    Stats { dir: PathBuf },

    /// List bucket names
    Buckets { dir: PathBuf },

    /// List keys of a bucket
    Keys {
        dir: PathBuf,
        bucket: String,

        /// Inclusive lower bound
        #[arg(long, default_value = "")]
        min: String,

        /// Exclusive upper bound (empty = unbounded)
        #[arg(long, default_value = "")]
        max: String,
    },

    /// Write a value to stdout
    Get {
        dir: PathBuf,
        bucket: String,
        key: String,
    },

    /// Print every record of a WAL or snapshot file
    Dump { file: PathBuf },

    /// Check a WAL or snapshot file for corruption
    Verify { file: PathBuf },

    /// Compact a data directory
    Compact { dir: PathBuf },

    /// Truncate corrupt files at the first bad record
    Repair { dir: PathBuf },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> tdb::Result<()> {
    let registry = DirLockRegistry::new();

    match command {
        Command::Stats { dir } => {
            let db = open(&dir, &registry, false)?;
            let stats = db.stats()?;
            println!("tx:            {}", stats.tx);
            println!("buckets:       {}", stats.buckets);
            println!("entries:       {}", stats.entries);
            println!("wal size:      {}", stats.wal_size);
            println!("snapshot size: {}", stats.snapshot_size);
            println!("read-only:     {}", stats.read_only);
            db.close()
        }
        Command::Buckets { dir } => {
            let db = open(&dir, &registry, false)?;
            for name in db.buckets()? {
                println!("{}", String::from_utf8_lossy(&name));
            }
            db.close()
        }
        Command::Keys { dir, bucket, min, max } => {
            let db = open(&dir, &registry, false)?;
            for entry in db.range(bucket.as_bytes(), min.as_bytes(), max.as_bytes())? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(entry.key()),
                    entry.pointer().len()
                );
            }
            db.close()
        }
        Command::Get { dir, bucket, key } => {
            let db = open(&dir, &registry, false)?;
            match db.get(bucket.as_bytes(), key.as_bytes())? {
                Some(mut reader) => {
                    let mut stdout = std::io::stdout().lock();
                    std::io::copy(&mut reader, &mut stdout)?;
                    stdout.flush()?;
                }
                None => tracing::warn!(bucket = %bucket, key = %key, "key not found"),
            }
            db.close()
        }
        Command::Dump { file } => {
            if !file.is_file() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not a file", file.display()),
                )
                .into());
            }
            let wal = Wal::open_read_only(&file)?;
            for item in wal.all()? {
                match item {
                    Ok(node) => println!(
                        "tx={}\t{:?}\t{}\t{}\t{}",
                        node.tx,
                        node.kind,
                        String::from_utf8_lossy(&node.bucket),
                        String::from_utf8_lossy(&node.key),
                        node.value_len
                    ),
                    Err(e) => println!("stopped: {}", e),
                }
            }
            Ok(())
        }
        Command::Verify { file } => {
            let report = Wal::verify(&file)?;
            println!("records:   {}", report.records);
            println!("valid len: {}", report.valid_len);
            println!("last tx:   {}", report.last_tx);
            let intact_after = match report.error {
                Some(_) => Wal::open_read_only(&file)?.find_record_after(report.valid_len)?,
                None => None,
            };
            match (&report.error, intact_after) {
                (None, _) => println!("status:    ok"),
                (Some(e), None) if report.is_torn_tail() => println!("status:    torn tail ({})", e),
                (Some(e), Some(offset)) => {
                    println!("status:    corrupt ({}), intact record at {}", e, offset)
                }
                (Some(e), None) => println!("status:    corrupt ({})", e),
            }
            Ok(())
        }
        Command::Compact { dir } => {
            let db = open(&dir, &registry, false)?;
            let report = db.compact()?;
            println!(
                "snapshot_tx={} entries={} size={} wal_removed={}",
                report.snapshot_tx, report.entries, report.snapshot_size, report.wal_removed
            );
            db.close()
        }
        Command::Repair { dir } => {
            let db = open(&dir, &registry, true)?;
            db.with_recovery(|r| {
                println!("applied:        {}", r.applied);
                println!("skipped:        {}", r.skipped);
                println!("truncated tail: {}", r.truncated_tail);
            });
            db.close()
        }
    }
}

fn open(dir: &Path, registry: &std::sync::Arc<DirLockRegistry>, repair: bool) -> tdb::Result<Db> {
    let config = Config::builder()
        .data_dir(dir)
        .compact_on_open(false)
        .repair_on_open(repair)
        .build();
    Db::open(config, registry)
}
