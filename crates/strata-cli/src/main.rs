//! `strata` command-line tool.

mod scan;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use scan::{KeyValueScanner, VECTOR_KEY_FLAG};
use strata_runtime::{Builder, Reader, ReaderOptions, WriterOptions};
use strata_sync::storage::LocalStorage;
use strata_sync::{Downloader, DownloaderOptions};
use strata_types::{CacheKind, Result, ValueKind};

#[derive(Parser)]
#[command(name = "strata", version, about = "Immutable read-optimized key-value cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan key=value input files and build an artifact.
    Create {
        /// Task name (artifact basename).
        #[arg(long)]
        task: String,
        #[arg(long)]
        destination: PathBuf,
        /// Input files (0x1E-separated key=value records).
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value_t = 1_000_000)]
        num_slots: u64,
        /// 2 = bucket chain, 3 = linear probe, 5 = linear probe dedup typed.
        #[arg(long, default_value_t = 5)]
        cache_type: u16,
        #[arg(long, default_value_t = 35)]
        offset_bits: u16,
        /// Collapse repeated keys within one producer run.
        #[arg(long)]
        deduplicate_keys: bool,
    },

    /// Look up one key in the latest local artifact.
    Get {
        #[arg(long)]
        task: String,
        #[arg(long)]
        destination: PathBuf,
        key: String,
    },

    /// Print the header of an artifact file.
    Info { path: PathBuf },

    /// Fetch the newest artifact from the mirrors.
    Download {
        /// Basename including extension, e.g. `fast_cache.cache`.
        #[arg(long)]
        basename: String,
        #[arg(long)]
        destination: PathBuf,
        /// Comma-separated mirror base URLs.
        #[arg(long)]
        urls: String,
    },

    /// Wait until the local readiness marker appears.
    WaitLocal {
        #[arg(long)]
        task: String,
        #[arg(long)]
        destination: PathBuf,
        #[arg(long, default_value_t = 300)]
        timeout_seconds: u64,
    },

    /// Wait until a mirror publishes something newer than the local copy.
    WaitRemote {
        #[arg(long)]
        basename: String,
        #[arg(long)]
        destination: PathBuf,
        #[arg(long)]
        urls: String,
        #[arg(long, default_value_t = 300)]
        timeout_seconds: u64,
    },

    /// Remove old artifact groups, keeping the newest N.
    Cleanup {
        #[arg(long)]
        basename: String,
        #[arg(long)]
        destination: PathBuf,
        #[arg(long, default_value_t = 1)]
        retain: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()) {
        error!(%err, "fatal");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Create {
            task,
            destination,
            inputs,
            num_slots,
            cache_type,
            offset_bits,
            deduplicate_keys,
        } => {
            let mut options = WriterOptions::new(task, destination);
            options.num_slots = num_slots;
            options.cache_kind = CacheKind::try_from(cache_type)?;
            options.offset_bits = offset_bits;
            let mut builder = Builder::open(&options)?;

            let mut scanner = KeyValueScanner::new(deduplicate_keys);
            for input in &inputs {
                info!(input = %input.display(), "scanning");
                scanner.for_each_in_file(input, |key, value| match key.first() {
                    Some(&VECTOR_KEY_FLAG) => {
                        builder.insert(&key[1..], value, ValueKind::StringList as u8)
                    }
                    _ => builder.insert(key, value, ValueKind::String as u8),
                })?;
            }
            info!(
                keys = scanner.stats.keys_count,
                entries = builder.entries(),
                max_collisions = builder.max_collisions(),
                "scan finished"
            );
            let timestamp = builder.finalize()?;
            println!("{timestamp}");
            Ok(())
        }

        Command::Get {
            task,
            destination,
            key,
        } => {
            let reader = Reader::open(&ReaderOptions::new(task, destination))?;
            let key = key.as_bytes();
            let kind = reader.get_type(key)?;
            match kind {
                ValueKind::String => println!("{}", reader.get_string(key)?),
                ValueKind::StringList => println!("{}", reader.get_string_list(key)?.join("|")),
                ValueKind::Bool => println!("{}", reader.get_bool(key)?),
                ValueKind::Int64 | ValueKind::Int => println!("{}", reader.get_long(key)?),
                ValueKind::Double | ValueKind::Float => println!("{}", reader.get_double(key)?),
                ValueKind::FloatList => {
                    let floats: Vec<String> = reader
                        .get_float_list(key)?
                        .into_iter()
                        .map(|f| f.to_string())
                        .collect();
                    println!("{}", floats.join(":"));
                }
            }
            reader.delete();
            Ok(())
        }

        Command::Info { path } => {
            let mapped = strata_runtime::mapped::MappedCache::open(&path, false)?;
            for (field, value) in mapped.header().info() {
                println!("{field}={value}");
            }
            Ok(())
        }

        Command::Download {
            basename,
            destination,
            urls,
        } => {
            let downloader =
                Downloader::new(&DownloaderOptions::new(basename, destination, urls))?;
            match downloader.run()? {
                Some(stats) => {
                    info!(
                        timestamp = stats.timestamp,
                        bytes = stats.decompressed_size,
                        path = %stats.decompressed_path.display(),
                        "downloaded"
                    );
                }
                None => info!("already up to date"),
            }
            Ok(())
        }

        Command::WaitLocal {
            task,
            destination,
            timeout_seconds,
        } => {
            let deadline = std::time::Instant::now() + Duration::from_secs(timeout_seconds);
            loop {
                match strata_runtime::read_latest_timestamp(&destination, &task) {
                    Ok(timestamp) => {
                        println!("{timestamp}");
                        return Ok(());
                    }
                    Err(err) if std::time::Instant::now() >= deadline => return Err(err),
                    Err(_) => std::thread::sleep(Duration::from_millis(500)),
                }
            }
        }

        Command::WaitRemote {
            basename,
            destination,
            urls,
            timeout_seconds,
        } => {
            let downloader =
                Downloader::new(&DownloaderOptions::new(basename, destination, urls))?;
            downloader.wait_until_new_file(Some(Duration::from_secs(timeout_seconds)))
        }

        Command::Cleanup {
            basename,
            destination,
            retain,
        } => {
            strata_sync::cleanup::remove_old_files(
                &LocalStorage,
                &destination,
                &basename,
                retain,
            );
            Ok(())
        }
    }
}
