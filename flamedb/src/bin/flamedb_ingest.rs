//! Ingest a profile payload into an on-disk flamedb store.
//!
//! The payload is decoded with the requested format, merged into the segment
//! covering `--from`, and the store snapshot is rewritten on exit.
//!
//! # Usage
//!
//! ```bash
//! flamedb_ingest profile.txt --name 'app.cpu{env=prod}' --format folded
//! perf script | stackcollapse-perf.pl | flamedb_ingest - --name app.cpu --from 1577836800
//! flamedb_ingest profile.bin.gz --name app.cpu --content-type binary/octet-stream+trie --gzip
//! ```

use clap::Parser;
use flamedb::ingest::{IngestRequest, ingest};
use flamedb::{Encoding, SegmentStore, StoreConfig, logging};
use flamedb_parse::{Format, StorageKey};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flamedb_ingest")]
#[command(about = "Ingest a profile into a flamedb store")]
#[command(version)]
struct Args {
    /// Payload file, or `-` for stdin
    input: PathBuf,

    /// Storage key, e.g. `app.cpu{env=prod}`
    #[arg(short, long)]
    name: String,

    /// Start of the profiled interval, in Unix seconds (defaults to now)
    #[arg(long)]
    from: Option<i64>,

    /// End of the profiled interval, in Unix seconds (defaults to --from)
    #[arg(long)]
    until: Option<i64>,

    /// Payload format: lines, folded, tree or trie
    #[arg(short, long)]
    format: Option<String>,

    /// Content type used to pick the format when --format is absent
    #[arg(long)]
    content_type: Option<String>,

    /// Payload is gzip-compressed
    #[arg(long)]
    gzip: bool,

    /// Directory holding the store snapshot
    #[arg(short, long, default_value = "flamedb-data")]
    data_dir: PathBuf,

    /// Segment width in seconds
    #[arg(long, default_value_t = 10)]
    bucket_width: u64,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn read_payload(input: &Path) -> io::Result<Vec<u8>> {
    if input.as_os_str() == "-" {
        let mut payload = Vec::new();
        io::stdin().lock().read_to_end(&mut payload)?;
        return Ok(payload);
    }
    fs::read(input)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = StorageKey::parse(&args.name)?;
    let format = Format::resolve(args.format.as_deref(), args.content_type.as_deref())?;
    let from = args.from.unwrap_or_else(now);
    let until = args.until.unwrap_or(from);

    let payload = read_payload(&args.input)
        .map_err(|e| format!("Failed to read input '{}': {}", args.input.display(), e))?;

    let config = StoreConfig::with_bucket_width(Duration::from_secs(args.bucket_width))
        .persist_to(&args.data_dir);
    let store = SegmentStore::open(config)?;

    let encoding = if args.gzip {
        Encoding::Gzip
    } else {
        Encoding::Identity
    };
    let request = IngestRequest::new(key.clone(), from, format, payload)
        .until(until)
        .encoding(encoding);

    // Persist whatever the store already held even if this upload is rejected.
    let result = ingest(&store, request);
    store.close()?;
    let summary = result?;

    info!(key = %key, bucket = summary.bucket, "stored profile");
    eprintln!(
        "Ingested {} samples across {} stacks into {} (bucket {})",
        summary.samples, summary.stacks, key, summary.bucket
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose, args.quiet);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
