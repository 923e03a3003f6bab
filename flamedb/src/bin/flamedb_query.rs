//! Query a flamedb store for the merged profile of a key over a time range.
//!
//! # Usage
//!
//! ```bash
//! flamedb_query --name 'app.cpu{env=prod}' --from 1577836800 --until 1577840400
//! flamedb_query --name app.cpu --from 0 --until 4102444800 --json > flamegraph.json
//! ```

use clap::Parser;
use flamedb::ingest::query;
use flamedb::{Flamebearer, SegmentStore, StoreConfig, logging};
use flamedb_parse::StorageKey;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "flamedb_query")]
#[command(about = "Print the merged profile stored for a key")]
#[command(version)]
struct Args {
    /// Storage key, e.g. `app.cpu{env=prod}`
    #[arg(short, long)]
    name: String,

    /// Start of the window, in Unix seconds (inclusive)
    #[arg(long)]
    from: i64,

    /// End of the window, in Unix seconds (exclusive)
    #[arg(long)]
    until: i64,

    /// Directory holding the store snapshot
    #[arg(short, long, default_value = "flamedb-data")]
    data_dir: PathBuf,

    /// Segment width in seconds; must match the width the store was written with
    #[arg(long, default_value_t = 10)]
    bucket_width: u64,

    /// Print flamegraph JSON instead of collapsed stacks
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = StorageKey::parse(&args.name)?;
    let config = StoreConfig::with_bucket_width(Duration::from_secs(args.bucket_width))
        .persist_to(&args.data_dir);
    let store = SegmentStore::open(config)?;

    let result = query(&store, &key, args.from, args.until)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        writeln!(out, "{}", Flamebearer::from_tree(&result.tree).to_json()?)?;
    } else {
        out.write_all(result.tree.serialize_human().as_bytes())?;
    }
    out.flush()?;

    eprintln!(
        "Merged {} segments covering [{}, {})",
        result.segments, result.from, result.until
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
