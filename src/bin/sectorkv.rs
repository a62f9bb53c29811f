//! SectorKV command-line tool
//!
//! Operates on a flash image file, e.g. a partition dump pulled off a
//! device or an image to be flashed.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use sectorkv::{FileFlash, Geometry, KvError, Store, StoreConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// SectorKV image tool
#[derive(Parser, Debug)]
#[command(name = "sectorkv")]
#[command(about = "Inspect and edit SectorKV flash images")]
#[command(version)]
struct Args {
    /// Flash image file (geometry is read from <image>.part)
    #[arg(short, long, default_value = "./sectorkv.img")]
    image: PathBuf,

    /// Number of redundant copies per entry
    #[arg(short, long, default_value = "1")]
    redundancy: usize,

    /// Max number of live keys
    #[arg(long, default_value = "256")]
    max_entries: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new erased image and format it
    Format {
        /// Sector size in bytes
        #[arg(long, default_value = "4096")]
        sector_size: u32,

        /// Number of sectors
        #[arg(long, default_value = "4")]
        sector_count: u32,

        /// Program granularity in bytes
        #[arg(long, default_value = "16")]
        alignment: u32,

        /// Base address of the partition on the device
        #[arg(long, default_value = "0")]
        base_address: u32,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List all live keys
    List,

    /// Print space and wear statistics
    Stats,

    /// Run one garbage collection pass
    Gc,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sectorkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> sectorkv::Result<()> {
    let config = StoreConfig::builder()
        .redundancy(args.redundancy)
        .max_entries(args.max_entries)
        .build();

    if let Commands::Format {
        sector_size,
        sector_count,
        alignment,
        base_address,
    } = args.command
    {
        let geometry = Geometry {
            base_address,
            sector_size,
            sector_count,
            alignment,
        };
        let flash = FileFlash::create(&args.image, geometry)?;
        let store = Store::format(flash, config)?;
        tracing::info!(
            "Formatted {} ({} x {} bytes)",
            args.image.display(),
            sector_count,
            sector_size
        );
        print_stats(&store);
        return Ok(());
    }

    let flash = FileFlash::open(&args.image)?;
    let mut store = Store::open(flash, config)?;

    match args.command {
        Commands::Format { .. } => unreachable!("handled above"),
        Commands::Get { key } => match store.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(KvError::NotFound) => println!("(nil)"),
            Err(e) => return Err(e),
        },
        Commands::Put { key, value } => {
            store.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            store.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::List => {
            for key in store.keys() {
                println!("{}", String::from_utf8_lossy(key));
            }
        }
        Commands::Stats => print_stats(&store),
        Commands::Gc => match store.collect_garbage()? {
            Some(sector) => println!("Reclaimed sector {}", sector),
            None => println!("Nothing to reclaim"),
        },
    }

    Ok(())
}

fn print_stats(store: &Store<FileFlash>) {
    let stats = store.stats();
    println!("keys:          {}", stats.key_count);
    println!("deleted:       {}", stats.deleted_count);
    println!("transaction:   {}", store.transaction_id());
    println!("live bytes:    {}", stats.live_bytes);
    println!("stale bytes:   {}", stats.stale_bytes);
    println!("free bytes:    {}", stats.free_bytes);
    println!(
        "sectors:       {} ({} empty, {} corrupt)",
        stats.sector_count, stats.empty_sectors, stats.corrupt_sectors
    );
    println!(
        "erase counts:  {}..={}",
        stats.min_erase_count, stats.max_erase_count
    );
    for sector in store.sectors() {
        println!(
            "  sector {:>3}: {:<8} head {:>6} live {:>6} stale {:>6} erases {}",
            sector.id,
            format!("{:?}", sector.state),
            sector.write_head,
            sector.live_bytes,
            sector.stale_bytes,
            sector.erase_count
        );
    }
}
