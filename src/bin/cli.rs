//! localkv CLI
//!
//! Command-line interface for inspecting and editing a store on disk.
//!
//! Exit codes: 0 on success, 1 when `get` finds no value, 2 on error,
//! 3 when `verify` finds corruption.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use localkv::wal::WalRecovery;
use localkv::{Config, Store, StoreError};
use tracing_subscriber::{fmt, EnvFilter};

/// localkv CLI
#[derive(Parser, Debug)]
#[command(name = "localkv")]
#[command(about = "Inspect and edit a localkv store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./localkv_data")]
    data_dir: String,

    /// Namespace (one store per namespace)
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Largest value accepted, in bytes
    #[arg(long)]
    max_value_size: Option<usize>,

    /// Largest total size of keys and values, in bytes
    #[arg(long)]
    max_total_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Remove a key
    Remove {
        /// The key to remove
        key: String,
    },

    /// List all keys
    Keys,

    /// Remove every key
    Clear,

    /// Rewrite the log with only live entries
    Compact,

    /// Print store statistics
    Stats,

    /// Scan the log and report damage without modifying it
    Verify,
}

fn main() -> ExitCode {
    // Logs go to stderr so command output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error [{:?}]: {}", e.kind(), e);
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> Result<ExitCode, StoreError> {
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .namespace(args.namespace);
    if let Some(limit) = args.max_value_size {
        builder = builder.max_value_size(limit);
    }
    if let Some(limit) = args.max_total_size {
        builder = builder.max_total_size(limit);
    }

    let config = builder.build();

    // Opening the store would repair the log, so verify reads it directly
    if let Commands::Verify = args.command {
        config.validate()?;
        return verify(&config);
    }

    let store = Store::open(config)?;

    match args.command {
        Commands::Get { key } => match store.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => return Ok(ExitCode::from(1)),
        },
        Commands::Set { key, value } => {
            store.set(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Remove { key } => {
            store.remove(key.as_bytes())?;
            println!("OK");
        }
        Commands::Keys => {
            for key in store.get_all_keys() {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Clear => {
            store.clear()?;
            println!("OK");
        }
        Commands::Compact => {
            let stats = store.compact()?;
            println!(
                "compacted {} -> {} bytes ({} live keys)",
                stats.log_size_before, stats.log_size_after, stats.live_keys
            );
        }
        Commands::Stats => {
            let stats = store.stats();
            println!("keys:      {}", stats.key_count);
            println!("data size: {}", stats.data_size);
            println!("log size:  {}", stats.log_size);
            println!("next lsn:  {}", stats.next_lsn);
        }
        Commands::Verify => unreachable!("verify runs before the store is opened"),
    }

    store.close()?;
    Ok(ExitCode::SUCCESS)
}

fn verify(config: &Config) -> Result<ExitCode, StoreError> {
    let path = config.log_path();
    if !path.exists() {
        println!("no log at {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let result = WalRecovery::verify(&path)?;
    println!("entries:   {}", result.entries_recovered);
    println!("last lsn:  {}", result.last_lsn);
    println!("valid len: {}", result.valid_len);
    println!("torn tail: {}", result.was_truncated);
    println!("discarded: {}", result.bytes_discarded);

    match &result.corruption {
        Some(detail) => {
            println!("corruption: {}", detail);
            Ok(ExitCode::from(3))
        }
        None => Ok(ExitCode::SUCCESS),
    }
}
