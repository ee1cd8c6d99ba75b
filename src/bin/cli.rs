//! segvault CLI
//!
//! Command-line interface for a local segvault data directory.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::UNIX_EPOCH;

use clap::{Parser, Subcommand};
use segvault::{Config, LogStore, Object, Options, Result, Storage};
use tracing_subscriber::{fmt, EnvFilter};

/// segvault CLI
#[derive(Parser, Debug)]
#[command(name = "segvault")]
#[command(about = "Embedded log-structured object store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./segvault_data")]
    data_dir: PathBuf,

    /// Write shards for newly created buckets
    #[arg(long, default_value = "4")]
    shards: usize,

    /// Skip fsync on writes
    #[arg(long)]
    no_fsync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a bucket
    Mb {
        bucket: String,
    },

    /// Remove a bucket
    Rb {
        bucket: String,

        /// Remove even if the bucket still holds objects
        #[arg(long)]
        force: bool,
    },

    /// List buckets
    Buckets,

    /// Store a file (or stdin with `-`) under a key
    Put {
        bucket: String,
        key: String,

        /// Source file, `-` for stdin
        source: String,

        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Write an object to stdout
    Get {
        bucket: String,
        key: String,

        #[arg(long, default_value = "0")]
        offset: i64,

        /// Bytes to read (0 reads to the end)
        #[arg(long, default_value = "0")]
        length: i64,
    },

    /// Show object metadata (a trailing `/` asks for a directory)
    Stat {
        bucket: String,
        key: String,
    },

    /// List objects
    Ls {
        bucket: String,

        #[arg(long, default_value = "")]
        prefix: String,

        /// Maximum number of objects (0 means no limit)
        #[arg(long, default_value = "0")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Only direct children of the prefix
        #[arg(long)]
        flat: bool,
    },

    /// Delete an object
    Rm {
        bucket: String,
        key: String,

        /// Also delete every key below `key/`
        #[arg(short, long)]
        recursive: bool,
    },

    /// Copy an object
    Cp {
        src_bucket: String,
        src_key: String,
        dst_bucket: String,
        dst_key: String,
    },

    /// Move an object
    Mv {
        src_bucket: String,
        src_key: String,
        dst_bucket: String,
        dst_key: String,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,segvault=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .segment_shards(args.shards)
        .no_fsync(args.no_fsync)
        .build();

    let store = match LogStore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            process::exit(1);
        }
    };

    let outcome = run(&store, args.command);
    let closed = store.close();

    if let Err(e) = outcome.and(closed) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(store: &LogStore, command: Commands) -> Result<()> {
    let opts = Options::default();
    match command {
        Commands::Mb { bucket } => {
            let info = store.create_bucket(&bucket, &opts)?;
            println!("created {}", info.name);
        }
        Commands::Rb { bucket, force } => {
            store.delete_bucket(&bucket, &Options::recursive(force))?;
            println!("removed {}", bucket);
        }
        Commands::Buckets => {
            for info in store.list_buckets(&opts)? {
                println!("{}", info.name);
            }
        }
        Commands::Put {
            bucket,
            key,
            source,
            content_type,
        } => {
            let bucket = store.bucket(&bucket);
            let object = if source == "-" {
                let stdin = io::stdin();
                let mut input = stdin.lock();
                bucket.write(&key, &mut input, None, &content_type, &opts)?
            } else {
                let mut file = File::open(&source)?;
                let size = file.metadata()?.len();
                bucket.write(&key, &mut file, Some(size), &content_type, &opts)?
            };
            print_object(&object);
        }
        Commands::Get {
            bucket,
            key,
            offset,
            length,
        } => {
            let (mut reader, _) = store.bucket(&bucket).open(&key, offset, length, &opts)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }
        Commands::Stat { bucket, key } => {
            let object = store.bucket(&bucket).stat(&key, &opts)?;
            print_object(&object);
        }
        Commands::Ls {
            bucket,
            prefix,
            limit,
            offset,
            flat,
        } => {
            let opts = Options::recursive(!flat);
            for object in store.bucket(&bucket).list(&prefix, limit, offset, &opts)? {
                print_object(&object);
            }
        }
        Commands::Rm {
            bucket,
            key,
            recursive,
        } => {
            store
                .bucket(&bucket)
                .delete(&key, &Options::recursive(recursive))?;
        }
        Commands::Cp {
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
        } => {
            let object = store
                .bucket(&dst_bucket)
                .copy(&dst_key, &src_bucket, &src_key, &opts)?;
            print_object(&object);
        }
        Commands::Mv {
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
        } => {
            let object = store
                .bucket(&dst_bucket)
                .move_object(&dst_key, &src_bucket, &src_key, &opts)?;
            print_object(&object);
        }
    }
    Ok(())
}

fn print_object(object: &Object) {
    let updated = object
        .updated
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let kind = if object.is_dir { "dir" } else { "obj" };
    println!(
        "{}\t{:>12}\t{}\t{}\t{}\t{}",
        kind, object.size, updated, object.etag, object.content_type, object.key
    );
}
