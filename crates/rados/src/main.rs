//! RADOS command-line tool
//!
//! Streams local files into and out of striped objects kept by the
//! filesystem store configured in ceph.conf (`striper_data_dir`).

use anyhow::{anyhow, bail, Context, Result};
use cephconfig::{CephConfig, ConfigValue, Size};
use clap::{Parser, Subcommand};
use striper::store::FsStore;
use striper::{Cluster, StriperOptions, StripedObject, WriteStrategy};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rados")]
#[command(about = "Striped object storage client", long_about = None)]
struct Cli {
    /// Pool name
    #[arg(short, long, env = "CEPH_POOL")]
    pool: String,

    /// Ceph configuration file path
    #[arg(
        short = 'c',
        long,
        env = "CEPH_CONF",
        default_value = "/etc/ceph/ceph.conf"
    )]
    conf: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write object from file or stdin
    Put {
        /// Object name
        object: String,
        /// Input file ("-" for stdin)
        file: String,
        /// Write at this offset instead of replacing the object
        #[arg(long)]
        offset: Option<u64>,
        /// Bytes per write request (K/M/G suffixes allowed)
        #[arg(long, default_value = "4M", value_parser = parse_size)]
        block_size: u64,
        /// Split each request into chunks of this size
        #[arg(long, value_parser = parse_size)]
        chunk_size: Option<u64>,
    },
    /// Read object to file or stdout
    Get {
        /// Object name
        object: String,
        /// Output file ("-" for stdout)
        file: String,
        /// Bytes per read request (K/M/G suffixes allowed)
        #[arg(long, default_value = "4M", value_parser = parse_size)]
        block_size: u64,
    },
    /// Get object statistics
    Stat {
        /// Object name
        object: String,
    },
    /// Remove object
    Rm {
        /// Object name
        object: String,
    },
    /// Resize object
    Truncate {
        /// Object name
        object: String,
        /// New size in bytes (K/M/G suffixes allowed)
        #[arg(value_parser = parse_size)]
        size: u64,
    },
    /// Set an extended attribute
    Setxattr {
        /// Object name
        object: String,
        /// Attribute name
        name: String,
        /// Attribute value
        value: String,
    },
    /// Print an extended attribute
    Getxattr {
        /// Object name
        object: String,
        /// Attribute name
        name: String,
    },
    /// Create the pool
    Mkpool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging (RUST_LOG wins over --debug)
    let default_level = if cli.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Loading configuration from: {}", cli.conf);
    let config = CephConfig::from_file(&cli.conf)
        .with_context(|| format!("Failed to parse {}", cli.conf))?;

    if let Commands::Mkpool = cli.command {
        return mkpool(&config, &cli.pool).await;
    }

    let store = FsStore::new();
    let cluster = Cluster::connect_with(&store, &config, &cli.pool)
        .await
        .with_context(|| format!("Failed to connect to pool {}", cli.pool))?;

    let result = run(&cluster, cli.command, cli.debug).await;
    let closed = cluster.close().context("Failed to close connection");

    result?;
    closed
}

async fn mkpool(config: &CephConfig, pool: &str) -> Result<()> {
    let options = StriperOptions::load(config).context("Invalid configuration")?;
    if options.striper_data_dir.is_empty() {
        bail!("striper_data_dir is not set in the configuration");
    }

    FsStore::mkpool(&options.striper_data_dir, pool)
        .await
        .with_context(|| format!("Failed to create pool {}", pool))?;
    info!("Pool {} created", pool);
    Ok(())
}

async fn run(cluster: &Cluster, command: Commands, verbose: bool) -> Result<()> {
    match command {
        Commands::Put {
            object,
            file,
            offset,
            block_size,
            chunk_size,
        } => {
            let strategy = chunk_size.map(WriteStrategy::chunked).unwrap_or_default();
            let mut obj = open(cluster, &object).await?.with_write_strategy(strategy);
            let mut input = open_input(&file).await?;
            let block_size = to_usize(block_size)?;

            let written = match offset {
                Some(offset) => put_at(&obj, &mut *input, offset, block_size).await?,
                None => {
                    obj.remove().await.context("Failed to remove old object")?;
                    striper::io::copy_in(&mut obj, &mut input, block_size)
                        .await
                        .context("Failed to write object")?
                }
            };
            obj.destroy();

            if verbose {
                eprintln!("Wrote {} bytes to {}", written, object);
            }
        }
        Commands::Get {
            object,
            file,
            block_size,
        } => {
            let mut obj = open(cluster, &object).await?;
            // stat first so a missing object is an error rather than empty output
            obj.stat().await.context("Failed to stat object")?;

            let mut output = open_output(&file).await?;
            let read = striper::io::copy_out(&mut obj, &mut output, to_usize(block_size)?)
                .await
                .context("Failed to read object")?;
            obj.destroy();

            if verbose {
                eprintln!("Read {} bytes from {}", read, object);
            }
        }
        Commands::Stat { object } => {
            let mut obj = open(cluster, &object).await?;
            let stat = obj.stat().await.context("Failed to stat object")?;
            obj.destroy();

            println!("{} mtime {:?} size {}", object, stat.modified(), stat.size);
        }
        Commands::Rm { object } => {
            let mut obj = open(cluster, &object).await?;
            obj.remove().await.context("Failed to delete object")?;
            obj.destroy();

            if verbose {
                eprintln!("Removed {}", object);
            }
        }
        Commands::Truncate { object, size } => {
            let mut obj = open(cluster, &object).await?;
            obj.truncate(size)
                .await
                .context("Failed to truncate object")?;
            obj.destroy();
        }
        Commands::Setxattr {
            object,
            name,
            value,
        } => {
            let mut obj = open(cluster, &object).await?;
            obj.setxattr(&name, value.as_bytes())
                .await
                .context("Failed to set xattr")?;
            obj.destroy();
        }
        Commands::Getxattr { object, name } => {
            let mut obj = open(cluster, &object).await?;
            let value = obj.getxattr(&name).await.context("Failed to get xattr")?;
            obj.destroy();

            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Mkpool => return Err(anyhow!("mkpool runs before connecting")),
    }

    Ok(())
}

async fn open(cluster: &Cluster, object: &str) -> Result<StripedObject> {
    let mut obj = StripedObject::new(cluster, object)?;
    obj.connect()
        .await
        .with_context(|| format!("Failed to open {}", object))?;
    Ok(obj)
}

/// Stream input into the object starting at `offset`, leaving the cursors alone
async fn put_at(
    obj: &StripedObject,
    input: &mut (dyn AsyncRead + Unpin + Send),
    offset: u64,
    block_size: usize,
) -> Result<u64> {
    let mut buf = vec![0u8; block_size.max(1)];
    let mut done = 0u64;

    loop {
        let n = input.read(&mut buf).await.context("Failed to read input")?;
        if n == 0 {
            break;
        }
        done += obj
            .write_at(&buf[..n], offset + done)
            .await
            .context("Failed to write object")? as u64;
    }

    Ok(done)
}

/// Open input file or stdin
async fn open_input(file: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if file == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }

    let f = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to read file: {}", file))?;
    Ok(Box::new(f))
}

/// Open output file or stdout
async fn open_output(file: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if file == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }

    let f = tokio::fs::File::create(file)
        .await
        .with_context(|| format!("Failed to write file: {}", file))?;
    Ok(Box::new(f))
}

fn parse_size(s: &str) -> std::result::Result<u64, String> {
    Size::parse_config_value(s).map(|size| size.0)
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).with_context(|| format!("{} does not fit in memory", value))
}
