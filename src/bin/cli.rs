//! Example CLI wrapper around [`pagetree`]. Not part of the crate's
//! stable API: keys/values are fixed at 16/64 raw bytes (UTF-8 text,
//! truncated or zero-padded) purely so this binary has something concrete to
//! store. Host code embeds the library directly with its own key/value
//! types instead of going through this tool.

use clap::{Parser, Subcommand};
use pagetree::{Config, MemoryCache, Tree};
use std::path::PathBuf;

const KEY_SIZE: usize = 16;
const VALUE_SIZE: usize = 64;

type Key = [u8; KEY_SIZE];
type Value = [u8; VALUE_SIZE];

#[derive(Parser)]
#[command(name = "pagetree")]
#[command(about = "Inspect and exercise a pagetree index from the command line", long_about = None)]
struct Cli {
    /// Path to the backing file.
    #[arg(short, long, default_value = "pagetree.db")]
    store: PathBuf,

    /// Path to a TOML config file overriding defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a key/value pair.
    Put { key: String, value: String },
    /// Look up a key.
    Get { key: String },
    /// Remove a key.
    Del { key: String },
    /// Flush dirty nodes to the backing file.
    Flush,
    /// Print cache residency counts.
    Stats,
}

fn encode_key(s: &str) -> anyhow::Result<Key> {
    encode_fixed::<KEY_SIZE>(s)
}

fn encode_value(s: &str) -> anyhow::Result<Value> {
    encode_fixed::<VALUE_SIZE>(s)
}

fn encode_fixed<const N: usize>(s: &str) -> anyhow::Result<[u8; N]> {
    let bytes = s.as_bytes();
    anyhow::ensure!(bytes.len() <= N, "'{s}' is longer than {N} bytes");
    let mut buf = [0u8; N];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

fn decode_fixed(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn open_tree(cli: &Cli) -> anyhow::Result<Tree<Key, Value, MemoryCache<Key, Value>>> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.cache.backing_path = cli.store.clone();
    let cache = MemoryCache::open(config.cache)?;
    let tree = Tree::from_config(config.tree, cache)?;
    tree.init()?;
    Ok(tree)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let tree = open_tree(&cli)?;

    match &cli.command {
        Commands::Put { key, value } => {
            tree.insert(encode_key(key)?, encode_value(value)?)?;
            tree.flush()?;
            println!("ok");
        }
        Commands::Get { key } => match tree.search(&encode_key(key)?) {
            Ok(value) => println!("{}", decode_fixed(&value)),
            Err(pagetree::Error::KeyDoesNotExist) => println!("(not found)"),
            Err(e) => return Err(e.into()),
        },
        Commands::Del { key } => {
            tree.remove(encode_key(key)?)?;
            tree.flush()?;
            println!("ok");
        }
        Commands::Flush => {
            tree.flush()?;
            println!("flushed");
        }
        Commands::Stats => {
            let (resident, mapped) = tree.cache_state();
            println!("resident={resident} mapped={mapped}");
        }
    }

    Ok(())
}
