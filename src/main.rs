//! ttlstore - Expiring Cache Demo
//!
//! This binary fills a store with items, half of them short-lived, and
//! reports how the expiry watchers drain it over time.

use bytes::Bytes;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ttlstore::{Item, Store};

/// Demo configuration
struct Config {
    /// Validity of items inserted without an expiration
    validity: Duration,
    /// Number of keys to insert
    keys: usize,
    /// Time to live of the short-lived half of the keys
    short_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validity: Duration::from_millis(2000),
            keys: 1000,
            short_ttl: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--validity-ms" => {
                    config.validity = Duration::from_millis(parse_value(&args, i, "--validity-ms"));
                    i += 2;
                }
                "--keys" | "-n" => {
                    config.keys = parse_value(&args, i, "--keys");
                    i += 2;
                }
                "--short-ttl-ms" => {
                    config.short_ttl =
                        Duration::from_millis(parse_value(&args, i, "--short-ttl-ms"));
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("ttlstore version {}", ttlstore::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

/// Parses the value following the flag at `args[i]`, exiting on error.
fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, raw);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
ttlstore - In-Process Key-Value Cache with Per-Entry Expiry

USAGE:
    ttlstore [OPTIONS]

OPTIONS:
        --validity-ms <MS>     Default item validity (default: 2000)
    -n, --keys <N>             Number of keys to insert (default: 1000)
        --short-ttl-ms <MS>    TTL of the short-lived half (default: 500)
    -v, --version              Print version information
    -h, --help                 Print this help message

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=ttlstore=debug
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let store: Store<String, Bytes> = Store::new(config.validity)?;

    // Even keys use the default validity, odd keys the short TTL
    for i in 0..config.keys {
        let value = Bytes::from(format!("value:{}", i));
        let item = if i % 2 == 0 {
            Item::new(value)
        } else {
            Item::with_ttl(value, config.short_ttl)
        };
        store.set(format!("key:{}", i), item);
    }

    // A second add for an existing key is ignored
    if store.add("key:0".to_string(), Item::new(Bytes::from("ignored"))) {
        warn!("add replaced an existing key");
    }

    info!(keys = store.len(), "Store populated");

    let deadline = config.validity.max(config.short_ttl) + Duration::from_millis(500);
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    while !store.is_empty() && started.elapsed() < deadline {
        ticker.tick().await;
        let stats = store.stats();
        info!(
            keys = stats.keys,
            expired = stats.expired,
            pending_watchers = stats.pending_watchers,
            "Expiry progress"
        );
    }

    if !store.is_empty() {
        warn!(keys = store.len(), "Keys left after every deadline passed");
    }

    store.shutdown().await;
    Ok(())
}
