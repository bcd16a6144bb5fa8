use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Incremental list cache demo: loads a numbered in-memory collection,
/// mutates it, reloads and prints every change notification as JSON
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Number of items in the backing collection
    #[arg(short = 'n', long = "items", value_name = "N", default_value_t = 250)]
    pub items: usize,

    /// Fetch granularity (overrides settings)
    #[arg(long = "chunk", value_name = "N")]
    pub chunk: Option<usize>,

    /// Maximum number of items exposed, 0 = unlimited (overrides settings)
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,

    /// First item of the window in the collection (overrides settings)
    #[arg(long = "offset", value_name = "N")]
    pub offset: Option<usize>,

    /// Detect moved runs when reconciling the reload
    #[arg(short = 'm', long = "use-move")]
    pub use_move: bool,

    /// Declare interest in the first N rows (can be specified multiple times)
    #[arg(short = 'r', long = "refer", value_name = "N")]
    pub refer: Vec<usize>,

    /// Remove COUNT items at START before reloading (can be specified multiple times)
    #[arg(long = "remove", value_name = "START:COUNT", value_parser = parse_pair)]
    pub remove: Vec<(usize, usize)>,

    /// Append N new items before reloading
    #[arg(long = "append", value_name = "N", default_value_t = 0)]
    pub append: usize,

    /// Move COUNT items from FROM to TO (index after removal) before reloading
    #[arg(long = "move", value_name = "FROM:COUNT:TO", value_parser = parse_triple)]
    pub moves: Vec<(usize, usize, usize)>,

    /// Loader threads, 0 = auto (overrides settings)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Settings file (default: listcache.json in the config directory)
    #[arg(short = 's', long = "settings", value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Write log to a file instead of stderr
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

fn parse_numbers(s: &str, expected: usize) -> Result<Vec<usize>, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != expected {
        return Err(format!("expected {} numbers separated by ':', got '{}'", expected, s));
    }
    parts
        .iter()
        .map(|p| p.trim().parse::<usize>().map_err(|e| format!("'{}': {}", p, e)))
        .collect()
}

fn parse_pair(s: &str) -> Result<(usize, usize), String> {
    let n = parse_numbers(s, 2)?;
    Ok((n[0], n[1]))
}

fn parse_triple(s: &str) -> Result<(usize, usize, usize), String> {
    let n = parse_numbers(s, 3)?;
    Ok((n[0], n[1], n[2]))
}
