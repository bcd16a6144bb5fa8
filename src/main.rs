use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use listcache::cli::Args;
use listcache::config::{self, AppSettings};
use listcache::core::{CacheEvent, ListCache, SourceRegistry, Workers};
use listcache::entities::{ListLoader, MemoryLoader, SourceHandle};

/// Time allowed for the cache to settle after each step
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Row of the demo collection
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Item {
    id: usize,
    name: String,
}

impl Item {
    fn new(id: usize) -> Self {
        Self {
            id,
            name: format!("item {}", id),
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    query_count: usize,
    maximum_count: usize,
    loaded_count: usize,
    consistent: bool,
    first: Option<Item>,
    last: Option<Item>,
    registry_hits: u64,
    registry_misses: u64,
}

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let default_level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();
    if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Settings file, then command line overrides.
fn resolve_settings(args: &Args, path_config: &config::PathConfig) -> Result<AppSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(|| config::config_file(config::SETTINGS_FILE, path_config));
    info!("Settings path: {}", path.display());

    let mut settings = config::load_or_default(&path)?;
    if let Some(chunk) = args.chunk {
        settings.cache.chunk_size = chunk;
    }
    if let Some(limit) = args.limit {
        settings.cache.limit = limit;
    }
    if let Some(offset) = args.offset {
        settings.cache.offset = offset;
    }
    if args.use_move {
        settings.cache.use_move = true;
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    settings.cache = settings.cache.normalized();
    Ok(settings)
}

fn settle(cache: &mut ListCache<Item>, step: &str) {
    if !cache.wait_idle(SETTLE_TIMEOUT) {
        warn!("{}: cache still loading after {:?}", step, SETTLE_TIMEOUT);
    }
    debug!("{}: {:?}", step, cache);
    // Notifications were printed by the subscriber as they were emitted
    cache.events().clear();
}

fn mutate_store(args: &Args, store: &SourceHandle<Item>) {
    for &(start, count) in &args.remove {
        let removed = store.remove_range(start, count);
        info!("Removed {} items at {}", removed.len(), start);
    }
    for &(from, count, to) in &args.moves {
        if !store.move_range(from, count, to) {
            warn!("Ignoring move {}:{}:{} (out of bounds)", from, count, to);
        }
    }
    for id in args.items..args.items + args.append {
        store.push(Item::new(id));
    }
    if args.append > 0 {
        info!("Appended {} items", args.append);
    }
}

/// Served rows must match the store window they were loaded from.
fn is_consistent(cache: &ListCache<Item>, store: &SourceHandle<Item>, offset: usize) -> bool {
    let snapshot = store.snapshot();
    let expected = snapshot.iter().skip(offset).take(cache.loaded_count());
    let served = (0..cache.loaded_count()).filter_map(|i| cache.get(i));
    cache.loaded_count() <= cache.query_count() && expected.eq(served)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args)?;
    info!("listcache demo starting...");
    debug!("Command-line args: {:?}", args);

    let settings = resolve_settings(&args, &path_config)?;
    let threads = match settings.workers {
        0 => Workers::default_thread_count(),
        n => n,
    };
    let workers = Arc::new(Workers::new(threads).context("Failed to start loader threads")?);
    info!("Loader threads: {}", workers.thread_count());

    let registry: SourceRegistry<String, MemoryLoader<Item>> = SourceRegistry::new();
    let key = "demo".to_string();
    let loader = registry.get_or_insert_with(&key, || Arc::new(MemoryLoader::new((0..args.items).map(Item::new).collect())));
    let store = registry
        .get(&key)
        .map(|shared| shared.handle())
        .unwrap_or_else(|| loader.handle());
    info!("Backing store: {} items", loader.count().unwrap_or(0));

    let mut cache = ListCache::new(
        Arc::clone(&loader),
        Arc::clone(&workers),
        |a: &Item, b: &Item| a.id == b.id,
        settings.cache.clone(),
    );
    cache.events().subscribe::<CacheEvent, _>(|event| match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to serialize event: {}", e),
    });

    cache.init_count();
    settle(&mut cache, "init");
    for &n in &args.refer {
        cache.refer(n);
        settle(&mut cache, "refer");
    }

    mutate_store(&args, &store);
    cache.invalidate();
    settle(&mut cache, "reload");

    let loaded = cache.loaded_count();
    let summary = Summary {
        query_count: cache.query_count(),
        maximum_count: cache.maximum_count(),
        loaded_count: loaded,
        consistent: is_consistent(&cache, &store, settings.cache.offset),
        first: cache.get(0).cloned(),
        last: loaded.checked_sub(1).and_then(|i| cache.get(i)).cloned(),
        registry_hits: registry.stats().hits(),
        registry_misses: registry.stats().misses(),
    };
    if let Some(error) = cache.last_error() {
        warn!("Last load failed: {}", error);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );
    Ok(())
}
