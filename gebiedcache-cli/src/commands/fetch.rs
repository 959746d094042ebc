//! `fetch` command: load areas through the shared cache.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use gebiedcache::config::{ConfigFile, SourcesConfig};
use gebiedcache::poi::group_by_category;
use gebiedcache::source::{AsyncReqwestClient, OverpassPoiSource, PdokGeometrySource};
use gebiedcache::{AreaKey, AreaStore, AttemptStatus, CacheEntry, FetchError, StoreConfig};

use crate::error::CliError;

/// Spinner refresh interval while areas are loading.
const PROGRESS_TICK: Duration = Duration::from_millis(120);

/// Arguments for `gebiedcache fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// CBS area codes (e.g. BU03630000, WK036300, GM0363)
    #[arg(required = true)]
    pub codes: Vec<String>,

    /// Fetch the codes this many times; later rounds are served from cache
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Override the cache time-to-live in seconds
    #[arg(long)]
    pub ttl_secs: Option<u64>,

    /// Override the number of retries after a failed attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Give up immediately when an area has no geometry
    #[arg(long)]
    pub no_retry_missing: bool,

    /// List every facility instead of per-category counts
    #[arg(long)]
    pub list: bool,
}

/// Run the fetch command on a fresh multi-threaded runtime.
pub fn run(args: FetchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let keys = parse_codes(&args.codes)?;
    let store = build_store(store_config(&args, config), &config.sources)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    runtime.block_on(fetch_rounds(&store, &keys, &args))
}

/// Normalizes codes and rejects anything that is not a CBS code.
fn parse_codes(codes: &[String]) -> Result<Vec<AreaKey>, CliError> {
    let keys: Vec<AreaKey> = codes
        .iter()
        .map(|code| AreaKey::new(code.trim().to_ascii_uppercase()))
        .collect();

    let invalid: Vec<String> = keys
        .iter()
        .filter(|key| !key.is_cbs_code())
        .map(|key| key.to_string())
        .collect();

    if invalid.is_empty() {
        Ok(keys)
    } else {
        Err(CliError::InvalidCodes(invalid))
    }
}

/// Config file settings with command-line overrides applied.
fn store_config(args: &FetchArgs, config: &ConfigFile) -> StoreConfig {
    let mut store_config = config.store_config();
    if let Some(ttl) = args.ttl_secs {
        store_config = store_config.with_ttl(Duration::from_secs(ttl));
    }
    if let Some(retries) = args.max_retries {
        store_config = store_config.with_max_retries(retries);
    }
    if args.no_retry_missing {
        store_config = store_config.with_retry_missing_geometry(false);
    }
    store_config
}

fn build_store(config: StoreConfig, sources: &SourcesConfig) -> Result<AreaStore, CliError> {
    let client = |timeout_secs| {
        AsyncReqwestClient::with_timeout(timeout_secs).map_err(|e| CliError::Source(e.to_string()))
    };

    let geometry = PdokGeometrySource::with_urls(
        client(sources.geometry_timeout_secs)?,
        &sources.pdok_url,
        &sources.pdok_fallback_url,
    );
    let points = OverpassPoiSource::with_endpoint(
        client(sources.overpass_timeout_secs)?,
        &sources.overpass_url,
    );

    Ok(AreaStore::new(config, Arc::new(geometry), Arc::new(points)))
}

async fn fetch_rounds(
    store: &AreaStore,
    keys: &[AreaKey],
    args: &FetchArgs,
) -> Result<(), CliError> {
    info!(areas = keys.len(), rounds = args.repeat, "Fetching areas");

    let mut failed = 0;
    for round in 1..=args.repeat {
        if args.repeat > 1 {
            println!("{}", style(format!("Round {}/{}", round, args.repeat)).bold());
        }

        let results = fetch_with_progress(store, keys).await;

        failed = 0;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(entry) => print_entry(&entry, args.list),
                Err(e) => {
                    failed += 1;
                    print_failure(key, &e);
                }
            }
        }
        println!();
    }

    println!("{} {}", style("Cache:").dim(), store.stats());

    if failed > 0 {
        return Err(CliError::Unavailable {
            failed,
            total: keys.len(),
        });
    }
    Ok(())
}

/// Ensures every key concurrently, showing how many are still loading.
async fn fetch_with_progress(
    store: &AreaStore,
    keys: &[AreaKey],
) -> Vec<Result<Arc<CacheEntry>, FetchError>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(PROGRESS_TICK);

    let pending = join_all(keys.iter().map(|key| store.ensure(key)));
    tokio::pin!(pending);
    let mut ticker = tokio::time::interval(PROGRESS_TICK);

    let results = loop {
        tokio::select! {
            results = &mut pending => break results,
            _ = ticker.tick() => {
                let loading = keys
                    .iter()
                    .filter(|key| store.status_of(key) == AttemptStatus::InFlight)
                    .count();
                spinner.set_message(format!("Loading {} of {} area(s)...", loading, keys.len()));
            }
        }
    };

    spinner.finish_and_clear();
    results
}

fn print_entry(entry: &CacheEntry, list: bool) {
    let kind = entry.key.kind().map(|k| k.name()).unwrap_or("gebied");
    let name = entry
        .geometry
        .property_str("statnaam")
        .or_else(|| entry.geometry.property_str("naam"))
        .or_else(|| entry.geometry.property_str(&format!("{}naam", kind)));

    print!("{} {}", style(&entry.key).bold(), style(kind).dim());
    if let Some(name) = name {
        print!(" {}", name);
    }
    println!(
        "  {} {} item(s), fetched {}",
        style("✓").green(),
        entry.items.len(),
        entry.fetched_at_utc.format("%H:%M:%S UTC")
    );
    println!("  bbox {}", entry.bbox.to_overpass());

    for (category, items) in group_by_category(&entry.items) {
        if list {
            println!("  {}", style(category.label()).underlined());
            for item in items {
                println!("    - {} ({:.5}, {:.5})", item.name, item.lat, item.lon);
            }
        } else {
            println!("  {:<24} {:>4}", category.label(), items.len());
        }
    }
}

fn print_failure(key: &AreaKey, error: &FetchError) {
    let attempts = match error {
        FetchError::RetriesExhausted { attempts, .. } => *attempts,
        _ => 1,
    };
    println!(
        "{} {} after {} attempt(s): {}",
        style(key).bold(),
        style("unavailable").red(),
        attempts,
        error.root_cause()
    );
}
