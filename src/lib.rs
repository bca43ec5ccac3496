mod cache;
mod config;
mod coordinates;
mod db;
mod errors;
mod export;
mod feed;
mod geo;
mod geocoding;
mod ingestion;
mod resolver;
#[cfg(test)]
mod testing;
mod throttle;

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cache::{GeocodeCache, GEOCODE_NAMESPACE};
pub use config::{AppConfig, MapSettings, PublicAppConfig, DEFAULT_GEOCODER_ENDPOINT};
pub use coordinates::{disambiguate, parse_combined_coordinate, ParsedPair};
pub use db::{bootstrap, DisabledStore, KeyValueStore, MemoryStore, SqliteStore, StoreBootstrap};
pub use errors::{AppError, AppResult};
pub use export::{write_document, MapDocument};
pub use feed::{fetch_feed, FeedSource};
pub use geo::{
    is_inside_bounds, is_valid_latitude, is_valid_longitude, parse_lenient_number, AxisOrder,
    BoundsHint, LatLng,
};
pub use geocoding::{Geocoder, GeocodingService, NominatimClient};
pub use ingestion::{parse_csv, parse_json, FeedFormat, FieldMap, Place, PlaceField};
pub use resolver::{
    CoordinateResolver, ProgressObserver, Provenance, Resolution, ResolutionProgress,
    ResolutionReport, ResolutionStats, ResolvedCoordinate, ResolvedPlace, UnresolvedReason,
};
pub use throttle::RateGate;

/// Every target the library logs under. Module-path events fall under
/// `placefeed`.
pub const LOG_TARGETS: [&str; 6] = [
    "placefeed",
    "feed",
    "resolver",
    "geocoder",
    "geocode_cache",
    "kv_store",
];

/// Filter directives with `base` as the global level and `level` for every
/// library target, e.g. `info,placefeed=debug,feed=debug,...`.
pub fn log_directives(base: &str, level: &str) -> String {
    std::iter::once(base.to_string())
        .chain(LOG_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global tracing subscriber once. `RUST_LOG` wins over
/// `default_directives`.
pub fn init_tracing(default_directives: &str) {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}

/// Opens the durable cache store, or a disabled one when caching is off or
/// the store cannot be opened.
pub fn open_store(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    if !config.cache_enabled {
        info!(target: "kv_store", "geocode cache disabled by configuration");
        return Arc::new(DisabledStore);
    }
    match bootstrap(&config.data_dir, &config.cache_file_name) {
        Ok(StoreBootstrap { store, recovered }) => {
            if recovered {
                warn!(
                    target: "kv_store",
                    path = %store.path().display(),
                    "geocode cache was reset"
                );
            }
            Arc::new(store)
        }
        Err(err) => {
            warn!(
                target: "kv_store",
                error = %err,
                "geocode cache unavailable; continuing without it"
            );
            Arc::new(DisabledStore)
        }
    }
}

/// Fetches the feed, resolves every place and builds the map document.
pub async fn build_map(
    config: &AppConfig,
    store: Arc<dyn KeyValueStore>,
) -> AppResult<MapDocument> {
    let source = FeedSource::parse(config.require_source()?)?;
    let places = fetch_feed(&source, config.data_mode, &config.field_map).await?;

    let resolver = CoordinateResolver::from_config(config, GeocodeCache::new(store))?;
    let report = resolver.resolve_all(places, None).await;
    Ok(MapDocument::build(&report, &config.map_settings()))
}

/// End-to-end run: build the document and write it to `output` or stdout.
pub async fn run(config: &AppConfig, output: Option<&Path>) -> AppResult<ResolutionStats> {
    let store = open_store(config);
    let document = build_map(config, store).await?;
    write_document(&document, output)?;
    info!(
        resolved = document.summary.resolved,
        unresolved = document.summary.unresolved,
        skipped_no_location = document.summary.skipped_no_location,
        geocode_failures = document.summary.geocode_failures,
        "map document written"
    );
    Ok(document.summary)
}
