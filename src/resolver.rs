use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, trace, warn};

use crate::cache::GeocodeCache;
use crate::config::AppConfig;
use crate::coordinates::parse_combined_coordinate;
use crate::errors::AppResult;
use crate::geo::{parse_lenient_number, AxisOrder, BoundsHint, LatLng};
use crate::geocoding::GeocodingService;
use crate::ingestion::Place;
use crate::throttle::RateGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Explicit,
    CombinedField,
    Cache,
    Geocoded,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Explicit => "explicit",
            Provenance::CombinedField => "combined-field",
            Provenance::Cache => "cache",
            Provenance::Geocoded => "geocoded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedCoordinate {
    pub lat: f64,
    pub lng: f64,
    pub provenance: Provenance,
    pub axis_swapped: bool,
}

impl ResolvedCoordinate {
    fn new(point: LatLng, provenance: Provenance, axis_swapped: bool) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            provenance,
            axis_swapped,
        }
    }

    pub fn point(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Nothing usable: no address and no valid explicit or combined coordinates.
    NoLocationData,
    /// An address was present but the geocoder produced no valid match.
    GeocodeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedCoordinate),
    Unresolved(UnresolvedReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub total_rows: usize,
    pub explicit: usize,
    pub combined: usize,
    pub cache_hits: usize,
    pub geocoded: usize,
    pub geocode_calls: usize,
    pub axis_swaps: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub skipped_no_location: usize,
    pub geocode_failures: usize,
}

impl ResolutionStats {
    fn with_total(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Self::default()
        }
    }

    fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Resolved(coordinate) => {
                self.resolved += 1;
                if coordinate.axis_swapped {
                    self.axis_swaps += 1;
                }
                match coordinate.provenance {
                    Provenance::Explicit => self.explicit += 1,
                    Provenance::CombinedField => self.combined += 1,
                    Provenance::Cache => self.cache_hits += 1,
                    Provenance::Geocoded => {
                        self.geocoded += 1;
                        self.geocode_calls += 1;
                    }
                }
            }
            Resolution::Unresolved(reason) => {
                self.unresolved += 1;
                match reason {
                    UnresolvedReason::NoLocationData => self.skipped_no_location += 1,
                    UnresolvedReason::GeocodeFailed => {
                        self.geocode_failures += 1;
                        self.geocode_calls += 1;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub place: Place,
    pub coordinate: ResolvedCoordinate,
}

#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub places: Vec<ResolvedPlace>,
    pub stats: ResolutionStats,
}

#[derive(Debug, Clone)]
pub struct ResolutionProgress {
    pub total_rows: usize,
    pub processed: usize,
    pub resolved: usize,
}

pub type ProgressObserver = Arc<dyn Fn(ResolutionProgress) + Send + Sync>;

/// Turns places into validated coordinates: explicit fields, then the
/// combined field, then the geocode cache, then a throttled live geocode.
pub struct CoordinateResolver {
    cache: GeocodeCache,
    geocoder: GeocodingService,
    gate: RateGate,
    order: AxisOrder,
    bounds: Option<BoundsHint>,
    guard: AsyncMutex<()>,
}

impl CoordinateResolver {
    pub fn new(
        cache: GeocodeCache,
        geocoder: GeocodingService,
        gate: RateGate,
        order: AxisOrder,
        bounds: Option<BoundsHint>,
    ) -> Self {
        Self {
            cache,
            geocoder,
            gate,
            order,
            bounds,
            guard: AsyncMutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig, cache: GeocodeCache) -> AppResult<Self> {
        Ok(Self::new(
            cache,
            GeocodingService::from_config(config)?,
            RateGate::from_millis(config.geocode_delay_ms),
            config.coord_order,
            config.bounds_hint,
        ))
    }

    /// Resolves every place in order, one at a time, so the rate gate spaces
    /// every outbound geocode.
    pub async fn resolve_all(
        &self,
        places: Vec<Place>,
        observer: Option<ProgressObserver>,
    ) -> ResolutionReport {
        let _lock = self.guard.lock().await;
        let total_rows = places.len();
        let mut stats = ResolutionStats::with_total(total_rows);
        let mut resolved = Vec::with_capacity(total_rows);

        for (processed, place) in places.into_iter().enumerate() {
            let resolution = self.resolve(&place).await;
            stats.record(&resolution);
            match resolution {
                Resolution::Resolved(coordinate) => {
                    trace!(
                        target: "resolver",
                        row = place.row,
                        provenance = coordinate.provenance.as_str(),
                        "place resolved"
                    );
                    resolved.push(ResolvedPlace { place, coordinate });
                }
                Resolution::Unresolved(reason) => {
                    debug!(target: "resolver", row = place.row, ?reason, "place skipped");
                }
            }
            if let Some(callback) = &observer {
                callback(ResolutionProgress {
                    total_rows,
                    processed: processed + 1,
                    resolved: stats.resolved,
                });
            }
        }

        info!(
            target: "resolver",
            total = stats.total_rows,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            cache_hits = stats.cache_hits,
            geocode_calls = stats.geocode_calls,
            "resolution finished"
        );
        ResolutionReport {
            places: resolved,
            stats,
        }
    }

    pub async fn resolve(&self, place: &Place) -> Resolution {
        if let Some(coordinate) = self.from_explicit_fields(place) {
            return Resolution::Resolved(coordinate);
        }
        if let Some(coordinate) = self.from_combined_field(place) {
            return Resolution::Resolved(coordinate);
        }

        let Some(address) = place.address.as_deref().filter(|a| !a.trim().is_empty()) else {
            return Resolution::Unresolved(UnresolvedReason::NoLocationData);
        };

        if let Some(point) = self.cache.get(address).filter(LatLng::is_valid) {
            return Resolution::Resolved(ResolvedCoordinate::new(point, Provenance::Cache, false));
        }

        self.gate.wait().await;
        match self.geocoder.geocode(address).await {
            Some(point) if point.is_valid() => {
                self.cache.set(address, point.lat, point.lng);
                Resolution::Resolved(ResolvedCoordinate::new(point, Provenance::Geocoded, false))
            }
            Some(point) => {
                debug!(
                    target: "resolver",
                    row = place.row,
                    lat = point.lat,
                    lng = point.lng,
                    "geocoder returned out-of-range coordinates"
                );
                Resolution::Unresolved(UnresolvedReason::GeocodeFailed)
            }
            None => Resolution::Unresolved(UnresolvedReason::GeocodeFailed),
        }
    }

    fn from_explicit_fields(&self, place: &Place) -> Option<ResolvedCoordinate> {
        let lat = parse_lenient_number(place.latitude.as_deref()?)?;
        let lng = parse_lenient_number(place.longitude.as_deref()?)?;
        accept(place, LatLng::new(lat, lng), false, Provenance::Explicit)
    }

    fn from_combined_field(&self, place: &Place) -> Option<ResolvedCoordinate> {
        let text = place.coordinates.as_deref()?;
        let parsed = parse_combined_coordinate(text, self.order, self.bounds.as_ref())?;
        if parsed.corrected {
            warn_axis_swap(place, Provenance::CombinedField);
        }
        accept(
            place,
            parsed.point,
            parsed.corrected,
            Provenance::CombinedField,
        )
    }
}

/// Accepts `point` as given, or swapped when only the reverse reading is in
/// range. `already_swapped` carries a correction the parser made before us.
fn accept(
    place: &Place,
    point: LatLng,
    already_swapped: bool,
    provenance: Provenance,
) -> Option<ResolvedCoordinate> {
    if point.is_valid() {
        return Some(ResolvedCoordinate::new(point, provenance, already_swapped));
    }
    let swapped = point.swapped();
    if swapped.is_valid() {
        warn_axis_swap(place, provenance);
        return Some(ResolvedCoordinate::new(swapped, provenance, !already_swapped));
    }
    debug!(
        target: "resolver",
        row = place.row,
        source = provenance.as_str(),
        "coordinates out of range in both axis orders"
    );
    None
}

fn warn_axis_swap(place: &Place, provenance: Provenance) {
    warn!(
        target: "resolver",
        row = place.row,
        place = place.name.as_deref().unwrap_or_default(),
        source = provenance.as_str(),
        "latitude and longitude arrive swapped in the feed; correcting"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::db::{KeyValueStore, MemoryStore};
    use crate::geocoding::Geocoder;
    use crate::testing::CapturedLogs;

    struct TestGeocoder {
        responses: Mutex<Vec<Option<LatLng>>>,
        calls: AtomicUsize,
    }

    impl TestGeocoder {
        fn new(responses: Vec<Option<LatLng>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Geocoder for TestGeocoder {
        async fn geocode(&self, _address: &str) -> Option<LatLng> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().pop().flatten()
        }
    }

    fn resolver_with(
        geocoder: Arc<TestGeocoder>,
        store: Arc<MemoryStore>,
        gate: RateGate,
        bounds: Option<BoundsHint>,
    ) -> CoordinateResolver {
        CoordinateResolver::new(
            GeocodeCache::new(store),
            GeocodingService::from_geocoder(geocoder),
            gate,
            AxisOrder::Auto,
            bounds,
        )
    }

    fn quick_resolver(geocoder: Arc<TestGeocoder>) -> CoordinateResolver {
        resolver_with(
            geocoder,
            Arc::new(MemoryStore::new()),
            RateGate::disabled(),
            None,
        )
    }

    fn explicit(lat: &str, lng: &str) -> Place {
        Place {
            row: 1,
            latitude: Some(lat.into()),
            longitude: Some(lng.into()),
            ..Place::default()
        }
    }

    fn with_address(address: &str) -> Place {
        Place {
            row: 1,
            address: Some(address.into()),
            ..Place::default()
        }
    }

    fn resolved(resolution: Resolution) -> ResolvedCoordinate {
        match resolution {
            Resolution::Resolved(coordinate) => coordinate,
            Resolution::Unresolved(reason) => panic!("expected coordinates, got {reason:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_fields_pass_through_unchanged() {
        let resolver = quick_resolver(TestGeocoder::new(vec![]));
        for (lat, lng) in [(19.43, -99.13), (-90.0, 180.0), (0.0, 0.0), (89.9, -179.9)] {
            let place = explicit(&lat.to_string(), &lng.to_string());
            let coordinate = resolved(resolver.resolve(&place).await);
            assert_eq!(coordinate.point(), LatLng::new(lat, lng));
            assert_eq!(coordinate.provenance, Provenance::Explicit);
            assert!(!coordinate.axis_swapped);
        }
    }

    #[tokio::test]
    async fn explicit_fields_accept_comma_decimals() {
        let resolver = quick_resolver(TestGeocoder::new(vec![]));
        let coordinate = resolved(resolver.resolve(&explicit("19,43", "-99,13")).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
    }

    #[tokio::test]
    async fn swapped_explicit_fields_are_corrected() {
        let resolver = quick_resolver(TestGeocoder::new(vec![]));
        let coordinate = resolved(resolver.resolve(&explicit("-99.13", "19.43")).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert_eq!(coordinate.provenance, Provenance::Explicit);
        assert!(coordinate.axis_swapped);
    }

    #[tokio::test]
    async fn combined_field_is_used_when_explicit_is_missing() {
        let resolver = quick_resolver(TestGeocoder::new(vec![]));
        let place = Place {
            latitude: Some("19.43".into()),
            coordinates: Some("19.43,-99.13".into()),
            ..Place::default()
        };
        let coordinate = resolved(resolver.resolve(&place).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert_eq!(coordinate.provenance, Provenance::CombinedField);
    }

    #[tokio::test]
    async fn combined_field_honours_bounds_hint() {
        let resolver = resolver_with(
            TestGeocoder::new(vec![]),
            Arc::new(MemoryStore::new()),
            RateGate::disabled(),
            Some(BoundsHint::new(49.0, 44.0, 51.0, 46.0)),
        );
        let place = Place {
            coordinates: Some("45.0,50.0".into()),
            ..Place::default()
        };
        let coordinate = resolved(resolver.resolve(&place).await);
        assert_eq!(coordinate.point(), LatLng::new(50.0, 45.0));
        assert!(!coordinate.axis_swapped);
    }

    #[tokio::test]
    async fn combined_field_swap_is_logged() {
        let (logs, _guard) = CapturedLogs::install("warn");
        let resolver = quick_resolver(TestGeocoder::new(vec![]));
        let place = Place {
            row: 7,
            name: Some("Kiosko".into()),
            coordinates: Some("-99.13,19.43".into()),
            ..Place::default()
        };
        let coordinate = resolved(resolver.resolve(&place).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert_eq!(coordinate.provenance, Provenance::CombinedField);
        assert!(coordinate.axis_swapped);

        let output = logs.contents();
        assert_eq!(output.matches("arrive swapped in the feed").count(), 1);
        assert!(output.contains("source=\"combined-field\""));
        assert!(output.contains("row=7"));
    }

    #[tokio::test]
    async fn configured_lnglat_order_is_not_a_swap() {
        let (logs, _guard) = CapturedLogs::install("warn");
        let resolver = CoordinateResolver::new(
            GeocodeCache::new(Arc::new(MemoryStore::new())),
            GeocodingService::from_geocoder(TestGeocoder::new(vec![])),
            RateGate::disabled(),
            AxisOrder::LngLat,
            None,
        );
        let place = Place {
            coordinates: Some("-99.13,19.43".into()),
            ..Place::default()
        };
        let coordinate = resolved(resolver.resolve(&place).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert!(!coordinate.axis_swapped);
        assert!(logs.contents().is_empty());
    }

    #[tokio::test]
    async fn forced_order_is_corrected_when_out_of_range() {
        let resolver = CoordinateResolver::new(
            GeocodeCache::new(Arc::new(MemoryStore::new())),
            GeocodingService::from_geocoder(TestGeocoder::new(vec![])),
            RateGate::disabled(),
            AxisOrder::LatLng,
            None,
        );
        let place = Place {
            coordinates: Some("-99.13, 19.43".into()),
            ..Place::default()
        };
        let coordinate = resolved(resolver.resolve(&place).await);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert!(coordinate.axis_swapped);
    }

    #[tokio::test]
    async fn cache_hit_skips_geocoder() {
        let geocoder = TestGeocoder::new(vec![]);
        let store = Arc::new(MemoryStore::new());
        store
            .set("geocode:Av. Reforma 1", r#"{"lat":19.43,"lng":-99.13}"#)
            .unwrap();
        let resolver = resolver_with(
            geocoder.clone(),
            store,
            RateGate::from_millis(60_000),
            None,
        );

        let coordinate = resolved(resolver.resolve(&with_address("Av. Reforma 1")).await);
        assert_eq!(coordinate.provenance, Provenance::Cache);
        assert_eq!(coordinate.point(), LatLng::new(19.43, -99.13));
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn geocoded_results_are_cached() {
        let geocoder = TestGeocoder::new(vec![Some(LatLng::new(19.43, -99.13))]);
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver_with(geocoder.clone(), store.clone(), RateGate::disabled(), None);

        let first = resolved(resolver.resolve(&with_address("Av. Reforma 1")).await);
        assert_eq!(first.provenance, Provenance::Geocoded);
        assert!(store.get("geocode:Av. Reforma 1").unwrap().is_some());

        let second = resolved(resolver.resolve(&with_address("Av. Reforma 1")).await);
        assert_eq!(second.provenance, Provenance::Cache);
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn empty_geocode_result_is_unresolved() {
        let geocoder = TestGeocoder::new(vec![None]);
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver_with(geocoder.clone(), store.clone(), RateGate::disabled(), None);

        let resolution = resolver.resolve(&with_address("Nowhere 404")).await;
        assert_eq!(
            resolution,
            Resolution::Unresolved(UnresolvedReason::GeocodeFailed)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_geocode_is_unresolved() {
        let geocoder = TestGeocoder::new(vec![Some(LatLng::new(123.0, 10.0))]);
        let resolver = quick_resolver(geocoder);
        assert_eq!(
            resolver.resolve(&with_address("Odd 1")).await,
            Resolution::Unresolved(UnresolvedReason::GeocodeFailed)
        );
    }

    #[tokio::test]
    async fn place_without_location_counts_once() {
        let geocoder = TestGeocoder::new(vec![]);
        let resolver = quick_resolver(geocoder.clone());
        let places = vec![
            Place {
                row: 1,
                name: Some("Somewhere".into()),
                coordinates: Some("not a coordinate".into()),
                ..Place::default()
            },
            explicit("19.43", "-99.13"),
        ];

        let report = resolver.resolve_all(places, None).await;
        assert_eq!(report.places.len(), 1);
        assert_eq!(report.stats.unresolved, 1);
        assert_eq!(report.stats.skipped_no_location, 1);
        assert_eq!(report.stats.geocode_failures, 0);
        assert_eq!(report.stats.resolved, 1);
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn tallies_every_provenance() {
        let geocoder = TestGeocoder::new(vec![None, Some(LatLng::new(40.0, -3.0))]);
        let store = Arc::new(MemoryStore::new());
        store
            .set("geocode:Cached 1", r#"{"lat":1.0,"lng":2.0}"#)
            .unwrap();
        let resolver = resolver_with(geocoder, store, RateGate::disabled(), None);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let observer: ProgressObserver = Arc::new(move |update: ResolutionProgress| {
            sink.lock().push(update.processed);
        });

        let places = vec![
            explicit("-99.13", "19.43"),
            Place {
                coordinates: Some("19.43 -99.13".into()),
                ..Place::default()
            },
            with_address("Cached 1"),
            with_address("Live 1"),
            with_address("Live 2"),
            Place::default(),
        ];
        let report = resolver.resolve_all(places, Some(observer)).await;
        let stats = report.stats;
        assert_eq!(stats.total_rows, 6);
        assert_eq!(stats.explicit, 1);
        assert_eq!(stats.combined, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.geocoded, 1);
        assert_eq!(stats.geocode_calls, 2);
        assert_eq!(stats.axis_swaps, 1);
        assert_eq!(stats.resolved, 4);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.skipped_no_location, 1);
        assert_eq!(stats.geocode_failures, 1);
        assert_eq!(*progress.lock(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_geocodes_are_spaced_by_the_gate() {
        let delay = Duration::from_millis(1_100);
        let geocoder = TestGeocoder::new(vec![
            Some(LatLng::new(1.0, 1.0)),
            Some(LatLng::new(2.0, 2.0)),
            Some(LatLng::new(3.0, 3.0)),
            Some(LatLng::new(4.0, 4.0)),
        ]);
        let resolver = resolver_with(
            geocoder.clone(),
            Arc::new(MemoryStore::new()),
            RateGate::new(delay),
            None,
        );
        let places = (1..=4)
            .map(|n| with_address(&format!("Calle {n}")))
            .collect::<Vec<_>>();

        let start = Instant::now();
        let report = resolver.resolve_all(places, None).await;
        assert_eq!(report.stats.geocoded, 4);
        assert_eq!(geocoder.calls(), 4);
        assert!(start.elapsed() >= delay * 3);
    }
}
