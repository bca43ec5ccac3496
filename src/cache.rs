use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::KeyValueStore;
use crate::geo::LatLng;

pub const GEOCODE_NAMESPACE: &str = "geocode:";

/// Address to coordinate cache over a durable key-value store.
///
/// Every failure degrades to "not cached": reads of absent or malformed
/// entries return `None` and failed writes are logged and dropped.
#[derive(Clone)]
pub struct GeocodeCache {
    store: Arc<dyn KeyValueStore>,
}

impl GeocodeCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, address: &str) -> Option<LatLng> {
        let key = cache_key(address);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                debug!(target: "geocode_cache", ?err, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<LatLng>(&raw) {
            Ok(point) if point.lat.is_finite() && point.lng.is_finite() => Some(point),
            Ok(_) => None,
            Err(err) => {
                warn!(
                    target: "geocode_cache",
                    error = %err,
                    address,
                    "ignoring malformed cache entry"
                );
                None
            }
        }
    }

    pub fn set(&self, address: &str, lat: f64, lng: f64) {
        let value = match serde_json::to_string(&LatLng::new(lat, lng)) {
            Ok(value) => value,
            Err(err) => {
                debug!(target: "geocode_cache", ?err, "cache entry not serializable");
                return;
            }
        };
        if let Err(err) = self.store.set(&cache_key(address), &value) {
            debug!(target: "geocode_cache", ?err, address, "cache write skipped");
        }
    }
}

fn cache_key(address: &str) -> String {
    format!("{GEOCODE_NAMESPACE}{address}")
}
