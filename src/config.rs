use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::geo::{parse_lenient_number, AxisOrder, BoundsHint, LatLng};
use crate::ingestion::{FeedFormat, FieldMap, PlaceField};

pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_GEOCODE_DELAY_MS: u64 = 1_100;
const DEFAULT_MAP_CENTER: LatLng = LatLng {
    lat: 19.4326,
    lng: -99.1332,
};
const DEFAULT_MAP_ZOOM: u8 = 12;
const MAX_MAP_ZOOM: u8 = 22;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_source_url: Option<String>,
    pub data_mode: FeedFormat,
    pub pin_color: String,
    pub geocode_delay_ms: u64,
    pub map_center: LatLng,
    pub map_zoom: u8,
    pub coord_order: AxisOrder,
    pub bounds_hint: Option<BoundsHint>,
    pub geocoder_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub cache_enabled: bool,
    pub data_dir: PathBuf,
    pub cache_file_name: String,
    pub field_map: FieldMap,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub data_source_url: Option<String>,
    pub data_mode: FeedFormat,
    pub pin_color: String,
    pub geocode_delay_ms: u64,
    pub map_center: LatLng,
    pub map_zoom: u8,
    pub coord_order: AxisOrder,
    pub bounds_hint: Option<BoundsHint>,
    pub geocoder_endpoint: String,
    pub has_geocoder_key: bool,
    pub cache_enabled: bool,
    pub cache_path: String,
}

/// View settings handed to the map layer alongside the features.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapSettings {
    pub center: LatLng,
    pub zoom: u8,
    pub pin_color: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_source_url: None,
            data_mode: FeedFormat::Csv,
            pin_color: "#d7263d".to_string(),
            geocode_delay_ms: DEFAULT_GEOCODE_DELAY_MS,
            map_center: DEFAULT_MAP_CENTER,
            map_zoom: DEFAULT_MAP_ZOOM,
            coord_order: AxisOrder::Auto,
            bounds_hint: None,
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocoder_api_key: None,
            cache_enabled: true,
            data_dir: PathBuf::from(".placefeed"),
            cache_file_name: "geocode-cache.db".to_string(),
            field_map: FieldMap::default(),
        }
    }
}

impl AppConfig {
    /// Reads the environment on top of the defaults. Malformed values are
    /// reported as configuration errors rather than silently ignored.
    pub fn from_env() -> AppResult<Self> {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Ok(Self {
            data_source_url: non_empty_var("DATA_SOURCE_URL"),
            data_mode: match non_empty_var("DATA_MODE") {
                Some(value) => FeedFormat::parse(&value)?,
                None => defaults.data_mode,
            },
            pin_color: non_empty_var("PIN_COLOR").unwrap_or(defaults.pin_color),
            geocode_delay_ms: parse_u64("GEOCODE_DELAY_MS", defaults.geocode_delay_ms),
            map_center: match non_empty_var("MAP_CENTER") {
                Some(value) => parse_center(&value)?,
                None => defaults.map_center,
            },
            map_zoom: parse_u8("MAP_ZOOM", defaults.map_zoom).min(MAX_MAP_ZOOM),
            coord_order: match non_empty_var("COORD_ORDER") {
                Some(value) => AxisOrder::parse(&value)?,
                None => defaults.coord_order,
            },
            bounds_hint: non_empty_var("BOUNDS_HINT")
                .map(|value| BoundsHint::parse(&value))
                .transpose()?,
            geocoder_endpoint: non_empty_var("GEOCODER_ENDPOINT")
                .unwrap_or(defaults.geocoder_endpoint),
            geocoder_api_key: non_empty_var("GEOCODER_API_KEY").map(SecretString::from),
            cache_enabled: parse_bool("CACHE_ENABLED", defaults.cache_enabled),
            data_dir: non_empty_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_file_name: non_empty_var("CACHE_FILE_NAME").unwrap_or(defaults.cache_file_name),
            field_map: match non_empty_var("FIELD_SYNONYMS") {
                Some(value) => parse_field_synonyms(defaults.field_map, &value)?,
                None => defaults.field_map,
            },
        })
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            data_source_url: self.data_source_url.clone(),
            data_mode: self.data_mode,
            pin_color: self.pin_color.clone(),
            geocode_delay_ms: self.geocode_delay_ms,
            map_center: self.map_center,
            map_zoom: self.map_zoom,
            coord_order: self.coord_order,
            bounds_hint: self.bounds_hint,
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            has_geocoder_key: self.geocoder_api_key.is_some(),
            cache_enabled: self.cache_enabled,
            cache_path: self.cache_path().to_string_lossy().to_string(),
        }
    }

    pub fn map_settings(&self) -> MapSettings {
        MapSettings {
            center: self.map_center,
            zoom: self.map_zoom,
            pin_color: self.pin_color.clone(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file_name)
    }

    pub fn require_source(&self) -> AppResult<&str> {
        self.data_source_url
            .as_deref()
            .ok_or_else(|| AppError::Config("DATA_SOURCE_URL is not set".into()))
    }
}

/// Parses `lat,lng` for the initial map center.
pub fn parse_center(value: &str) -> AppResult<LatLng> {
    let mut parts = value.splitn(2, ',').map(parse_lenient_number);
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(lat), Some(lng)) if LatLng::new(lat, lng).is_valid() => Ok(LatLng::new(lat, lng)),
        _ => Err(AppError::Config(format!("invalid map center: {value}"))),
    }
}

/// Parses `field=syn1|syn2;field2=syn3` into extra header synonyms.
pub fn parse_field_synonyms(mut fields: FieldMap, value: &str) -> AppResult<FieldMap> {
    for entry in value.split(';').filter(|entry| !entry.trim().is_empty()) {
        let (field, synonyms) = entry
            .split_once('=')
            .ok_or_else(|| AppError::Config(format!("invalid field synonym entry: {entry}")))?;
        let field = PlaceField::parse(field)?;
        fields = fields.with_synonyms(field, synonyms.split('|'));
    }
    Ok(fields)
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    parse_number(key, default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    parse_number(key, default)
}

fn parse_number<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(key, value = %value, "ignoring malformed numeric setting");
            default
        }),
        Err(_) => default,
    }
}
