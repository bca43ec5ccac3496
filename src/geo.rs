use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn swapped(self) -> Self {
        Self {
            lat: self.lng,
            lng: self.lat,
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_pair(self.lat, self.lng)
    }
}

/// Inclusive rectangle used to break axis-order ties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsHint {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundsHint {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Parses `south,west,north,east`.
    pub fn parse(value: &str) -> AppResult<Self> {
        let parts = value
            .split(',')
            .map(parse_lenient_number)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AppError::Config(format!("invalid bounds hint: {value}")))?;
        let [south, west, north, east] = parts[..] else {
            return Err(AppError::Config(format!(
                "bounds hint needs four values (south,west,north,east): {value}"
            )));
        };
        if south > north || west > east {
            return Err(AppError::Config(format!(
                "bounds hint is inverted: {value}"
            )));
        }
        Ok(Self::new(south, west, north, east))
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }
}

/// Axis order applied to combined coordinate strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisOrder {
    #[default]
    Auto,
    LatLng,
    LngLat,
}

impl AxisOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisOrder::Auto => "auto",
            AxisOrder::LatLng => "latlng",
            AxisOrder::LngLat => "lnglat",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(AxisOrder::Auto),
            "latlng" | "lat,lng" => Ok(AxisOrder::LatLng),
            "lnglat" | "lng,lat" => Ok(AxisOrder::LngLat),
            _ => Err(AppError::Config(format!("invalid axis order: {value}"))),
        }
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a number written with either `.` or `,` as decimal separator.
pub fn parse_lenient_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn is_valid_latitude(value: f64) -> bool {
    (-90.0..=90.0).contains(&value)
}

pub fn is_valid_longitude(value: f64) -> bool {
    (-180.0..=180.0).contains(&value)
}

pub fn is_valid_pair(lat: f64, lng: f64) -> bool {
    is_valid_latitude(lat) && is_valid_longitude(lng)
}

pub fn is_inside_bounds(lat: f64, lng: f64, hint: Option<&BoundsHint>) -> bool {
    hint.map(|bounds| bounds.contains(lat, lng)).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_either_decimal_separator() {
        assert_eq!(parse_lenient_number("19.43"), Some(19.43));
        assert_eq!(parse_lenient_number(" -99,13 "), Some(-99.13));
        assert_eq!(parse_lenient_number(""), None);
        assert_eq!(parse_lenient_number("north"), None);
        assert_eq!(parse_lenient_number("inf"), None);
        assert_eq!(parse_lenient_number("NaN"), None);
    }

    #[test]
    fn range_checks_are_inclusive() {
        assert!(is_valid_latitude(90.0));
        assert!(is_valid_latitude(-90.0));
        assert!(!is_valid_latitude(90.0001));
        assert!(is_valid_longitude(-180.0));
        assert!(!is_valid_longitude(180.5));
    }

    #[test]
    fn missing_hint_accepts_everything() {
        assert!(is_inside_bounds(10.0, 10.0, None));
        let hint = BoundsHint::new(14.0, -118.0, 33.0, -86.0);
        assert!(is_inside_bounds(19.43, -99.13, Some(&hint)));
        assert!(!is_inside_bounds(-99.13, 19.43, Some(&hint)));
    }

    #[test]
    fn parses_bounds_hint() {
        let hint = BoundsHint::parse("14, -118, 33, -86").unwrap();
        assert_eq!(hint, BoundsHint::new(14.0, -118.0, 33.0, -86.0));
        assert!(BoundsHint::parse("1,2,3").is_err());
        assert!(BoundsHint::parse("33,-86,14,-118").is_err());
    }

    #[test]
    fn parses_axis_order() {
        assert_eq!(AxisOrder::parse("LatLng").unwrap(), AxisOrder::LatLng);
        assert_eq!(AxisOrder::parse("lnglat").unwrap(), AxisOrder::LngLat);
        assert_eq!(AxisOrder::parse("").unwrap(), AxisOrder::Auto);
        assert!(AxisOrder::parse("xy").is_err());
    }
}
