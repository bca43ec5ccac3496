//! Parsing of free-form "combined" coordinate strings such as
//! `19.43,-99.13`, `(-99.13; 19.43)` or `lat 19.43 lon -99.13`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::geo::{
    is_inside_bounds, is_valid_pair, parse_lenient_number, AxisOrder, BoundsHint, LatLng,
};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[()\[\]{}]").expect("valid regex"));
static COMMA_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,[\s,]*").expect("valid regex"));
static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]+").expect("valid regex"));
static SIGNED_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedPair {
    pub point: LatLng,
    /// The text read latitude-first is out of range and only the reversed
    /// reading is valid. Configured `lnglat` order and bounds tie-breaks
    /// are not corrections.
    pub corrected: bool,
}

impl ParsedPair {
    fn ordered(first: f64, second: f64, order: AxisOrder) -> Self {
        let point = match order {
            AxisOrder::LngLat => LatLng::new(second, first),
            AxisOrder::Auto | AxisOrder::LatLng => LatLng::new(first, second),
        };
        Self {
            point,
            corrected: false,
        }
    }
}

pub fn parse_combined_coordinate(
    text: &str,
    order: AxisOrder,
    bounds: Option<&BoundsHint>,
) -> Option<ParsedPair> {
    let normalized = normalize_combined(text);
    if normalized.is_empty() {
        return None;
    }
    let tokens = split_tokens(&normalized);

    if order != AxisOrder::Auto {
        if let [first, second, ..] = tokens[..] {
            if let (Some(a), Some(b)) =
                (parse_lenient_number(first), parse_lenient_number(second))
            {
                return Some(ParsedPair::ordered(a, b, order));
            }
        }
        let (a, b) = scan_first_two(&normalized)?;
        return Some(ParsedPair::ordered(a, b, order));
    }

    if let [first, second] = tokens[..] {
        if let (Some(a), Some(b)) = (parse_lenient_number(first), parse_lenient_number(second))
        {
            if let Some(pair) = disambiguate(a, b, bounds) {
                return Some(pair);
            }
        }
    }

    let (a, b) = scan_first_two(&normalized)?;
    disambiguate(a, b, bounds)
}

/// Picks the axis order for `(a, b)`. When both readings are valid and the
/// bounds hint does not separate them, the first token is the latitude.
pub fn disambiguate(a: f64, b: f64, bounds: Option<&BoundsHint>) -> Option<ParsedPair> {
    let as_given = is_valid_pair(a, b);
    let reversed = is_valid_pair(b, a);
    let given = ParsedPair {
        point: LatLng::new(a, b),
        corrected: false,
    };
    let flipped = ParsedPair {
        point: LatLng::new(b, a),
        corrected: false,
    };

    match (as_given, reversed) {
        (true, false) => Some(given),
        (false, true) => Some(ParsedPair {
            corrected: true,
            ..flipped
        }),
        (false, false) => None,
        (true, true) => {
            let given_inside = is_inside_bounds(a, b, bounds);
            let flipped_inside = is_inside_bounds(b, a, bounds);
            if flipped_inside && !given_inside {
                Some(flipped)
            } else {
                Some(given)
            }
        }
    }
}

fn normalize_combined(text: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(text.trim(), " ");
    let unbracketed = BRACKETS.replace_all(&collapsed, "");
    let separated = unbracketed.replace([';', '|'], ",");
    COMMA_RUN
        .replace_all(&separated, ",")
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

fn split_tokens(normalized: &str) -> Vec<&str> {
    TOKEN_SPLIT
        .split(normalized)
        .filter(|token| !token.is_empty())
        .collect()
}

fn scan_first_two(text: &str) -> Option<(f64, f64)> {
    let mut numbers = SIGNED_DECIMAL
        .find_iter(text)
        .filter_map(|found| parse_lenient_number(found.as_str()));
    let first = numbers.next()?;
    let second = numbers.next()?;
    Some((first, second))
}
