use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MapSettings;
use crate::errors::AppResult;
use crate::resolver::{Provenance, ResolutionReport, ResolutionStats, ResolvedPlace};

/// GeoJSON FeatureCollection plus the view settings the map widget needs.
#[derive(Debug, Serialize)]
pub struct MapDocument {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub generated_at: DateTime<Utc>,
    pub map: MapSettings,
    pub summary: ResolutionStats,
    pub features: Vec<MarkerFeature>,
}

#[derive(Debug, Serialize)]
pub struct MarkerFeature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: PointGeometry,
    pub properties: MarkerProperties,
}

#[derive(Debug, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// GeoJSON order: longitude first.
    pub coordinates: [f64; 2],
}

#[derive(Debug, Serialize)]
pub struct MarkerProperties {
    pub row: usize,
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub schedule: Vec<String>,
    pub fares: Fares,
    pub provenance: Provenance,
    pub axis_swapped: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Fares {
    pub general: Option<String>,
    pub students: Option<String>,
    pub seniors: Option<String>,
}

impl MapDocument {
    pub fn build(report: &ResolutionReport, settings: &MapSettings) -> Self {
        Self {
            kind: "FeatureCollection",
            generated_at: Utc::now(),
            map: settings.clone(),
            summary: report.stats.clone(),
            features: report.places.iter().map(MarkerFeature::from_resolved).collect(),
        }
    }
}

impl MarkerFeature {
    fn from_resolved(resolved: &ResolvedPlace) -> Self {
        let place = &resolved.place;
        let schedule = [&place.schedule_primary, &place.schedule_secondary]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        Self {
            kind: "Feature",
            geometry: PointGeometry {
                kind: "Point",
                coordinates: [resolved.coordinate.lng, resolved.coordinate.lat],
            },
            properties: MarkerProperties {
                row: place.row,
                name: place.name.clone(),
                address: place.address.clone(),
                description: place.description.clone(),
                contact: place.contact.clone(),
                schedule,
                fares: Fares {
                    general: place.fare_general.clone(),
                    students: place.fare_students.clone(),
                    seniors: place.fare_seniors.clone(),
                },
                provenance: resolved.coordinate.provenance,
                axis_swapped: resolved.coordinate.axis_swapped,
                extras: place.extras.clone(),
            },
        }
    }
}

/// Writes the document as pretty JSON to `path`, or to stdout when absent.
pub fn write_document(document: &MapDocument, path: Option<&Path>) -> AppResult<()> {
    let serialized = serde_json::to_string_pretty(document)?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serialized)?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(serialized.as_bytes())?;
            stdout.write_all(b"\n")?;
            stdout.flush()?;
        }
    }
    Ok(())
}
