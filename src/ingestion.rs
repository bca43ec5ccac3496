use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Keys under which a JSON feed may nest its row array.
const JSON_ROW_KEYS: &[&str] = &["data", "rows", "records", "items"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Csv,
    Json,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Csv => "csv",
            FeedFormat::Json => "json",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => Ok(FeedFormat::Csv),
            "json" => Ok(FeedFormat::Json),
            _ => Err(AppError::Config(format!("invalid data mode: {value}"))),
        }
    }

    pub fn parse_payload(&self, bytes: &[u8], fields: &FieldMap) -> AppResult<Vec<Place>> {
        match self {
            FeedFormat::Csv => parse_csv(bytes, fields),
            FeedFormat::Json => parse_json(bytes, fields),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceField {
    Name,
    Address,
    Description,
    Coordinates,
    Latitude,
    Longitude,
    Contact,
    SchedulePrimary,
    ScheduleSecondary,
    FareGeneral,
    FareStudents,
    FareSeniors,
}

impl PlaceField {
    pub const ALL: [PlaceField; 12] = [
        PlaceField::Name,
        PlaceField::Address,
        PlaceField::Description,
        PlaceField::Coordinates,
        PlaceField::Latitude,
        PlaceField::Longitude,
        PlaceField::Contact,
        PlaceField::SchedulePrimary,
        PlaceField::ScheduleSecondary,
        PlaceField::FareGeneral,
        PlaceField::FareStudents,
        PlaceField::FareSeniors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceField::Name => "name",
            PlaceField::Address => "address",
            PlaceField::Description => "description",
            PlaceField::Coordinates => "coordinates",
            PlaceField::Latitude => "latitude",
            PlaceField::Longitude => "longitude",
            PlaceField::Contact => "contact",
            PlaceField::SchedulePrimary => "schedule_primary",
            PlaceField::ScheduleSecondary => "schedule_secondary",
            PlaceField::FareGeneral => "fare_general",
            PlaceField::FareStudents => "fare_students",
            PlaceField::FareSeniors => "fare_seniors",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        let wanted = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == wanted)
            .ok_or_else(|| AppError::Config(format!("unknown place field: {value}")))
    }

    fn default_synonyms(&self) -> &'static [&'static str] {
        match self {
            PlaceField::Name => &["nombre", "name", "lugar", "titulo", "title", "sitio"],
            PlaceField::Address => &["direccion", "address", "domicilio", "ubicacion"],
            PlaceField::Description => {
                &["descripcion", "description", "detalles", "notas", "notes"]
            }
            PlaceField::Coordinates => &[
                "coordenadas",
                "coordinates",
                "coords",
                "latlng",
                "lat lng",
                "lat long",
                "gps",
            ],
            PlaceField::Latitude => &["latitud", "latitude", "lat"],
            PlaceField::Longitude => &["longitud", "longitude", "lng", "lon", "long"],
            PlaceField::Contact => &["contacto", "contact", "telefono", "phone", "correo", "email"],
            PlaceField::SchedulePrimary => &[
                "horario",
                "horario 1",
                "horario entre semana",
                "schedule",
                "hours",
            ],
            PlaceField::ScheduleSecondary => &[
                "horario 2",
                "horario fin de semana",
                "schedule 2",
                "weekend hours",
            ],
            PlaceField::FareGeneral => &["tarifa general", "tarifa", "precio", "costo", "price"],
            PlaceField::FareStudents => &[
                "tarifa estudiantes",
                "tarifa estudiante",
                "estudiantes",
                "students",
            ],
            PlaceField::FareSeniors => &[
                "tarifa adultos mayores",
                "adultos mayores",
                "tarifa inapam",
                "inapam",
                "seniors",
            ],
        }
    }
}

/// Canonical field name to the header synonyms that select it.
#[derive(Debug, Clone)]
pub struct FieldMap {
    entries: Vec<(PlaceField, Vec<String>)>,
}

impl Default for FieldMap {
    fn default() -> Self {
        let entries = PlaceField::ALL
            .into_iter()
            .map(|field| {
                let synonyms = field
                    .default_synonyms()
                    .iter()
                    .map(|synonym| normalize_header(synonym))
                    .collect();
                (field, synonyms)
            })
            .collect();
        Self { entries }
    }
}

impl FieldMap {
    pub fn with_synonyms<I, S>(mut self, field: PlaceField, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some((_, known)) = self.entries.iter_mut().find(|(entry, _)| *entry == field) {
            for synonym in synonyms {
                let normalized = normalize_header(synonym.as_ref());
                if !normalized.is_empty() && !known.contains(&normalized) {
                    known.push(normalized);
                }
            }
        }
        self
    }

    pub fn synonyms(&self, field: PlaceField) -> &[String] {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == field)
            .map(|(_, synonyms)| synonyms.as_slice())
            .unwrap_or(&[])
    }

    pub fn field_for_header(&self, header: &str) -> Option<PlaceField> {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(_, synonyms)| synonyms.contains(&normalized))
            .map(|(field, _)| *field)
    }

    /// Maps each column to a field; only the first column claiming a field keeps it.
    fn column_layout(&self, headers: &[String]) -> Vec<Option<PlaceField>> {
        let mut claimed = Vec::new();
        headers
            .iter()
            .map(|header| match self.field_for_header(header) {
                Some(field) if !claimed.contains(&field) => {
                    claimed.push(field);
                    Some(field)
                }
                _ => None,
            })
            .collect()
    }
}

/// One source record. Built once from a feed row and never modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub row: usize,
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub coordinates: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub contact: Option<String>,
    pub schedule_primary: Option<String>,
    pub schedule_secondary: Option<String>,
    pub fare_general: Option<String>,
    pub fare_students: Option<String>,
    pub fare_seniors: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl Place {
    pub fn has_location_data(&self) -> bool {
        self.address.is_some()
            || self.coordinates.is_some()
            || (self.latitude.is_some() && self.longitude.is_some())
    }

    pub fn field(&self, field: PlaceField) -> Option<&str> {
        let value = match field {
            PlaceField::Name => &self.name,
            PlaceField::Address => &self.address,
            PlaceField::Description => &self.description,
            PlaceField::Coordinates => &self.coordinates,
            PlaceField::Latitude => &self.latitude,
            PlaceField::Longitude => &self.longitude,
            PlaceField::Contact => &self.contact,
            PlaceField::SchedulePrimary => &self.schedule_primary,
            PlaceField::ScheduleSecondary => &self.schedule_secondary,
            PlaceField::FareGeneral => &self.fare_general,
            PlaceField::FareStudents => &self.fare_students,
            PlaceField::FareSeniors => &self.fare_seniors,
        };
        value.as_deref()
    }

    fn slot_mut(&mut self, field: PlaceField) -> &mut Option<String> {
        match field {
            PlaceField::Name => &mut self.name,
            PlaceField::Address => &mut self.address,
            PlaceField::Description => &mut self.description,
            PlaceField::Coordinates => &mut self.coordinates,
            PlaceField::Latitude => &mut self.latitude,
            PlaceField::Longitude => &mut self.longitude,
            PlaceField::Contact => &mut self.contact,
            PlaceField::SchedulePrimary => &mut self.schedule_primary,
            PlaceField::ScheduleSecondary => &mut self.schedule_secondary,
            PlaceField::FareGeneral => &mut self.fare_general,
            PlaceField::FareStudents => &mut self.fare_students,
            PlaceField::FareSeniors => &mut self.fare_seniors,
        }
    }

    fn is_blank(&self) -> bool {
        PlaceField::ALL.iter().all(|field| self.field(*field).is_none()) && self.extras.is_empty()
    }
}

pub fn parse_csv(bytes: &[u8], fields: &FieldMap) -> AppResult<Vec<Place>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    if headers.iter().all(|header| header.trim().is_empty()) {
        return Err(AppError::Parse("CSV feed has no header row".into()));
    }
    let layout = fields.column_layout(&headers);

    let mut places = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let mut place = Place {
            row: index + 1,
            ..Place::default()
        };
        for (column, cell) in record.iter().enumerate() {
            let Some(value) = clean_cell(cell) else {
                continue;
            };
            match layout.get(column).copied().flatten() {
                Some(field) => *place.slot_mut(field) = Some(value),
                None => {
                    place.extras.insert(format!("column_{}", column + 1), value);
                }
            }
        }
        if place.is_blank() {
            debug!(target: "feed", row = place.row, "skipping blank row");
            continue;
        }
        places.push(place);
    }
    Ok(places)
}

pub fn parse_json(bytes: &[u8], fields: &FieldMap) -> AppResult<Vec<Place>> {
    let rows = match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(rows) => rows,
        Value::Object(mut object) => JSON_ROW_KEYS
            .iter()
            .find_map(|key| match object.remove(*key) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            })
            .ok_or_else(|| AppError::Parse("JSON feed object holds no row array".into()))?,
        _ => return Err(AppError::Parse("JSON feed must be an array of rows".into())),
    };

    let mut places = Vec::new();
    for (index, row) in rows.into_iter().enumerate() {
        let Value::Object(object) = row else {
            debug!(target: "feed", row = index + 1, "skipping non-object JSON row");
            continue;
        };
        let mut place = Place {
            row: index + 1,
            ..Place::default()
        };
        for (key, value) in object {
            let Some(value) = json_cell(&value) else {
                continue;
            };
            match fields.field_for_header(&key) {
                Some(field) if place.field(field).is_none() => {
                    *place.slot_mut(field) = Some(value)
                }
                _ => {
                    place.extras.insert(key, value);
                }
            }
        }
        if place.is_blank() {
            debug!(target: "feed", row = place.row, "skipping blank row");
            continue;
        }
        places.push(place);
    }
    Ok(places)
}

/// Lowercases, folds Latin diacritics and collapses separators so that
/// `Dirección`, `direccion` and `DIRECCION_` compare equal.
pub fn normalize_header(header: &str) -> String {
    let folded = header
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '_' | '-' | '.' | ':' | '/' => ' ',
            other => fold_diacritic(other),
        })
        .collect::<String>();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

fn clean_cell(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => clean_cell(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
