//! Domain Models
//!
//! Record shapes returned by the lookup backend and the unified view built on
//! top of them.

use crate::enrichment::Enrichment;
use crate::error::{ErrorKind, LookupError, Result};
use crate::normalizer::{self, DisplayView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const DEFAULT_NOT_FOUND_MESSAGE: &str = "No se encontraron resultados para la consulta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonType {
    Fisica,
    Juridica,
}

impl PersonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonType::Fisica => "fisica",
            PersonType::Juridica => "juridica",
        }
    }
}

impl fmt::Display for PersonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical person as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub cedula: String,
    pub nombre: String,
    pub primer_apellido: String,
    #[serde(default)]
    pub segundo_apellido: Option<String>,
    #[serde(default)]
    pub telefono: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ocupacion: Option<String>,
    #[serde(default)]
    pub fecha_nacimiento: Option<String>,
    #[serde(default)]
    pub direccion_exacta: Option<String>,
    #[serde(default, alias = "provincia_nombre")]
    pub provincia: Option<String>,
    #[serde(default, alias = "canton_nombre")]
    pub canton: Option<String>,
    #[serde(default, alias = "distrito_nombre")]
    pub distrito: Option<String>,
}

/// Legal entity as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub cedula_juridica: String,
    pub nombre_comercial: String,
    pub razon_social: String,
    pub sector_negocio: String,
    #[serde(default)]
    pub numero_empleados: Option<u32>,
    #[serde(default)]
    pub telefono: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub fecha_constitucion: Option<String>,
    #[serde(default)]
    pub direccion_exacta: Option<String>,
    #[serde(default, alias = "provincia_nombre")]
    pub provincia: Option<String>,
    #[serde(default, alias = "canton_nombre")]
    pub canton: Option<String>,
    #[serde(default, alias = "distrito_nombre")]
    pub distrito: Option<String>,
}

/// A lookup record. The variant is decided once, by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Person(PersonRecord),
    Entity(EntityRecord),
}

impl Record {
    pub fn person_type(&self) -> PersonType {
        match self {
            Record::Person(_) => PersonType::Fisica,
            Record::Entity(_) => PersonType::Juridica,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Record::Person(p) => &p.cedula,
            Record::Entity(e) => &e.cedula_juridica,
        }
    }
}

/// Unified view over both record shapes.
///
/// `found == false` always carries a non-empty message and never a record;
/// the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedResult {
    found: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    person_type: Option<PersonType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<DisplayView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enrichment: Option<Enrichment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl UnifiedResult {
    pub fn found(record: Record) -> Self {
        let display = normalizer::display_view(&record);
        Self {
            found: true,
            person_type: Some(record.person_type()),
            record: Some(record),
            display: Some(display),
            enrichment: None,
            message: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            DEFAULT_NOT_FOUND_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            found: false,
            person_type: None,
            record: None,
            display: None,
            enrichment: None,
            message: Some(message),
        }
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn person_type(&self) -> Option<PersonType> {
        self.person_type
    }

    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn display(&self) -> Option<&DisplayView> {
        self.display.as_ref()
    }

    pub fn enrichment(&self) -> Option<&Enrichment> {
        self.enrichment.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub(crate) fn enrichment_mut(&mut self) -> Option<&mut Enrichment> {
        if !self.found {
            return None;
        }
        Some(self.enrichment.get_or_insert_with(Enrichment::default))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    Provincia,
    Canton,
    Distrito,
}

impl GeoLevel {
    pub fn parent(&self) -> Option<GeoLevel> {
        match self {
            GeoLevel::Provincia => None,
            GeoLevel::Canton => Some(GeoLevel::Provincia),
            GeoLevel::Distrito => Some(GeoLevel::Canton),
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            GeoLevel::Provincia => 0,
            GeoLevel::Canton => 1,
            GeoLevel::Distrito => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographicNode {
    pub id: String,
    pub nombre: String,
    pub level: GeoLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// `{id, nombre}` row from the `/locations` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub nombre: String,
}

impl LocationEntry {
    pub fn new(id: impl Into<String>, nombre: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nombre: nombre.into(),
        }
    }

    pub fn into_node(self, level: GeoLevel, parent_id: Option<&str>) -> GeographicNode {
        GeographicNode {
            id: self.id,
            nombre: self.nombre,
            level,
            parent_id: parent_id.map(String::from),
        }
    }
}

/// Location ids arrive as numbers from some deployments and strings from others.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Filter for `POST /search/geografica`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographyFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provincia_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canton_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distrito_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_type: Option<PersonType>,
    #[serde(rename = "business_sector", skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl GeographyFilter {
    pub fn is_empty(&self) -> bool {
        self.provincia_id.is_none()
            && self.canton_id.is_none()
            && self.distrito_id.is_none()
            && self.person_type.is_none()
            && self.sector.is_none()
    }

    /// Child ids without their parent cannot be resolved by the backend.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LookupError::Validation(
                "geographic search needs at least one filter".to_string(),
            ));
        }
        if self.canton_id.is_some() && self.provincia_id.is_none() {
            return Err(LookupError::Validation(
                "canton filter requires a provincia".to_string(),
            ));
        }
        if self.distrito_id.is_some() && self.canton_id.is_none() {
            return Err(LookupError::Validation(
                "distrito filter requires a canton".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemResult {
    pub identifier: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UnifiedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn from_outcome(identifier: String, outcome: Result<UnifiedResult>) -> Self {
        match outcome {
            Ok(result) if result.is_found() => Self {
                identifier,
                found: true,
                result: Some(result),
                error_kind: None,
                error: None,
            },
            Ok(result) => Self {
                identifier,
                found: false,
                error: result.message().map(String::from),
                result: None,
                error_kind: Some(ErrorKind::NotFound),
            },
            Err(e) => Self::failed(identifier, &e),
        }
    }

    pub fn failed(identifier: String, error: &LookupError) -> Self {
        Self {
            identifier,
            found: false,
            result: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }

    /// Failed for a reason other than "no match".
    pub fn is_error(&self) -> bool {
        matches!(self.error_kind, Some(kind) if kind != ErrorKind::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_requested: usize,
    pub total_found: usize,
    pub total_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: uuid::Uuid,
    pub items: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Cedula,
    Telefono,
    Nombre,
    Geografica,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHistoryEntry {
    pub identifier: String,
    pub query_kind: QueryKind,
    pub timestamp: DateTime<Utc>,
    pub found: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub person_type: Option<PersonType>,
}
