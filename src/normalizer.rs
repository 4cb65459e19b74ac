//! Result Normalizer
//!
//! Maps the two raw backend record shapes into [`UnifiedResult`]. The shape is
//! decided by the discriminating field: `cedula_juridica` means juridica,
//! `cedula` means fisica.

use crate::backend::CedulaResponse;
use crate::error::{LookupError, Result};
use crate::models::{EntityRecord, PersonRecord, PersonType, Record, UnifiedResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Shown for any optional field the backend did not return.
pub const NOT_AVAILABLE: &str = "No disponible";

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayField {
    pub label: &'static str,
    pub value: String,
}

/// Display-ready projection of a record. Every field is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayView {
    #[serde(rename = "type")]
    pub person_type: PersonType,
    pub identifier: String,
    pub display_name: String,
    pub telefono: String,
    pub email: String,
    pub direccion: String,
    pub provincia: String,
    pub canton: String,
    pub distrito: String,
    pub details: Vec<DisplayField>,
}

impl DisplayView {
    pub fn detail(&self, label: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
    }
}

/// Resolves the record variant from a raw backend payload.
pub fn parse_record(data: &Value) -> Result<Record> {
    let object = data
        .as_object()
        .ok_or_else(|| LookupError::Server(format!("record payload is not an object: {}", data)))?;

    if object.contains_key("cedula_juridica") {
        let entity: EntityRecord = serde_json::from_value(data.clone())?;
        Ok(Record::Entity(entity))
    } else if object.contains_key("cedula") {
        let person: PersonRecord = serde_json::from_value(data.clone())?;
        Ok(Record::Person(person))
    } else {
        Err(LookupError::Server(
            "record payload has neither 'cedula' nor 'cedula_juridica'".to_string(),
        ))
    }
}

pub fn normalize(data: &Value) -> Result<UnifiedResult> {
    parse_record(data).map(UnifiedResult::found)
}

pub fn normalize_cedula(response: CedulaResponse) -> Result<UnifiedResult> {
    if !response.found {
        return Ok(UnifiedResult::not_found(response.message.unwrap_or_default()));
    }
    let data = response
        .data
        .ok_or_else(|| LookupError::Server("found=true without data".to_string()))?;
    let result = normalize(&data)?;

    if let (Some(declared), Some(resolved)) = (response.person_type.as_deref(), result.person_type()) {
        if declared != resolved.as_str() {
            debug!(
                "Backend declared type '{}' but payload is {}; using payload shape",
                declared, resolved
            );
        }
    }
    Ok(result)
}

/// Normalizes list endpoints. Entries may be bare records or `{found, type, data}` envelopes.
pub fn normalize_list(results: &[Value]) -> Result<Vec<UnifiedResult>> {
    let mut normalized = Vec::with_capacity(results.len());
    for entry in results {
        if entry.get("found").and_then(Value::as_bool) == Some(false) {
            continue;
        }
        let data = match entry.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => entry,
        };
        normalized.push(normalize(data)?);
    }
    Ok(normalized)
}

/// `nombre primer_apellido segundo_apellido` with whitespace collapsed.
pub fn full_name(person: &PersonRecord) -> String {
    let joined = format!(
        "{} {} {}",
        person.nombre,
        person.primer_apellido,
        person.segundo_apellido.as_deref().unwrap_or("")
    );
    collapse_whitespace(&joined)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn or_placeholder(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn display_email(email: Option<&str>) -> String {
    match email.map(str::trim) {
        Some(e) if EMAIL_PATTERN.is_match(e) => e.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// `direccion, distrito, canton, provincia`, unless the address already names the provincia.
pub fn standardize_address(
    direccion: Option<&str>,
    provincia: Option<&str>,
    canton: Option<&str>,
    distrito: Option<&str>,
) -> String {
    let location: Vec<&str> = [distrito, canton, provincia]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let direccion = direccion.map(str::trim).filter(|d| !d.is_empty());
    match direccion {
        None if location.is_empty() => NOT_AVAILABLE.to_string(),
        None => location.join(", "),
        Some(d) => {
            let names_provincia = provincia
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| d.to_lowercase().contains(&p.to_lowercase()))
                .unwrap_or(true);
            if names_provincia || location.is_empty() {
                d.to_string()
            } else {
                format!("{}, {}", d, location.join(", "))
            }
        }
    }
}

pub fn display_view(record: &Record) -> DisplayView {
    match record {
        Record::Person(p) => DisplayView {
            person_type: PersonType::Fisica,
            identifier: p.cedula.clone(),
            display_name: full_name(p),
            telefono: or_placeholder(p.telefono.as_deref()),
            email: display_email(p.email.as_deref()),
            direccion: standardize_address(
                p.direccion_exacta.as_deref(),
                p.provincia.as_deref(),
                p.canton.as_deref(),
                p.distrito.as_deref(),
            ),
            provincia: or_placeholder(p.provincia.as_deref()),
            canton: or_placeholder(p.canton.as_deref()),
            distrito: or_placeholder(p.distrito.as_deref()),
            details: vec![
                DisplayField {
                    label: "ocupacion",
                    value: or_placeholder(p.ocupacion.as_deref()),
                },
                DisplayField {
                    label: "fecha_nacimiento",
                    value: or_placeholder(p.fecha_nacimiento.as_deref()),
                },
            ],
        },
        Record::Entity(e) => DisplayView {
            person_type: PersonType::Juridica,
            identifier: e.cedula_juridica.clone(),
            display_name: collapse_whitespace(&e.nombre_comercial),
            telefono: or_placeholder(e.telefono.as_deref()),
            email: display_email(e.email.as_deref()),
            direccion: standardize_address(
                e.direccion_exacta.as_deref(),
                e.provincia.as_deref(),
                e.canton.as_deref(),
                e.distrito.as_deref(),
            ),
            provincia: or_placeholder(e.provincia.as_deref()),
            canton: or_placeholder(e.canton.as_deref()),
            distrito: or_placeholder(e.distrito.as_deref()),
            details: vec![
                DisplayField {
                    label: "razon_social",
                    value: or_placeholder(Some(e.razon_social.as_str())),
                },
                DisplayField {
                    label: "sector_negocio",
                    value: or_placeholder(Some(e.sector_negocio.as_str())),
                },
                DisplayField {
                    label: "numero_empleados",
                    value: e
                        .numero_empleados
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                },
                DisplayField {
                    label: "website",
                    value: or_placeholder(e.website.as_deref()),
                },
                DisplayField {
                    label: "fecha_constitucion",
                    value: or_placeholder(e.fecha_constitucion.as_deref()),
                },
            ],
        },
    }
}
