//! Enrichment Merger
//!
//! Layers named fragments from secondary sources (padrón electoral, registro
//! nacional, commercial data providers) onto a found result. Merging is keyed
//! by source: the same source twice keeps one entry, latest payload wins.

use crate::error::{LookupError, Result};
use crate::models::UnifiedResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentFragment {
    pub source: String,
    pub payload: Map<String, Value>,
}

impl EnrichmentFragment {
    pub fn new(source: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }
}

/// Provenance-tracked enrichment attached to a [`UnifiedResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Sources queried, in first-seen order, whether or not they returned data.
    pub sources_consulted: Vec<String>,
    pub data_found: BTreeMap<String, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Enrichment {
    fn mark_consulted(&mut self, source: &str) {
        if !self.sources_consulted.iter().any(|s| s == source) {
            self.sources_consulted.push(source.to_string());
        }
    }

    fn absorb(&mut self, fragment: EnrichmentFragment) {
        self.mark_consulted(&fragment.source);
        self.store(fragment);
    }

    fn store(&mut self, fragment: EnrichmentFragment) {
        self.data_found.insert(fragment.source, fragment.payload);
    }
}

/// Validated `external_data` envelope from `GET /search/cedula/{id}?enrich=true`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalData {
    pub sources_consulted: Vec<String>,
    pub fragments: Vec<EnrichmentFragment>,
    pub errors: Vec<String>,
}

fn malformed(detail: &str) -> LookupError {
    LookupError::Server(format!("malformed external_data envelope: {}", detail))
}

fn string_list(value: Option<&Value>, field: &str) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| malformed(&format!("'{}' must contain only strings", field)))
            })
            .collect(),
        Some(_) => Err(malformed(&format!("'{}' must be an array", field))),
    }
}

/// Checks the envelope shape before anything is merged.
pub fn parse_external_data(value: &Value) -> Result<ExternalData> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed("expected an object"))?;

    let sources_consulted = string_list(object.get("sources_consulted"), "sources_consulted")?;
    let errors = string_list(object.get("errors"), "errors")?;

    let fragments = match object.get("data_found") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(found)) => found
            .iter()
            .map(|(source, payload)| match payload {
                Value::Object(map) => Ok(EnrichmentFragment::new(source.clone(), map.clone())),
                _ => Err(malformed(&format!("payload for '{}' must be an object", source))),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(malformed("'data_found' must be an object")),
    };

    Ok(ExternalData {
        sources_consulted,
        fragments,
        errors,
    })
}

/// Merges fragments into a found result. Results with `found == false` pass through untouched.
pub fn merge<I>(mut result: UnifiedResult, fragments: I) -> UnifiedResult
where
    I: IntoIterator<Item = EnrichmentFragment>,
{
    if let Some(enrichment) = result.enrichment_mut() {
        for fragment in fragments {
            enrichment.absorb(fragment);
        }
    }
    result
}

/// Merges a whole envelope. The envelope's `sources_consulted` is the
/// provenance; `data_found` keys are only added to it when the envelope names
/// no sources at all.
pub fn merge_external(mut result: UnifiedResult, external: ExternalData) -> UnifiedResult {
    if let Some(enrichment) = result.enrichment_mut() {
        if external.sources_consulted.is_empty() {
            for fragment in external.fragments {
                enrichment.absorb(fragment);
            }
        } else {
            for source in &external.sources_consulted {
                enrichment.mark_consulted(source);
            }
            for fragment in external.fragments {
                enrichment.store(fragment);
            }
        }
        for error in external.errors {
            if !enrichment.errors.contains(&error) {
                enrichment.errors.push(error);
            }
        }
    }
    result
}
