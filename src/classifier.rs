//! Identifier Classifier
//!
//! Decides whether a raw cedula denotes a physical person or a legal entity.
//! Pure: no I/O, no state.

use crate::error::{LookupError, Result};
use crate::models::PersonType;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref FISICA_PATTERN: Regex = Regex::new(r"^\d{9}$").unwrap();
    static ref JURIDICA_PATTERN: Regex = Regex::new(r"^3-\d{3}-\d{6}$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Fisica,
    Juridica,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedQuery {
    pub kind: IdentifierKind,
    pub normalized_value: String,
}

/// A query that passed classification and may be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedQuery {
    pub person_type: PersonType,
    pub value: String,
}

/// Keeps only digits and dashes.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect()
}

pub fn classify(raw: &str) -> ClassifiedQuery {
    let normalized_value = sanitize(raw);
    let kind = if FISICA_PATTERN.is_match(&normalized_value) {
        IdentifierKind::Fisica
    } else if JURIDICA_PATTERN.is_match(&normalized_value) {
        IdentifierKind::Juridica
    } else {
        IdentifierKind::Unknown
    };
    ClassifiedQuery {
        kind,
        normalized_value,
    }
}

/// Classifies and rejects anything that is neither fisica nor juridica.
pub fn route(raw: &str) -> Result<RoutedQuery> {
    let query = classify(raw);
    let person_type = match query.kind {
        IdentifierKind::Fisica => PersonType::Fisica,
        IdentifierKind::Juridica => PersonType::Juridica,
        IdentifierKind::Unknown => {
            return Err(LookupError::Validation(format!(
                "'{}' is not a valid cedula (expected 9 digits or 3-XXX-XXXXXX)",
                raw.trim()
            )))
        }
    };
    Ok(RoutedQuery {
        person_type,
        value: query.normalized_value,
    })
}
