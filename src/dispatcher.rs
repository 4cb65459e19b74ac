//! Query Dispatcher
//!
//! One entry point per search surface. Each call validates its input before
//! any I/O, performs one backend round trip (plus bounded retries for network
//! failures), normalizes the payload and records the query in the history.

use crate::backend::LookupBackend;
use crate::classifier;
use crate::enrichment;
use crate::error::{LookupError, Result};
use crate::history::SearchHistory;
use crate::models::{GeographyFilter, PersonType, QueryKind, UnifiedResult};
use crate::normalizer;
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interactive search lifecycle: `Idle → Dispatching → Success | Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchState {
    Idle,
    Dispatching,
    Success,
    Failure,
}

pub struct QueryDispatcher {
    backend: Arc<dyn LookupBackend>,
    retry: RetryPolicy,
    history: Arc<SearchHistory>,
    in_flight: AtomicUsize,
    last_outcome: Mutex<SearchState>,
}

/// Digits only, with the `506` country code removed. Costa Rican numbers have 8 digits.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = if digits.len() == 11 && digits.starts_with("506") {
        &digits[3..]
    } else {
        digits.as_str()
    };
    if local.len() != 8 {
        return Err(LookupError::Validation(format!(
            "'{}' is not a valid phone number (expected 8 digits)",
            raw.trim()
        )));
    }
    Ok(local.to_string())
}

fn normalize_name(raw: &str) -> Result<String> {
    let term = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if term.is_empty() {
        return Err(LookupError::Validation("name search term is empty".to_string()));
    }
    Ok(term)
}

impl QueryDispatcher {
    pub fn new(backend: Arc<dyn LookupBackend>, retry: RetryPolicy, history: Arc<SearchHistory>) -> Self {
        Self {
            backend,
            retry,
            history,
            in_flight: AtomicUsize::new(0),
            last_outcome: Mutex::new(SearchState::Idle),
        }
    }

    pub fn history(&self) -> &Arc<SearchHistory> {
        &self.history
    }

    /// `Dispatching` while any interactive query is in flight. Otherwise the
    /// outcome of the last finished query, which stays until the next query
    /// or [`reset_state`](Self::reset_state) moves it back to `Idle`. A query
    /// whose future is dropped before completing leaves the state `Idle`.
    pub fn state(&self) -> SearchState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return SearchState::Dispatching;
        }
        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reset_state(&self) {
        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()) = SearchState::Idle;
    }

    async fn track<T, Fut>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = InFlight::enter(self);
        let outcome = operation.await;
        guard.finish(if outcome.is_ok() {
            SearchState::Success
        } else {
            SearchState::Failure
        });
        outcome
    }

    /// Retries network failures; cancellation wins over everything.
    async fn round_trip<F, Fut, T>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(LookupError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
            outcome = self.retry.run(operation) => outcome,
        }
    }

    fn record<T>(&self, identifier: &str, kind: QueryKind, outcome: &Result<T>, found: impl Fn(&T) -> (bool, Option<PersonType>)) {
        match outcome {
            Ok(value) => {
                let (hit, person_type) = found(value);
                self.history.record(identifier, kind, hit, person_type);
            }
            // Never dispatched, or abandoned by the caller.
            Err(LookupError::Validation(_)) | Err(LookupError::Cancelled) => {}
            Err(_) => self.history.record(identifier, kind, false, None),
        }
    }

    fn record_list(&self, identifier: &str, kind: QueryKind, outcome: &Result<Vec<UnifiedResult>>) {
        self.record(identifier, kind, outcome, |results| {
            let person_type = match results.as_slice() {
                [only] => only.person_type(),
                _ => None,
            };
            (!results.is_empty(), person_type)
        });
    }

    /// Classify → fetch → normalize → merge, without touching history or state.
    pub(crate) async fn lookup(&self, raw: &str, enrich: bool, cancel: &CancellationToken) -> Result<UnifiedResult> {
        let query = classifier::route(raw)?;
        debug!("Dispatching {} lookup for {}", query.person_type, query.value);

        let response = self
            .round_trip(cancel, || self.backend.cedula(&query.value, enrich))
            .await?;

        let external = match (&response.external_data, enrich) {
            (Some(envelope), true) if response.found => Some(enrichment::parse_external_data(envelope)?),
            _ => None,
        };

        let result = normalizer::normalize_cedula(response)?;
        Ok(match external {
            Some(external) => enrichment::merge_external(result, external),
            None => result,
        })
    }

    pub async fn by_identifier(&self, raw: &str, enrich: bool) -> Result<UnifiedResult> {
        self.by_identifier_with_cancel(raw, enrich, &CancellationToken::new()).await
    }

    pub async fn by_identifier_with_cancel(
        &self,
        raw: &str,
        enrich: bool,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResult> {
        let outcome = self.track(self.lookup(raw, enrich, cancel)).await;
        match &outcome {
            Ok(result) if result.is_found() => info!("Cedula {} found ({:?})", raw.trim(), result.person_type()),
            Ok(_) => info!("Cedula {} not found", raw.trim()),
            Err(e) => warn!("Cedula lookup for {} failed: {}", raw.trim(), e),
        }
        self.record(raw, QueryKind::Cedula, &outcome, |r| (r.is_found(), r.person_type()));
        outcome
    }

    pub async fn by_phone(&self, phone: &str) -> Result<Vec<UnifiedResult>> {
        self.by_phone_with_cancel(phone, &CancellationToken::new()).await
    }

    pub async fn by_phone_with_cancel(&self, phone: &str, cancel: &CancellationToken) -> Result<Vec<UnifiedResult>> {
        let outcome = self
            .track(async {
                let phone = normalize_phone(phone)?;
                let response = self.round_trip(cancel, || self.backend.telefono(&phone)).await?;
                normalizer::normalize_list(&response.results)
            })
            .await;
        self.log_list("telefono", phone, &outcome);
        self.record_list(phone, QueryKind::Telefono, &outcome);
        outcome
    }

    pub async fn by_name(&self, fragment: &str) -> Result<Vec<UnifiedResult>> {
        self.by_name_with_cancel(fragment, &CancellationToken::new()).await
    }

    pub async fn by_name_with_cancel(&self, fragment: &str, cancel: &CancellationToken) -> Result<Vec<UnifiedResult>> {
        let outcome = self
            .track(async {
                let term = normalize_name(fragment)?;
                let response = self.round_trip(cancel, || self.backend.name(&term)).await?;
                normalizer::normalize_list(&response.results)
            })
            .await;
        self.log_list("nombre", fragment, &outcome);
        self.record_list(fragment, QueryKind::Nombre, &outcome);
        outcome
    }

    pub async fn by_geography(&self, filter: &GeographyFilter) -> Result<Vec<UnifiedResult>> {
        self.by_geography_with_cancel(filter, &CancellationToken::new()).await
    }

    pub async fn by_geography_with_cancel(
        &self,
        filter: &GeographyFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<UnifiedResult>> {
        let outcome = self
            .track(async {
                filter.validate()?;
                let response = self.round_trip(cancel, || self.backend.geografica(filter)).await?;
                let results = normalizer::normalize_list(&response.results)?;
                // The backend filters by type loosely; enforce it here.
                Ok(match filter.person_type {
                    Some(wanted) => results
                        .into_iter()
                        .filter(|r| r.person_type() == Some(wanted))
                        .collect(),
                    None => results,
                })
            })
            .await;
        let label = describe_filter(filter);
        self.log_list("geografica", &label, &outcome);
        self.record_list(&label, QueryKind::Geografica, &outcome);
        outcome
    }

    fn log_list(&self, surface: &str, term: &str, outcome: &Result<Vec<UnifiedResult>>) {
        match outcome {
            Ok(results) => info!("Search by {} '{}' returned {} results", surface, term.trim(), results.len()),
            Err(e) => warn!("Search by {} '{}' failed: {}", surface, term.trim(), e),
        }
    }
}

/// Counts one interactive query as in flight until dropped, including when
/// the caller drops the query future before it completes.
struct InFlight<'a> {
    dispatcher: &'a QueryDispatcher,
    outcome: Option<SearchState>,
}

impl<'a> InFlight<'a> {
    fn enter(dispatcher: &'a QueryDispatcher) -> Self {
        dispatcher.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            dispatcher,
            outcome: None,
        }
    }

    fn finish(&mut self, state: SearchState) {
        self.outcome = Some(state);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let state = self.outcome.unwrap_or(SearchState::Idle);
        *self
            .dispatcher
            .last_outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = state;
        self.dispatcher.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn describe_filter(filter: &GeographyFilter) -> String {
    let parts: Vec<String> = [
        filter.provincia_id.as_ref().map(|v| format!("provincia={}", v)),
        filter.canton_id.as_ref().map(|v| format!("canton={}", v)),
        filter.distrito_id.as_ref().map(|v| format!("distrito={}", v)),
        filter.person_type.map(|v| format!("tipo={}", v)),
        filter.sector.as_ref().map(|v| format!("sector={}", v)),
    ]
    .into_iter()
    .flatten()
    .collect();
    parts.join(" ")
}
