//! Batch Orchestrator
//!
//! Bulk cedula lookups with a bounded worker pool. Results come back in input
//! order; one item failing never aborts its siblings.

use crate::dispatcher::QueryDispatcher;
use crate::error::{LookupError, Result};
use crate::models::{BatchItemResult, BatchReport, BatchSummary};
use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

pub const MAX_BATCH_SIZE: usize = 50;

/// Splits on newlines, commas and semicolons; trims, drops empties and
/// repeats (first occurrence wins). Oversize input is rejected whole.
pub fn parse_batch_input(text: &str) -> Result<Vec<String>> {
    prepare(text.split(|c: char| c == '\n' || c == '\r' || c == ',' || c == ';'))
}

fn prepare<'a, I>(raw: I) -> Result<Vec<String>>
where
    I: Iterator<Item = &'a str>,
{
    let identifiers: Vec<String> = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unique()
        .map(String::from)
        .collect();
    check_size(&identifiers)?;
    Ok(identifiers)
}

fn check_size(identifiers: &[String]) -> Result<()> {
    if identifiers.is_empty() {
        return Err(LookupError::Validation("batch contains no identifiers".to_string()));
    }
    if identifiers.len() > MAX_BATCH_SIZE {
        return Err(LookupError::Validation(format!(
            "batch has {} identifiers; the maximum is {}",
            identifiers.len(),
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

pub struct BatchOrchestrator {
    dispatcher: Arc<QueryDispatcher>,
    concurrency: usize,
    enrich: bool,
}

impl BatchOrchestrator {
    pub fn new(dispatcher: Arc<QueryDispatcher>, concurrency: usize) -> Self {
        Self {
            dispatcher,
            concurrency: concurrency.max(1),
            enrich: false,
        }
    }

    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(&self, text: &str) -> Result<BatchReport> {
        self.run_with_cancel(text, &CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, text: &str, cancel: &CancellationToken) -> Result<BatchReport> {
        let identifiers = parse_batch_input(text)?;
        self.execute(identifiers, cancel).await
    }

    /// Same as [`run`](Self::run) for callers that already hold a list.
    pub async fn run_identifiers(&self, identifiers: &[String], cancel: &CancellationToken) -> Result<BatchReport> {
        let identifiers = prepare(identifiers.iter().map(String::as_str))?;
        self.execute(identifiers, cancel).await
    }

    async fn execute(&self, identifiers: Vec<String>, cancel: &CancellationToken) -> Result<BatchReport> {
        let batch_id = Uuid::new_v4();
        let total = identifiers.len();
        info!(
            "Batch {} starting: {} identifiers, concurrency {}",
            batch_id, total, self.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut slots: Vec<Option<BatchItemResult>> = (0..total).map(|_| None).collect();
        let mut workers = JoinSet::new();

        for (index, identifier) in identifiers.iter().cloned().enumerate() {
            let permits = permits.clone();
            let dispatcher = self.dispatcher.clone();
            let cancel = cancel.clone();
            let enrich = self.enrich;

            workers.spawn(async move {
                let item = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        let outcome = dispatcher.lookup(&identifier, enrich, &cancel).await;
                        BatchItemResult::from_outcome(identifier, outcome)
                    }
                    Err(_) => BatchItemResult::failed(identifier, &LookupError::Cancelled),
                };
                (index, item)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, item)) => slots[index] = Some(item),
                Err(e) => error!("Batch {} worker aborted: {}", batch_id, e),
            }
        }

        let items: Vec<BatchItemResult> = slots
            .into_iter()
            .zip(identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or_else(|| {
                    BatchItemResult::failed(
                        identifier,
                        &LookupError::Server("batch worker aborted".to_string()),
                    )
                })
            })
            .collect();

        let summary = BatchSummary {
            total_requested: total,
            total_found: items.iter().filter(|i| i.found).count(),
            total_failed: items.iter().filter(|i| i.is_error()).count(),
        };
        info!(
            "Batch {} finished: {}/{} found, {} failed",
            batch_id, summary.total_found, summary.total_requested, summary.total_failed
        );

        Ok(BatchReport {
            batch_id,
            items,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_delimiters() {
        let ids = parse_batch_input("123456789\n 3-101-629135 ;not-a-number,\r\n\n,123456789").unwrap();
        assert_eq!(ids, vec!["123456789", "3-101-629135", "not-a-number"]);
    }

    #[test]
    fn test_fifty_is_accepted_fifty_one_is_rejected() {
        let fifty = (0..50).map(|i| format!("1000000{:02}", i)).join("\n");
        assert_eq!(parse_batch_input(&fifty).unwrap().len(), 50);

        let fifty_one = (0..51).map(|i| format!("1000000{:02}", i)).join(",");
        let err = parse_batch_input(&fifty_one).unwrap_err();
        assert!(matches!(err, LookupError::Validation(_)));
    }

    #[test]
    fn test_duplicates_do_not_count_against_limit() {
        let repeated = std::iter::repeat("123456789").take(80).join(";");
        assert_eq!(parse_batch_input(&repeated).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(parse_batch_input(" ,; \n").is_err());
    }
}
