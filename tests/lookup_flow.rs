mod common;

use common::{entity, person, FakeBackend};
use cr_lookup::config::LookupConfig;
use cr_lookup::dispatcher::SearchState;
use cr_lookup::models::{GeographyFilter, PersonType, QueryKind};
use cr_lookup::retry::RetryPolicy;
use cr_lookup::{ErrorKind, LookupEngine, LookupError};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_config() -> LookupConfig {
    LookupConfig {
        retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 2.0),
        ..Default::default()
    }
}

fn engine(backend: FakeBackend) -> (LookupEngine, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let engine = LookupEngine::with_backend(fast_config(), backend.clone());
    (engine, backend)
}

#[tokio::test]
async fn test_fisica_lookup_is_normalized_and_recorded() {
    let (engine, _) = engine(FakeBackend::new().with_record("123456789", person("123456789", "Ana", "Mora")));

    let result = engine.dispatcher().by_identifier(" 123456789 ", false).await.unwrap();

    assert!(result.is_found());
    assert_eq!(result.person_type(), Some(PersonType::Fisica));
    assert_eq!(result.display().unwrap().display_name, "Ana Mora");
    assert_eq!(engine.dispatcher().state(), SearchState::Success);

    let latest = engine.history().latest().unwrap();
    assert_eq!(latest.identifier, "123456789");
    assert_eq!(latest.query_kind, QueryKind::Cedula);
    assert!(latest.found);
    assert_eq!(latest.person_type, Some(PersonType::Fisica));
}

#[tokio::test]
async fn test_juridica_lookup() {
    let (engine, _) = engine(FakeBackend::new().with_record("3-101-629135", entity("3-101-629135", "Pulpería Central")));

    let result = engine.dispatcher().by_identifier("3-101-629135", false).await.unwrap();

    assert_eq!(result.person_type(), Some(PersonType::Juridica));
    assert_eq!(result.record().unwrap().identifier(), "3-101-629135");
}

#[tokio::test]
async fn test_unknown_identifier_never_reaches_backend() {
    let (engine, backend) = engine(FakeBackend::new());

    let err = engine.dispatcher().by_identifier("12-34", false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(backend.cedula_calls.load(Ordering::SeqCst), 0);
    assert!(engine.history().is_empty());
    assert_eq!(engine.dispatcher().state(), SearchState::Failure);
}

#[tokio::test]
async fn test_missing_record_is_not_found_with_message() {
    let (engine, _) = engine(FakeBackend::new());

    let result = engine.dispatcher().by_identifier("987654321", false).await.unwrap();

    assert!(!result.is_found());
    assert!(result.record().is_none());
    assert!(!result.message().unwrap().is_empty());
    assert!(!engine.history().latest().unwrap().found);
}

#[tokio::test]
async fn test_enrichment_is_merged_with_provenance() {
    let backend = FakeBackend::new()
        .with_record("123456789", person("123456789", "Ana", "Mora"))
        .with_external(
            "123456789",
            json!({
                "sources_consulted": ["TSE_Padron_Electoral", "Neodatos_API"],
                "data_found": {"TSE_Padron_Electoral": {"estado_civil": "casada"}},
                "errors": ["Neodatos_API: timeout"]
            }),
        );
    let (engine, _) = engine(backend);

    let result = engine.dispatcher().by_identifier("123456789", true).await.unwrap();
    let enrichment = result.enrichment().unwrap();

    assert_eq!(enrichment.sources_consulted, vec!["TSE_Padron_Electoral", "Neodatos_API"]);
    assert_eq!(enrichment.data_found["TSE_Padron_Electoral"]["estado_civil"], "casada");
    assert!(!enrichment.data_found.contains_key("Neodatos_API"));
    assert_eq!(enrichment.errors, vec!["Neodatos_API: timeout"]);
}

#[tokio::test]
async fn test_malformed_enrichment_is_server_error() {
    let backend = FakeBackend::new()
        .with_record("123456789", person("123456789", "Ana", "Mora"))
        .with_external("123456789", json!({"data_found": ["not", "an", "object"]}));
    let (engine, _) = engine(backend);

    let err = engine.dispatcher().by_identifier("123456789", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
}

#[tokio::test]
async fn test_network_failures_are_retried() {
    let backend = FakeBackend::new()
        .with_record("123456789", person("123456789", "Ana", "Mora"))
        .with_flaky("123456789", 2);
    let (engine, backend) = engine(backend);

    let result = engine.dispatcher().by_identifier("123456789", false).await.unwrap();

    assert!(result.is_found());
    assert_eq!(backend.cedula_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_network_retries_are_bounded() {
    let backend = FakeBackend::new().with_flaky("123456789", 10);
    let (engine, backend) = engine(backend);

    let err = engine.dispatcher().by_identifier("123456789", false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(backend.cedula_calls.load(Ordering::SeqCst), 3);
    assert!(!engine.history().latest().unwrap().found);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let backend = FakeBackend::new().with_failure("123456789", LookupError::Unauthorized("expired".into()));
    let (engine, backend) = engine(backend);

    let err = engine.dispatcher().by_identifier("123456789", false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(backend.cedula_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_lookup_is_not_recorded() {
    let backend = FakeBackend::new()
        .with_record("123456789", person("123456789", "Ana", "Mora"))
        .with_delay("123456789", Duration::from_secs(30));
    let (engine, _) = engine(backend);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let err = engine
        .dispatcher()
        .by_identifier_with_cancel("123456789", false, &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, LookupError::Cancelled);
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn test_phone_search_normalizes_number() {
    let backend = FakeBackend::new().with_list("88887777", vec![person("123456789", "Ana", "Mora")]);
    let (engine, _) = engine(backend);

    let results = engine.dispatcher().by_phone("+506 8888-7777").await.unwrap();

    assert_eq!(results.len(), 1);
    let latest = engine.history().latest().unwrap();
    assert_eq!(latest.query_kind, QueryKind::Telefono);
    assert_eq!(latest.person_type, Some(PersonType::Fisica));
}

#[tokio::test]
async fn test_phone_search_rejects_short_numbers() {
    let (engine, _) = engine(FakeBackend::new());
    let err = engine.dispatcher().by_phone("1234").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_name_search_skips_not_found_entries() {
    let backend = FakeBackend::new().with_list(
        "Ana Mora",
        vec![
            json!({"found": true, "type": "fisica", "data": person("123456789", "Ana", "Mora")}),
            json!({"found": false}),
            person("223456789", "Ana", "Mora"),
        ],
    );
    let (engine, _) = engine(backend);

    let results = engine.dispatcher().by_name("  Ana   Mora ").await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_found()));
}

#[tokio::test]
async fn test_name_search_empty_is_validation() {
    let (engine, _) = engine(FakeBackend::new());
    let err = engine.dispatcher().by_name("   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_geographic_search_filters_by_type() {
    let backend = FakeBackend::new().with_list(
        "1",
        vec![person("123456789", "Ana", "Mora"), entity("3-101-629135", "Pulpería Central")],
    );
    let (engine, backend) = engine(backend);
    let filter = GeographyFilter {
        provincia_id: Some("1".into()),
        person_type: Some(PersonType::Juridica),
        ..Default::default()
    };

    let results = engine.dispatcher().by_geography(&filter).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].person_type(), Some(PersonType::Juridica));
    assert_eq!(*backend.last_geo_filter.lock().unwrap(), Some(filter));
}

#[tokio::test]
async fn test_geographic_search_requires_a_filter() {
    let (engine, backend) = engine(FakeBackend::new());
    let err = engine
        .dispatcher()
        .by_geography(&GeographyFilter::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(backend.last_geo_filter.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_history_keeps_most_recent_entries() {
    let mut backend = FakeBackend::new();
    for i in 0..12 {
        let id = format!("1000000{:02}", i);
        backend = backend.with_record(&id, person(&id, "Ana", "Mora"));
    }
    let (engine, _) = engine(backend);

    for i in 0..12 {
        engine
            .dispatcher()
            .by_identifier(&format!("1000000{:02}", i), false)
            .await
            .unwrap();
    }

    let entries = engine.history().entries();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[0].identifier, "100000002");
    assert_eq!(engine.history().replay_candidates()[0], "100000011");
}

#[tokio::test]
async fn test_health_passes_through() {
    let (engine, _) = engine(FakeBackend::new());
    assert_eq!(engine.health().await.unwrap().status, "ok");
}

#[tokio::test]
async fn test_dropped_query_does_not_stick_in_dispatching() {
    let backend = FakeBackend::new()
        .with_record("123456789", person("123456789", "Ana", "Mora"))
        .with_delay("123456789", Duration::from_secs(30))
        .with_record("223456789", person("223456789", "Luis", "Solís"));
    let (engine, _) = engine(backend);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        engine.dispatcher().by_identifier("123456789", false),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(engine.dispatcher().state(), SearchState::Idle);
    assert!(engine.history().is_empty());

    engine.dispatcher().by_identifier("223456789", false).await.unwrap();
    assert_eq!(engine.dispatcher().state(), SearchState::Success);
}

#[tokio::test]
async fn test_state_returns_to_idle_after_reset() {
    let backend = FakeBackend::new().with_record("123456789", person("123456789", "Ana", "Mora"));
    let (engine, _) = engine(backend);
    assert_eq!(engine.dispatcher().state(), SearchState::Idle);

    engine.dispatcher().by_identifier("123456789", false).await.unwrap();
    assert_eq!(engine.dispatcher().state(), SearchState::Success);

    engine.dispatcher().reset_state();
    assert_eq!(engine.dispatcher().state(), SearchState::Idle);
}
