#![allow(dead_code)]

use async_trait::async_trait;
use cr_lookup::backend::{CedulaResponse, HealthStatus, ListResponse, LookupBackend};
use cr_lookup::models::{GeographyFilter, LocationEntry};
use cr_lookup::{LookupError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// In-memory backend with scripted records, failures, delays and gates.
#[derive(Default)]
pub struct FakeBackend {
    records: HashMap<String, Value>,
    external: HashMap<String, Value>,
    failures: HashMap<String, LookupError>,
    flaky: Mutex<HashMap<String, usize>>,
    delays: HashMap<String, Duration>,
    list_results: HashMap<String, Vec<Value>>,
    provincias: Vec<LocationEntry>,
    cantones: HashMap<String, Vec<LocationEntry>>,
    distritos: HashMap<String, Vec<LocationEntry>>,
    gates: HashMap<String, Arc<Notify>>,
    pub fetch_started: Arc<Notify>,
    pub gated_fetches: AtomicUsize,
    pub cedula_calls: AtomicUsize,
    pub location_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub last_geo_filter: Mutex<Option<GeographyFilter>>,
}

pub fn person(cedula: &str, nombre: &str, primer_apellido: &str) -> Value {
    json!({
        "cedula": cedula,
        "nombre": nombre,
        "primer_apellido": primer_apellido,
        "provincia": "San José"
    })
}

pub fn entity(cedula_juridica: &str, nombre_comercial: &str) -> Value {
    json!({
        "cedula_juridica": cedula_juridica,
        "nombre_comercial": nombre_comercial,
        "razon_social": format!("{} S.A.", nombre_comercial),
        "sector_negocio": "comercio"
    })
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, id: &str, record: Value) -> Self {
        self.records.insert(id.to_string(), record);
        self
    }

    pub fn with_external(mut self, id: &str, envelope: Value) -> Self {
        self.external.insert(id.to_string(), envelope);
        self
    }

    pub fn with_failure(mut self, id: &str, error: LookupError) -> Self {
        self.failures.insert(id.to_string(), error);
        self
    }

    /// Fails with a network error `times` times, then behaves normally.
    pub fn with_flaky(self, id: &str, times: usize) -> Self {
        self.flaky.lock().unwrap().insert(id.to_string(), times);
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn with_list(mut self, key: &str, results: Vec<Value>) -> Self {
        self.list_results.insert(key.to_string(), results);
        self
    }

    pub fn with_provincias(mut self, entries: &[(&str, &str)]) -> Self {
        self.provincias = entries.iter().map(|(id, n)| LocationEntry::new(*id, *n)).collect();
        self
    }

    pub fn with_cantones(mut self, provincia: &str, entries: &[(&str, &str)]) -> Self {
        self.cantones.insert(
            provincia.to_string(),
            entries.iter().map(|(id, n)| LocationEntry::new(*id, *n)).collect(),
        );
        self
    }

    pub fn with_distritos(mut self, canton: &str, entries: &[(&str, &str)]) -> Self {
        self.distritos.insert(
            canton.to_string(),
            entries.iter().map(|(id, n)| LocationEntry::new(*id, *n)).collect(),
        );
        self
    }

    /// Holds the location fetch for `key` until the returned handle is notified.
    pub fn with_gate(mut self, key: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gates.insert(key.to_string(), gate.clone());
        (self, gate)
    }

    async fn wait_gate(&self, key: &str) {
        if let Some(gate) = self.gates.get(key) {
            let released = gate.notified();
            self.gated_fetches.fetch_add(1, Ordering::SeqCst);
            self.fetch_started.notify_one();
            released.await;
        }
    }

    fn list(&self, key: &str) -> ListResponse {
        ListResponse {
            results: self.list_results.get(key).cloned().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl LookupBackend for FakeBackend {
    async fn cedula(&self, id: &str, enrich: bool) -> Result<CedulaResponse> {
        self.cedula_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(id) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LookupError::Network("connection reset".into()));
                }
            }
        }
        if let Some(error) = self.failures.get(id) {
            return Err(error.clone());
        }
        match self.records.get(id) {
            Some(record) => Ok(CedulaResponse {
                found: true,
                person_type: None,
                data: Some(record.clone()),
                external_data: if enrich { self.external.get(id).cloned() } else { None },
                message: None,
            }),
            None => Ok(CedulaResponse::not_found(format!("Cédula {} no encontrada", id))),
        }
    }

    async fn telefono(&self, phone: &str) -> Result<ListResponse> {
        Ok(self.list(phone))
    }

    async fn name(&self, term: &str) -> Result<ListResponse> {
        if let Some(error) = self.failures.get(term) {
            return Err(error.clone());
        }
        Ok(self.list(term))
    }

    async fn geografica(&self, filter: &GeographyFilter) -> Result<ListResponse> {
        *self.last_geo_filter.lock().unwrap() = Some(filter.clone());
        Ok(self.list(filter.provincia_id.as_deref().unwrap_or("")))
    }

    async fn provincias(&self) -> Result<Vec<LocationEntry>> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.provincias.clone())
    }

    async fn cantones(&self, provincia_id: &str) -> Result<Vec<LocationEntry>> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate(provincia_id).await;
        match self.cantones.get(provincia_id) {
            Some(entries) => Ok(entries.clone()),
            None => Err(LookupError::Server(format!("no cantones for {}", provincia_id))),
        }
    }

    async fn distritos(&self, canton_id: &str) -> Result<Vec<LocationEntry>> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate(canton_id).await;
        Ok(self.distritos.get(canton_id).cloned().unwrap_or_default())
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            details: Default::default(),
        })
    }
}
