pub mod backend;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod geography;
pub mod history;
pub mod models;
pub mod normalizer;
pub mod retry;

pub use engine::LookupEngine;
pub use error::{ErrorKind, LookupError, Result};
