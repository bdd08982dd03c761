//! Mock catalog client for tests: fixed payloads, no network.

use registrar_types::{CatalogClient, CatalogError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Catalog client serving programs from a map and counting fetches.
/// Unknown programs are "not found"; programs registered with `fail` return a 500.
#[derive(Default)]
pub struct MockCatalogClient {
    programs: HashMap<String, serde_json::Value>,
    failing: Vec<String>,
    fetches: AtomicUsize,
}

impl MockCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program_uuid: &str, data: serde_json::Value) -> Self {
        self.programs.insert(program_uuid.to_string(), data);
        self
    }

    pub fn fail(mut self, program_uuid: &str) -> Self {
        self.failing.push(program_uuid.to_string());
        self
    }

    /// Number of `fetch_program` calls made so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CatalogClient for MockCatalogClient {
    async fn fetch_program(
        &self,
        program_uuid: &str,
    ) -> Result<Option<serde_json::Value>, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|u| u == program_uuid) {
            return Err(CatalogError::Status(500));
        }
        Ok(self.programs.get(program_uuid).cloned())
    }
}
