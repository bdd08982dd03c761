//! Program details cache in front of the catalog client.

use crate::cache::{CacheLookup, TtlCache};
use crate::details::ProgramDetails;
use registrar_types::CatalogClient;
use std::sync::Arc;
use std::time::Duration;

/// How long catalog results (including "not found") stay cached.
pub const PROGRAM_CACHE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

/// Caches catalog payloads by program uuid.
///
/// A program the catalog cannot provide (404 or any error) is cached as empty, so
/// it is not fetched again until the entry expires or is invalidated.
pub struct ProgramDetailsCache {
    client: Arc<dyn CatalogClient>,
    cache: TtlCache<String, Arc<serde_json::Value>>,
    ttl: Duration,
}

impl ProgramDetailsCache {
    pub fn new(client: Arc<dyn CatalogClient>) -> Self {
        Self::with_ttl(client, PROGRAM_CACHE_TIMEOUT)
    }

    pub fn with_ttl(client: Arc<dyn CatalogClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(),
            ttl,
        }
    }

    /// Cached details for `program_uuid`, loading from the catalog on a miss.
    pub async fn get_program_details(&self, program_uuid: &str) -> ProgramDetails {
        let key = program_uuid.to_string();
        match self.cache.get(&key).await {
            CacheLookup::Found(data) => return ProgramDetails::new(program_uuid, data),
            CacheLookup::Empty => return ProgramDetails::empty(program_uuid),
            CacheLookup::Miss => {}
        }
        tracing::debug!(program_uuid = %program_uuid, "program details cache miss");
        match self.client.fetch_program(program_uuid).await {
            Ok(Some(data)) if data.is_object() => {
                let data = Arc::new(data);
                let details = ProgramDetails::new(program_uuid, Arc::clone(&data));
                if details.active_curriculum().is_none() {
                    tracing::warn!(
                        program_uuid = %program_uuid,
                        "catalog returned no active curricula for program"
                    );
                }
                self.cache.put(key, data, self.ttl).await;
                details
            }
            Ok(Some(_)) => {
                tracing::error!(program_uuid = %program_uuid, "catalog returned a non-object program payload");
                self.cache.put_empty(key, self.ttl).await;
                ProgramDetails::empty(program_uuid)
            }
            Ok(None) => {
                tracing::info!(program_uuid = %program_uuid, "program not found in catalog");
                self.cache.put_empty(key, self.ttl).await;
                ProgramDetails::empty(program_uuid)
            }
            Err(e) => {
                tracing::error!(
                    program_uuid = %program_uuid,
                    "failed to load program from catalog: {}",
                    e
                );
                self.cache.put_empty(key, self.ttl).await;
                ProgramDetails::empty(program_uuid)
            }
        }
    }

    /// Drop cached details for the given programs.
    pub async fn clear_cached_program_details<I, S>(&self, program_uuids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = program_uuids.into_iter().map(Into::into).collect();
        self.cache.invalidate(&keys).await;
    }
}
