//! Program details from the course catalog, cached with a TTL.

mod cache;
mod client;
mod details;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod program_cache;

pub use cache::{CacheLookup, TtlCache};
pub use client::HttpCatalogClient;
pub use details::{CourseRun, ProgramDetails};
pub use program_cache::{ProgramDetailsCache, PROGRAM_CACHE_TIMEOUT};
pub use registrar_types::{CatalogClient, CatalogError};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockCatalogClient;
