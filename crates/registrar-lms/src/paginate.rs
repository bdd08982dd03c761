//! Cursor-paginated reads.

use registrar_types::{LmsError, LmsMethod, LmsTransport};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
struct Page {
    results: Vec<serde_json::Value>,
    #[serde(default)]
    next: Option<String>,
}

/// One page of a cursor-paginated read and the status it came with.
#[derive(Debug, Clone, PartialEq)]
pub struct LmsPage {
    pub status: u16,
    pub results: Vec<serde_json::Value>,
}

/// Every page of a cursor-paginated endpoint, following `next` until it is null.
///
/// A 204 page ends the read. A non-2xx page whose status is not in `expected_error_codes`
/// fails it with [`LmsError::Status`]; a `next` link back to a page already read fails
/// it with [`LmsError::InvalidData`].
pub async fn get_all_paginated_responses(
    transport: &dyn LmsTransport,
    url: &str,
    expected_error_codes: &[u16],
) -> Result<Vec<LmsPage>, LmsError> {
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut next_url = Some(url.to_string());
    while let Some(current) = next_url.take() {
        if !visited.insert(current.clone()) {
            return Err(LmsError::InvalidData(format!(
                "pagination loops back to {}",
                current
            )));
        }
        let res = transport.send(LmsMethod::Get, &current, None).await?;
        if !res.is_success() && !expected_error_codes.contains(&res.status) {
            return Err(LmsError::Status {
                status: res.status,
                url: current,
            });
        }
        if res.status == 204 {
            pages.push(LmsPage {
                status: res.status,
                results: Vec::new(),
            });
            break;
        }
        let page: Page = serde_json::from_str(&res.body)
            .map_err(|e| LmsError::InvalidData(format!("unreadable page at {}: {}", current, e)))?;
        tracing::debug!(url = %current, status = res.status, count = page.results.len(), "read LMS page");
        pages.push(LmsPage {
            status: res.status,
            results: page.results,
        });
        next_url = page.next.filter(|n| !n.is_empty());
    }
    Ok(pages)
}

/// All results of a cursor-paginated endpoint; any non-2xx page fails the read.
pub async fn get_all_paginated_results(
    transport: &dyn LmsTransport,
    url: &str,
) -> Result<Vec<serde_json::Value>, LmsError> {
    let pages = get_all_paginated_responses(transport, url, &[]).await?;
    Ok(pages.into_iter().flat_map(|p| p.results).collect())
}
