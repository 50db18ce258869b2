//! Start-up connectivity probe.
//!
//! Asks the fleet API for its robot registry once, before the monitor
//! starts, so the operator sees straight away whether the backend is up.

use std::time::Duration;

use robowatch_types::Robot;

/// Registry URL for an API rooted at `base_url`.
pub(crate) fn registry_url(base_url: &str) -> String {
    format!("{}/robots/", base_url.trim_end_matches('/'))
}

/// Fetch the registry and return how many robots are registered.
///
/// Returns `Err(reason)` when the API is unreachable, answers with a
/// non-success status, or sends something other than a robot list.
pub fn registry_size(base_url: &str, timeout: Duration) -> Result<usize, String> {
    let url = registry_url(base_url);
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let response = client
        .get(&url)
        .send()
        .map_err(|e| format!("Fleet API unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Fleet API returned HTTP {}", response.status()));
    }

    let robots: Vec<Robot> = response
        .json()
        .map_err(|e| format!("Failed to parse robot list: {}", e))?;

    Ok(robots.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_url_has_single_separator() {
        assert_eq!(registry_url("http://localhost:8000/api"), "http://localhost:8000/api/robots/");
        assert_eq!(registry_url("http://localhost:8000/api/"), "http://localhost:8000/api/robots/");
    }

    #[test]
    fn unreachable_api_is_reported() {
        // Port 9 (discard) is essentially never serving HTTP.
        let result = registry_size("http://127.0.0.1:9/api", Duration::from_millis(500));
        assert!(result.is_err());
    }
}
