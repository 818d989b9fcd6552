//! Prefill target extraction from request headers.

use axum::http::HeaderMap;
use rand::Rng;

use super::{HEADER_PREFILLER_HOST_PORT, HEADER_PREFILLER_URL};

/// Collect prefiller candidates from the request headers.
///
/// Reads `x-prefiller-host-port`, falling back to the legacy
/// `x-prefiller-url` when the primary header is absent. Each header
/// occurrence may carry a comma-separated list. Entries are trimmed,
/// empties dropped, and duplicates removed preserving first-occurrence
/// order. An empty result means pass-through.
pub fn candidates(headers: &HeaderMap) -> Vec<String> {
    let mut values = headers.get_all(HEADER_PREFILLER_HOST_PORT);
    if values.iter().next().is_none() {
        values = headers.get_all(HEADER_PREFILLER_URL);
    }

    let mut targets: Vec<String> = Vec::new();
    for value in values.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for entry in value.split(',') {
            let entry = entry.trim();
            if entry.is_empty() || targets.iter().any(|t| t == entry) {
                continue;
            }
            targets.push(entry.to_string());
        }
    }

    targets
}

/// Select one target from the candidate list: a uniformly random pick when
/// sampling is enabled, the first entry otherwise.
pub fn select(candidates: &[String], sampling: bool) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let index = if sampling {
        rand::rng().random_range(0..candidates.len())
    } else {
        0
    };

    Some(candidates[index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_no_header_is_passthrough() {
        assert!(candidates(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn test_empty_values_are_passthrough() {
        assert!(candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, "")])).is_empty());
        assert!(candidates(&headers(&[
            (HEADER_PREFILLER_HOST_PORT, ""),
            (HEADER_PREFILLER_HOST_PORT, ""),
        ]))
        .is_empty());
        assert!(candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, " , ")])).is_empty());
    }

    #[test]
    fn test_single_value() {
        let got = candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, "a")]));
        assert_eq!(got, vec!["a"]);
    }

    #[test]
    fn test_comma_separated_with_whitespace() {
        let got = candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, " a, b")]));
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn test_repeated_header_occurrences() {
        let got = candidates(&headers(&[
            (HEADER_PREFILLER_HOST_PORT, "a"),
            (HEADER_PREFILLER_HOST_PORT, "b"),
        ]));
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn test_deduplication_preserves_order() {
        let got = candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, "a,a")]));
        assert_eq!(got, vec!["a"]);

        let got = candidates(&headers(&[(HEADER_PREFILLER_HOST_PORT, "b,a,b")]));
        assert_eq!(got, vec!["b", "a"]);
    }

    #[test]
    fn test_legacy_header_fallback() {
        let got = candidates(&headers(&[(HEADER_PREFILLER_URL, "legacy:8000")]));
        assert_eq!(got, vec!["legacy:8000"]);

        // The primary header wins when both are present.
        let got = candidates(&headers(&[
            (HEADER_PREFILLER_URL, "legacy:8000"),
            (HEADER_PREFILLER_HOST_PORT, "primary:8000"),
        ]));
        assert_eq!(got, vec!["primary:8000"]);
    }

    #[test]
    fn test_select_first_without_sampling() {
        let list = vec!["a".to_string(), "b".to_string()];
        for _ in 0..8 {
            assert_eq!(select(&list, false).as_deref(), Some("a"));
        }
    }

    #[test]
    fn test_select_sampling_stays_in_list() {
        let list = vec!["a".to_string(), "b".to_string()];
        for _ in 0..32 {
            let picked = select(&list, true).unwrap();
            assert!(list.contains(&picked));
        }
    }

    #[test]
    fn test_select_empty() {
        assert!(select(&[], false).is_none());
        assert!(select(&[], true).is_none());
    }
}
