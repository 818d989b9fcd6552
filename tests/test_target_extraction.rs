/// Table-driven tests for prefill target extraction: header fallback,
/// whitespace trimming, deduplication, and sampling selection.
use axum::http::{HeaderMap, HeaderValue};
use pd_router_sidecar::proxy::targets::{candidates, select};
use pd_router_sidecar::proxy::{HEADER_PREFILLER_HOST_PORT, HEADER_PREFILLER_URL};

struct Case {
    name: &'static str,
    header: &'static str,
    values: &'static [&'static str],
    sampling: bool,
    expected_in: &'static [&'static str],
    expect_passthrough: bool,
}

fn headers_for(case: &Case) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for &value in case.values {
        headers.append(case.header, HeaderValue::from_static(value));
    }
    headers
}

#[test]
fn test_extraction_table() {
    let cases = [
        Case {
            name: "no header",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &[],
            sampling: false,
            expected_in: &[],
            expect_passthrough: true,
        },
        Case {
            name: "single target",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["a"],
            sampling: false,
            expected_in: &["a"],
            expect_passthrough: false,
        },
        Case {
            name: "list picks first without sampling",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["a,b"],
            sampling: false,
            expected_in: &["a"],
            expect_passthrough: false,
        },
        Case {
            name: "list samples with sampling",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["a,b"],
            sampling: true,
            expected_in: &["a", "b"],
            expect_passthrough: false,
        },
        Case {
            name: "whitespace trimmed",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &[" a, b"],
            sampling: true,
            expected_in: &["a", "b"],
            expect_passthrough: false,
        },
        Case {
            name: "duplicates collapse",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["a,a"],
            sampling: true,
            expected_in: &["a"],
            expect_passthrough: false,
        },
        Case {
            name: "repeated header occurrences",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["a", "b"],
            sampling: true,
            expected_in: &["a", "b"],
            expect_passthrough: false,
        },
        Case {
            name: "empty value",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &[""],
            sampling: true,
            expected_in: &[],
            expect_passthrough: true,
        },
        Case {
            name: "all values empty",
            header: HEADER_PREFILLER_HOST_PORT,
            values: &["", ""],
            sampling: true,
            expected_in: &[],
            expect_passthrough: true,
        },
        Case {
            name: "legacy header honored",
            header: HEADER_PREFILLER_URL,
            values: &["a"],
            sampling: false,
            expected_in: &["a"],
            expect_passthrough: false,
        },
    ];

    for case in &cases {
        let headers = headers_for(case);
        let found = candidates(&headers);

        // Selection is random under sampling; repeat enough times to reach
        // every expected candidate with overwhelming probability.
        let rounds = 1.max(case.expected_in.len() * 3);
        for _ in 0..rounds {
            match select(&found, case.sampling) {
                None => assert!(case.expect_passthrough, "{}: unexpected passthrough", case.name),
                Some(picked) => {
                    assert!(!case.expect_passthrough, "{}: expected passthrough", case.name);
                    assert!(
                        case.expected_in.contains(&picked.as_str()),
                        "{}: unexpected prefiller {picked}",
                        case.name
                    );
                }
            }
        }
    }
}

#[test]
fn test_sampling_eventually_reaches_every_target() {
    let mut headers = HeaderMap::new();
    headers.insert(
        HEADER_PREFILLER_HOST_PORT,
        HeaderValue::from_static("a,b,c"),
    );
    let found = candidates(&headers);

    let mut seen = std::collections::HashSet::new();
    for _ in 0..256 {
        seen.insert(select(&found, true).unwrap());
    }
    assert_eq!(seen.len(), 3);
}
