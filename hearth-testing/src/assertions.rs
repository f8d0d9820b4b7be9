// Test assertions for session responses

use crate::TestResponse;
use http::StatusCode;
use std::collections::HashSet;

/// Assert that a response has a specific status code
pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    let actual = response.status();
    assert_eq!(
        actual, expected,
        "Expected status {}, got {}",
        expected, actual
    );
}

/// Assert that the body is exactly `expected`
pub fn assert_body(response: &TestResponse, expected: &str) {
    let body = response.body_string();
    assert_eq!(body, expected, "Unexpected response body");
}

/// Assert that a response has a specific header
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    let actual = response.header(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}

/// Assert that a response body contains a string
pub fn assert_body_contains(response: &TestResponse, expected: &str) {
    let body = response.body_string();
    assert!(
        body.contains(expected),
        "Expected body to contain '{}', but it didn't. Body: {}",
        expected,
        body
    );
}

/// Assert that a response is successful (2xx status)
pub fn assert_success(response: &TestResponse) {
    let status = response.status();
    assert!(
        status.is_success(),
        "Expected successful status (2xx), got {}",
        status
    );
}

/// Assert that no cookie name appears in more than one `Set-Cookie` header
pub fn assert_no_duplicate_cookies(response: &TestResponse) {
    let mut seen = HashSet::new();
    for cookie in response.set_cookies() {
        let name = cookie.split('=').next().unwrap_or_default().trim();
        assert!(
            seen.insert(name.to_string()),
            "Duplicate Set-Cookie for '{}' in {:?}",
            name,
            response.set_cookies()
        );
    }
}

/// Assert that the response sets (or removes) the cookie `name` exactly once
pub fn assert_sets_cookie(response: &TestResponse, name: &str) {
    let count = response.set_cookie_count(name);
    assert_eq!(
        count, 1,
        "Expected one Set-Cookie for '{}', got {}",
        name, count
    );
}

/// Assert that the response leaves the cookie `name` alone
pub fn assert_no_cookie(response: &TestResponse, name: &str) {
    let count = response.set_cookie_count(name);
    assert_eq!(
        count, 0,
        "Expected no Set-Cookie for '{}', got {:?}",
        name,
        response.set_cookies()
    );
}
