//! `Cookie` / `Set-Cookie` header handling.

use crate::config::CookieOptions;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};

/// Find the value of cookie `name` in the request's `Cookie` headers.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"').to_string())
}

/// Name of the cookie a `Set-Cookie` value sets.
pub fn set_cookie_name(value: &str) -> Option<&str> {
    value
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(name, _)| name.trim())
}

/// Render a `Set-Cookie` value for a live session cookie.
///
/// `Max-Age` is only emitted for persistent cookies.
pub fn render(options: &CookieOptions, value: &str, expires_at: DateTime<Utc>) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; HttpOnly; SameSite=Lax",
        options.name, value, options.path
    );
    if !options.insecure {
        cookie.push_str("; Secure");
    }
    if options.persist {
        let max_age = (expires_at - Utc::now()).num_seconds().max(0);
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    cookie
}

/// Render a `Set-Cookie` value that removes the session cookie.
pub fn render_removal(options: &CookieOptions) -> String {
    let mut cookie = format!(
        "{}=; Path={}; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax",
        options.name, options.path
    );
    if !options.insecure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Remove every `Set-Cookie` header that sets `name`.
pub fn remove_set_cookie(headers: &mut HeaderMap, name: &str) {
    let kept: Vec<HeaderValue> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter(|v| {
            v.to_str()
                .ok()
                .and_then(set_cookie_name)
                .is_none_or(|n| n != name)
        })
        .cloned()
        .collect();

    headers.remove(SET_COOKIE);
    for value in kept {
        headers.append(SET_COOKIE, value);
    }
}

/// Append a `Set-Cookie` header, replacing any earlier one for `name`.
pub fn replace_set_cookie(headers: &mut HeaderMap, name: &str, value: HeaderValue) {
    remove_set_cookie(headers, name);
    headers.append(SET_COOKIE, value);
}
