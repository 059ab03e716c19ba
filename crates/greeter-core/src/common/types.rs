//! # Greeting request helpers and constants
//!
//! Both sides of the contract build requests the same way: the caller names
//! who to greet and optionally a locale, and an absent or blank locale falls
//! back to [`DEFAULT_LANGUAGE`].

use crate::proto::HelloRequest;

/// Locale used when a request carries no language.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Returns `language` unless it is absent or blank, in which case `fallback`.
pub fn resolve_language<'a>(language: Option<&'a str>, fallback: &'a str) -> &'a str {
    match language.map(str::trim) {
        Some(lang) if !lang.is_empty() => lang,
        _ => fallback,
    }
}

/// Builds a [`HelloRequest`], defaulting the language to [`DEFAULT_LANGUAGE`].
pub fn hello_request(name: impl Into<String>, language: Option<&str>) -> HelloRequest {
    hello_request_or(name, language, DEFAULT_LANGUAGE)
}

/// Builds a [`HelloRequest`], defaulting the language to `fallback`.
pub fn hello_request_or(
    name: impl Into<String>,
    language: Option<&str>,
    fallback: &str,
) -> HelloRequest {
    HelloRequest {
        name: name.into(),
        language: resolve_language(language, fallback).to_string(),
    }
}

/// Builds one [`HelloRequest`] per name, all sharing the same language.
///
/// Order is preserved: the n-th request greets the n-th name.
pub fn hello_requests_or<I, S>(
    names: I,
    language: Option<&str>,
    fallback: &str,
) -> Vec<HelloRequest>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let language = resolve_language(language, fallback);
    names
        .into_iter()
        .map(|name| HelloRequest {
            name: name.into(),
            language: language.to_string(),
        })
        .collect()
}
