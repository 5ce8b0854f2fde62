//! URL normalization: ignored query parameters, directory indexes, cache keys.
//!
//! All functions are pure and work on the serialized query string, so
//! parameter names are compared in their percent-encoded form.

use regex::Regex;
use swcache_common::WorkerConfig;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Remove every query parameter whose name matches one of `ignore`.
///
/// Remaining parameters keep their order and exact encoding. A query left
/// empty is removed, so `?utm_source=x` becomes no query at all.
pub fn strip_ignored_parameters(url: &Url, ignore: &[Regex]) -> Url {
    let mut stripped = url.clone();
    let Some(query) = url.query() else {
        return stripped;
    };

    let kept = query
        .split('&')
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or_default();
            !ignore.iter().any(|pattern| pattern.is_match(name))
        })
        .collect::<Vec<_>>()
        .join("&");

    stripped.set_query(if kept.is_empty() { None } else { Some(&kept) });
    stripped
}

/// Append `index_file` to a path ending in `/`.
pub fn append_directory_index(url: &Url, index_file: &str) -> Url {
    let mut indexed = url.clone();
    if url.path().ends_with('/') {
        indexed.set_path(&format!("{}{}", url.path(), index_file));
    }
    indexed
}

/// Versioned cache key: `url` plus `param_name=param_value` in the query.
///
/// URLs matching `exclusion` are already versioned and are returned as-is.
pub fn create_cache_key(
    url: &Url,
    param_name: &str,
    param_value: &str,
    exclusion: Option<&Regex>,
) -> Url {
    if exclusion.is_some_and(|pattern| pattern.is_match(url.as_str())) {
        return url.clone();
    }

    let pair = format!(
        "{}={}",
        encode_uri_component(param_name),
        encode_uri_component(param_value)
    );
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{pair}"),
        _ => pair,
    };

    let mut key = url.clone();
    key.set_query(Some(&query));
    key
}

/// Percent-encode a query component, leaving the unreserved marks
/// `! ' ( ) *` literal as well as `- _ . ~`.
fn encode_uri_component(component: &str) -> String {
    const MARKS: [(&str, &str); 5] = [
        ("%21", "!"),
        ("%27", "'"),
        ("%28", "("),
        ("%29", ")"),
        ("%2A", "*"),
    ];

    let encoded = urlencoding::encode(component);
    if !encoded.contains('%') {
        return encoded.into_owned();
    }
    MARKS
        .iter()
        .fold(encoded.into_owned(), |acc, (escaped, mark)| acc.replace(escaped, mark))
}

/// Whether a navigation to `url` may use the SPA fallback: the path must
/// not match the denylist anywhere.
pub fn is_fallback_allowed(url: &Url, denylist: Option<&Regex>) -> bool {
    denylist.map_or(true, |pattern| !pattern.is_match(url.path()))
}

/// Compile a configured pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ServiceWorkerError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Compiled URL handling rules, built once from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct UrlRules {
    pub hash_param_name: String,
    pub ignore_parameters: Vec<Regex>,
    pub directory_index: Option<String>,
    /// Fallback document, already resolved against the worker location.
    pub navigate_fallback: Option<Url>,
    pub fallback_denylist: Option<Regex>,
    pub cache_bust_exclusion: Option<Regex>,
}

impl UrlRules {
    /// Compile the rules for a worker served from `location`.
    pub fn from_config(config: &WorkerConfig, location: &Url) -> Result<Self> {
        let ignore_parameters = config
            .ignore_url_parameters_matching
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>>>()?;

        let navigate_fallback = config
            .navigate_fallback
            .as_deref()
            .map(|fallback| location.join(fallback))
            .transpose()?;

        Ok(Self {
            hash_param_name: config.hash_param_name.clone(),
            ignore_parameters,
            directory_index: config.directory_index.clone(),
            navigate_fallback,
            fallback_denylist: config
                .navigate_fallback_denylist
                .as_deref()
                .map(compile_pattern)
                .transpose()?,
            cache_bust_exclusion: config
                .dont_cache_bust_urls_matching
                .as_deref()
                .map(compile_pattern)
                .transpose()?,
        })
    }

    /// Cache key for an absolute manifest URL.
    pub fn cache_key(&self, url: &Url, hash: &str) -> Url {
        create_cache_key(url, &self.hash_param_name, hash, self.cache_bust_exclusion.as_ref())
    }
}
