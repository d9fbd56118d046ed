//! URL helpers: site detection, content-URL shapes, normalization and
//! the (url, title) signatures used to de-duplicate stable titles.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::types::Site;

static KAKUYOMU_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/works/\d+/episodes/\d+/?$").expect("valid regex"));
static KAKUYOMU_TOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/works/\d+/?$").expect("valid regex"));
static HAMELN_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/novel/\d+(?:/\d+\.html|/?)$").expect("valid regex"));
static PIXIV_NOVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/novel/show\.php$").expect("valid regex"));
static NAROU_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/(n\d+[a-z]+)/(?:\d+/?)?$").expect("valid regex"));
static NAROU_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/(n\d+[a-z]+)(?:/(\d+)/?)?").expect("valid regex"));

const INTERNAL_PREFIXES: [&str; 5] = [
    "chrome-extension://",
    "moz-extension://",
    "about:",
    "chrome:",
    "edge:",
];

/// Collapse whitespace runs (including U+3000) into single spaces and trim.
pub fn clean(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Browser-internal pages are never tracked.
pub fn is_internal(url: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// Site the URL belongs to, if any.
pub fn site_of(url: &str) -> Option<Site> {
    let parsed = Url::parse(url).ok()?;
    Site::from_host(parsed.host_str()?)
}

/// True iff the URL path has the shape of a content page on a supported site.
pub fn is_candidate_url(url: &str) -> bool {
    if url.is_empty() || is_internal(url) {
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(site) = parsed.host_str().and_then(Site::from_host) else {
        return false;
    };
    let path = parsed.path();
    match site {
        Site::Kakuyomu => KAKUYOMU_EPISODE.is_match(path) || KAKUYOMU_TOP.is_match(path),
        Site::Hameln => HAMELN_PAGE.is_match(path),
        Site::Pixiv => PIXIV_NOVEL.is_match(path) && query_param(&parsed, "id").is_some(),
        Site::Narou => NAROU_PAGE.is_match(path),
    }
}

/// Canonical form: no fragment, sorted query, no trailing slash.
/// Unparseable input is returned unchanged.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let query = if pairs.is_empty() {
        String::new()
    } else {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("?{encoded}")
    };

    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    format!("{}{path}{query}", parsed.origin().ascii_serialization())
}

/// Same origin, path and query; only the fragment may differ.
pub fn same_page_ignoring_fragment(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin() && a.path() == b.path() && a.query() == b.query(),
        _ => false,
    }
}

/// Signature of a stable title: `normalize(url)::clean(title)`.
pub fn title_signature(url: &str, title: &str) -> String {
    format!("{}::{}", normalize_url(url), clean(title))
}

/// Pixiv novel id from `?id=`.
pub fn pixiv_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    query_param(&parsed, "id")
}

/// Narou work code (lowercased) and optional episode number.
pub fn narou_code(url: &str) -> Option<(String, Option<u32>)> {
    let parsed = Url::parse(url).ok()?;
    let caps = NAROU_CODE.captures(parsed.path())?;
    let code = caps.get(1)?.as_str().to_ascii_lowercase();
    let episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((code, episode))
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
