//! Site metadata resolution: (url, title) → [`ContentIdentity`].
//!
//! Dispatches on hostname to one parser per site. URL shape decides
//! whether a page *could* be content; the title (or, for Narou, the
//! catalog entry) supplies work/episode/author. Ambiguity is expressed
//! through the certificate, never through an error.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::ResolveError;
use crate::types::{CatalogInfo, ContentIdentity, Site};
use crate::urls::{clean, narou_code, pixiv_id};

static PIXIV_NUMBERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(\d+)\s+(.+?)\s*\|\s*(.+?)(?:\s*[-–—]\s*.+)?$").expect("valid regex")
});
static PIXIV_NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\d+\s+").expect("valid regex"));
static PIXIV_PIPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*\|\s*(.+?)(?:\s*[-–—]\s*.+)?$").expect("valid regex"));
static PIXIV_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*[-–—]\s*.+$").expect("valid regex"));
static PIXIV_AUTHOR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-–—]\s*[^-–—]*?の小説\s*[-–—]\s*pixiv\s*$").expect("valid regex")
});
static PIXIV_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[-–—]\s*pixiv\s*$").expect("valid regex"));

static HAMELN_GENERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ハーメルン\s*-\s*SS･小説投稿サイト-?$").expect("valid regex"));
static HAMELN_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-\s*ハーメルン$").expect("valid regex"));
static HAMELN_SERIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/novel/\d+/\d+\.html$").expect("valid regex"));
static HAMELN_TOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/novel/\d+/?$").expect("valid regex"));

static KAKUYOMU_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-\s*カクヨム$").expect("valid regex"));
static KAKUYOMU_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/works/\d+/episodes/\d+/?$").expect("valid regex"));
static KAKUYOMU_TOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/works/\d+/?$").expect("valid regex"));
static WORK_AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)（(.*)）$").expect("valid regex"));

static DASH_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+-\s+").expect("valid regex"));

/// Resolve the content identity of a page.
///
/// `catalog` is only consulted for Narou pages; `None` there means the
/// lookup is pending or failed and yields a URL-only certificate.
pub fn resolve(
    url: &str,
    title: &str,
    catalog: Option<&CatalogInfo>,
) -> Result<ContentIdentity, ResolveError> {
    if url.is_empty() {
        return Ok(ContentIdentity::none(None));
    }
    let parsed = Url::parse(url).map_err(|e| ResolveError::InvalidUrl {
        url: url.to_string(),
        detail: e.to_string(),
    })?;
    let Some(site) = parsed.host_str().and_then(Site::from_host) else {
        return Ok(ContentIdentity::none(None));
    };

    Ok(match site {
        Site::Pixiv => parse_pixiv(&parsed, url, title),
        Site::Narou => parse_narou(url, title, catalog),
        Site::Kakuyomu => parse_kakuyomu(&parsed, title),
        Site::Hameln => parse_hameln(&parsed, title),
    })
}

/// Narou work code whose catalog entry `resolve` needs for this URL.
pub fn catalog_code(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.host_str().and_then(Site::from_host) != Some(Site::Narou) {
        return None;
    }
    narou_code(url).map(|(code, _)| code)
}

/// Whether the identity fields embedded in `url` agree with `meta`.
///
/// Pixiv ids and Narou codes must match; other sites only need the site.
pub fn meta_matches_url(meta: &ContentIdentity, url: &str) -> bool {
    let Some(site) = crate::urls::site_of(url) else {
        return false;
    };
    if meta.site != Some(site) {
        return false;
    }
    match site {
        Site::Pixiv => match (pixiv_id(url), meta.site_id.as_deref()) {
            (Some(in_url), Some(in_meta)) => in_url == in_meta,
            _ => false,
        },
        Site::Narou => match (narou_code(url), meta.site_id.as_deref()) {
            (Some((in_url, _)), Some(in_meta)) => in_url.eq_ignore_ascii_case(in_meta),
            _ => false,
        },
        Site::Kakuyomu | Site::Hameln => true,
    }
}

// ─── Pixiv ────────────────────────────────────────────────────────

fn strip_pixiv_leading_tags(raw: &str) -> String {
    let mut rest = raw.trim();
    loop {
        let Some(tag) = rest.strip_prefix('#') else {
            break;
        };
        let token_end = tag.find(char::is_whitespace).unwrap_or(tag.len());
        let token = &tag[..token_end];
        // "#12 Title" is an episode number, not a tag.
        if token.is_empty() || token.chars().all(|c| c.is_ascii_digit()) {
            break;
        }
        rest = tag[token_end..].trim_start();
    }
    rest.to_string()
}

fn parse_pixiv(parsed: &Url, url: &str, raw_title: &str) -> ContentIdentity {
    let site = Site::Pixiv;
    let is_novel = parsed.path().eq_ignore_ascii_case("/novel/show.php");
    let id = pixiv_id(url);
    if !is_novel || id.is_none() {
        return ContentIdentity::none(Some(site));
    }

    let raw = raw_title.trim();
    if raw.is_empty() || raw.to_ascii_lowercase().starts_with("[pixiv]") || raw.contains("ローディング中")
    {
        return ContentIdentity::url_only(site, true).with_site_id(id);
    }

    if let Some(c) = PIXIV_NUMBERED.captures(raw) {
        let episode = format!("#{} {}", &c[1], clean(&c[2]));
        return ContentIdentity::titled(site, true, clean(&c[3]), episode, "").with_site_id(id);
    }

    let stripped = strip_pixiv_leading_tags(raw);
    let stripped = PIXIV_AUTHOR_SUFFIX.replace(&stripped, "");
    let s = PIXIV_SUFFIX.replace(&stripped, "").trim().to_string();

    if !PIXIV_NUMBER_PREFIX.is_match(&s)
        && let Some(c) = PIXIV_PIPE.captures(&s)
    {
        return ContentIdentity::titled(site, true, clean(&c[2]), clean(&c[1]), "").with_site_id(id);
    }
    if let Some(c) = PIXIV_DASH.captures(&s) {
        let title = clean(&c[1]);
        return ContentIdentity::titled(site, true, title.clone(), title, "").with_site_id(id);
    }
    let title = clean(&s);
    if title.is_empty() {
        return ContentIdentity::url_only(site, true).with_site_id(id);
    }
    ContentIdentity::titled(site, true, title.clone(), title, "").with_site_id(id)
}

// ─── Hameln ───────────────────────────────────────────────────────

fn parse_hameln(parsed: &Url, title: &str) -> ContentIdentity {
    let site = Site::Hameln;
    let path = parsed.path();
    let is_serial = HAMELN_SERIAL.is_match(path);
    let is_top = HAMELN_TOP.is_match(path);
    if HAMELN_GENERIC.is_match(title.trim()) {
        return ContentIdentity::none(Some(site));
    }

    let trimmed = HAMELN_SUFFIX.replace(title, "");
    let parts = split_dashes(trimmed.trim());
    let work = parts.first().cloned().unwrap_or_default();
    let episode = parts.get(1).cloned().unwrap_or_default();

    if is_serial {
        if !work.is_empty() && !episode.is_empty() {
            return ContentIdentity::titled(site, true, work, episode, "");
        }
        return ContentIdentity::url_only(site, false);
    }
    if is_top {
        if parts.len() >= 2 {
            return ContentIdentity::titled(site, true, work, episode, "");
        }
        if work.is_empty() {
            return ContentIdentity::none(Some(site));
        }
        return ContentIdentity::titled(site, false, work, "", "");
    }
    ContentIdentity::none(Some(site))
}

// ─── Kakuyomu ─────────────────────────────────────────────────────

fn split_work_author(s: &str) -> (String, String) {
    let s = s.trim();
    match WORK_AUTHOR.captures(s) {
        Some(c) => (clean(&c[1]), clean(&c[2])),
        None => (clean(s), String::new()),
    }
}

fn parse_kakuyomu(parsed: &Url, title: &str) -> ContentIdentity {
    let site = Site::Kakuyomu;
    let path = parsed.path();
    let is_episode = KAKUYOMU_EPISODE.is_match(path);
    let is_top = KAKUYOMU_TOP.is_match(path);

    // Before the document title loads the tab shows the bare URL.
    let t = title.trim();
    if t.starts_with("http://") || t.starts_with("https://") || t.starts_with("kakuyomu.jp/") {
        return if is_episode {
            ContentIdentity::url_only(site, true)
        } else {
            ContentIdentity::none(Some(site))
        };
    }

    let stripped = KAKUYOMU_SUFFIX.replace(t, "");
    let parts = split_dashes(stripped.trim());

    if is_episode {
        let subtitle = parts.first().cloned().unwrap_or_default();
        let (work, author) = split_work_author(parts.get(1).map(String::as_str).unwrap_or(""));
        if subtitle.is_empty() || work.is_empty() {
            return ContentIdentity::url_only(site, true);
        }
        return ContentIdentity::titled(site, true, work, subtitle, author);
    }
    if is_top {
        let (work, author) = split_work_author(parts.first().map(String::as_str).unwrap_or(""));
        if work.is_empty() {
            return ContentIdentity::none(Some(site));
        }
        return ContentIdentity::titled(site, false, work, "", author);
    }
    ContentIdentity::none(Some(site))
}

// ─── Narou ────────────────────────────────────────────────────────

fn parse_narou(url: &str, title: &str, catalog: Option<&CatalogInfo>) -> ContentIdentity {
    let site = Site::Narou;
    let Some((code, episode_no)) = narou_code(url) else {
        return ContentIdentity::none(Some(site));
    };
    let episode_label = episode_no.map(|n| format!("第{n}話"));

    match catalog {
        Some(info) => {
            let work = clean(&info.title);
            let author = clean(&info.writer);
            let is_short = info.is_short_story();
            let episode = match (&episode_label, is_short) {
                (Some(label), _) => label.clone(),
                (None, true) => work.clone(),
                (None, false) => String::new(),
            };
            // The top page of a serialized work is its table of contents.
            let is_content = episode_no.is_some() || is_short;
            ContentIdentity::titled(site, is_content, work, episode, author).with_site_id(Some(code))
        }
        None => ContentIdentity {
            work_title: clean(title),
            episode_title: episode_label.unwrap_or_default(),
            ..ContentIdentity::url_only(site, false)
        }
        .with_site_id(Some(code)),
    }
}

fn split_dashes(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    DASH_SEPARATOR.split(s).map(clean).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Certificate;

    const PIXIV_URL: &str = "https://www.pixiv.net/novel/show.php?id=998877";
    const NAROU_EP_URL: &str = "https://ncode.syosetu.com/n1234ab/5/";
    const NAROU_TOP_URL: &str = "https://ncode.syosetu.com/n1234ab/";

    fn catalog(noveltype: u8) -> CatalogInfo {
        CatalogInfo {
            title: " 転生した 件 ".into(),
            writer: "作者A".into(),
            noveltype,
        }
    }

    // ── 1. Unsupported and malformed ────────────────────────────────

    #[test]
    fn unsupported_host_is_none() {
        let meta = resolve("https://example.com/a", "Hello", None).expect("resolves");
        assert_eq!(meta.certificate, Certificate::None);
        assert!(!meta.is_content);
        assert!(meta.site.is_none());
    }

    #[test]
    fn malformed_url_is_an_error() {
        let err = resolve("http://[::1", "x", None).expect_err("invalid url");
        assert!(matches!(err, ResolveError::InvalidUrl { .. }));
    }

    #[test]
    fn empty_url_is_none() {
        let meta = resolve("", "New Tab", None).expect("resolves");
        assert_eq!(meta, ContentIdentity::none(None));
    }

    // ── 2. Pixiv ────────────────────────────────────────────────────

    #[test]
    fn pixiv_numbered_series_title() {
        let meta = resolve(PIXIV_URL, "#3 決戦前夜 | 星の海 - pixiv", None).expect("resolves");
        assert_eq!(meta.certificate, Certificate::Title);
        assert_eq!(meta.episode_title, "#3 決戦前夜");
        assert_eq!(meta.work_title, "星の海");
        assert_eq!(meta.site_id.as_deref(), Some("998877"));
    }

    #[test]
    fn pixiv_pipe_title() {
        let meta = resolve(PIXIV_URL, "Chapter 3 | My Novel - pixiv", None).expect("resolves");
        assert!(meta.is_billable());
        assert_eq!(meta.episode_title, "Chapter 3");
        assert_eq!(meta.work_title, "My Novel");
    }

    #[test]
    fn pixiv_accepts_long_dash_suffixes() {
        for title in ["Chapter 3 | My Novel — pixiv", "Chapter 3 | My Novel – pixiv"] {
            let meta = resolve(PIXIV_URL, title, None).expect("resolves");
            assert_eq!(meta.episode_title, "Chapter 3", "title {title:?}");
            assert_eq!(meta.work_title, "My Novel", "title {title:?}");
        }
        let meta = resolve(PIXIV_URL, "Chapter 3 | My Novel — Site", None).expect("resolves");
        assert_eq!(meta.work_title, "My Novel");

        let meta = resolve(PIXIV_URL, "孤独な灯台 — 山田の小説 — pixiv", None).expect("resolves");
        assert_eq!(meta.work_title, "孤独な灯台");
        assert_eq!(meta.episode_title, "孤独な灯台");
    }

    #[test]
    fn pixiv_strips_leading_tags_and_author_suffix() {
        let meta = resolve(PIXIV_URL, "#オリジナル #R-15 孤独な灯台 - 山田の小説 - pixiv", None)
            .expect("resolves");
        assert_eq!(meta.certificate, Certificate::Title);
        assert_eq!(meta.work_title, "孤独な灯台");
        assert_eq!(meta.episode_title, "孤独な灯台");
    }

    #[test]
    fn pixiv_placeholders_are_url_only() {
        for title in ["", "[pixiv]", "ローディング中"] {
            let meta = resolve(PIXIV_URL, title, None).expect("resolves");
            assert_eq!(meta.certificate, Certificate::Url, "title {title:?}");
            assert!(meta.is_content);
            assert!(!meta.is_billable());
        }
    }

    #[test]
    fn pixiv_non_novel_page_is_none() {
        let meta = resolve("https://www.pixiv.net/artworks/5", "Art - pixiv", None).expect("ok");
        assert_eq!(meta.certificate, Certificate::None);
        assert_eq!(meta.site, Some(Site::Pixiv));
    }

    // ── 3. Hameln ───────────────────────────────────────────────────

    #[test]
    fn hameln_serial_episode() {
        let meta = resolve(
            "https://syosetu.org/novel/12345/3.html",
            "異世界食堂 - 第三話 ランチ - ハーメルン",
            None,
        )
        .expect("resolves");
        assert!(meta.is_billable());
        assert_eq!(meta.work_title, "異世界食堂");
        assert_eq!(meta.episode_title, "第三話 ランチ");
    }

    #[test]
    fn hameln_serial_without_episode_is_url_only() {
        let meta = resolve("https://syosetu.org/novel/12345/3.html", "異世界食堂 - ハーメルン", None)
            .expect("resolves");
        assert_eq!(meta.certificate, Certificate::Url);
        assert!(!meta.is_content);
    }

    #[test]
    fn hameln_top_page_variants() {
        let index = resolve("https://syosetu.org/novel/12345/", "異世界食堂 - ハーメルン", None)
            .expect("resolves");
        assert_eq!(index.certificate, Certificate::Title);
        assert!(!index.is_content);

        let short = resolve(
            "https://syosetu.org/novel/777/",
            "短編集 - 雨の日 - ハーメルン",
            None,
        )
        .expect("resolves");
        assert!(short.is_billable());
    }

    #[test]
    fn hameln_generic_title_is_none() {
        let meta = resolve(
            "https://syosetu.org/novel/12345/3.html",
            "ハーメルン - SS･小説投稿サイト-",
            None,
        )
        .expect("resolves");
        assert_eq!(meta.certificate, Certificate::None);
    }

    // ── 4. Kakuyomu ─────────────────────────────────────────────────

    #[test]
    fn kakuyomu_episode_with_author() {
        let meta = resolve(
            "https://kakuyomu.jp/works/1177354054/episodes/1177354099",
            "第1話 はじまり - 魔王の休日（佐藤） - カクヨム",
            None,
        )
        .expect("resolves");
        assert!(meta.is_billable());
        assert_eq!(meta.episode_title, "第1話 はじまり");
        assert_eq!(meta.work_title, "魔王の休日");
        assert_eq!(meta.author, "佐藤");
    }

    #[test]
    fn kakuyomu_url_title_is_url_only() {
        let meta = resolve(
            "https://kakuyomu.jp/works/1/episodes/2",
            "kakuyomu.jp/works/1/episodes/2",
            None,
        )
        .expect("resolves");
        assert_eq!(meta.certificate, Certificate::Url);
        assert!(meta.is_content);
    }

    #[test]
    fn kakuyomu_top_is_not_content() {
        let meta = resolve("https://kakuyomu.jp/works/1", "魔王の休日（佐藤） - カクヨム", None)
            .expect("resolves");
        assert_eq!(meta.certificate, Certificate::Title);
        assert!(!meta.is_content);
        assert_eq!(meta.author, "佐藤");
    }

    // ── 5. Narou ────────────────────────────────────────────────────

    #[test]
    fn narou_episode_uses_catalog_and_url_number() {
        let info = catalog(1);
        let meta = resolve(NAROU_EP_URL, "whatever", Some(&info)).expect("resolves");
        assert!(meta.is_billable());
        assert_eq!(meta.work_title, "転生した 件");
        assert_eq!(meta.episode_title, "第5話");
        assert_eq!(meta.author, "作者A");
        assert_eq!(meta.site_id.as_deref(), Some("n1234ab"));
    }

    #[test]
    fn narou_short_story_top_is_content() {
        let info = catalog(2);
        let meta = resolve(NAROU_TOP_URL, "x", Some(&info)).expect("resolves");
        assert!(meta.is_billable());
        assert_eq!(meta.episode_title, meta.work_title);
    }

    #[test]
    fn narou_serial_top_is_index() {
        let info = catalog(1);
        let meta = resolve(NAROU_TOP_URL, "x", Some(&info)).expect("resolves");
        assert_eq!(meta.certificate, Certificate::Title);
        assert!(!meta.is_content);
    }

    #[test]
    fn narou_without_catalog_falls_back_to_url() {
        let meta = resolve(NAROU_EP_URL, "転生した件 - 第5話", None).expect("resolves");
        assert_eq!(meta.certificate, Certificate::Url);
        assert!(!meta.is_billable());
        assert_eq!(meta.episode_title, "第5話");
        assert_eq!(catalog_code(NAROU_EP_URL).as_deref(), Some("n1234ab"));
        assert_eq!(catalog_code(PIXIV_URL), None);
    }

    // ── 6. Identity checks ──────────────────────────────────────────

    #[test]
    fn resolution_is_idempotent() {
        let a = resolve(PIXIV_URL, "Chapter 3 | My Novel - pixiv", None).expect("ok");
        let b = resolve(PIXIV_URL, "Chapter 3 | My Novel - pixiv", None).expect("ok");
        assert_eq!(a, b);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn meta_url_match_checks_site_ids() {
        let meta = resolve(PIXIV_URL, "Chapter 3 | My Novel - pixiv", None).expect("ok");
        assert!(meta_matches_url(&meta, PIXIV_URL));
        assert!(!meta_matches_url(&meta, "https://www.pixiv.net/novel/show.php?id=1"));

        let info = catalog(1);
        let narou = resolve(NAROU_EP_URL, "", Some(&info)).expect("ok");
        assert!(meta_matches_url(&narou, "https://ncode.syosetu.com/N1234AB/6/"));
        assert!(!meta_matches_url(&narou, "https://ncode.syosetu.com/n5555zz/1/"));

        let kakuyomu = resolve(
            "https://kakuyomu.jp/works/1/episodes/2",
            "Ep - Work - カクヨム",
            None,
        )
        .expect("ok");
        assert!(meta_matches_url(&kakuyomu, "https://kakuyomu.jp/works/9/episodes/9"));
        assert!(!meta_matches_url(&kakuyomu, PIXIV_URL));
    }
}
