use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{InvalidTabId, ResolveError};

// ─── Site ─────────────────────────────────────────────────────────

/// A supported web novel site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Site {
    Kakuyomu,
    Hameln,
    Pixiv,
    Narou,
}

impl Site {
    pub const ALL: [Self; 4] = [Self::Kakuyomu, Self::Hameln, Self::Pixiv, Self::Narou];

    /// Registrable domain, also the key of the per-site enable flags.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Kakuyomu => "kakuyomu.jp",
            Self::Hameln => "syosetu.org",
            Self::Pixiv => "pixiv.net",
            Self::Narou => "syosetu.com",
        }
    }

    /// Map a hostname (any subdomain) to its site.
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|site| host == site.domain() || host.ends_with(&format!(".{}", site.domain())))
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}

impl FromStr for Site {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|site| site.domain().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResolveError::UnknownSite(s.to_string()))
    }
}

impl From<Site> for String {
    fn from(site: Site) -> Self {
        site.domain().to_string()
    }
}

impl TryFrom<String> for Site {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ─── Certificate ──────────────────────────────────────────────────

/// Confidence attached to a resolved content identity.
///
/// Only `Title` may accrue billable time.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Certificate {
    /// Not content.
    #[default]
    None,
    /// URL shape matches but the title could not be decomposed.
    Url,
    /// Identity fully derived from the title (or the catalog).
    Title,
}

impl Certificate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Url => "url",
            Self::Title => "title",
        }
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ContentIdentity ──────────────────────────────────────────────

/// Classified identity of the page shown in a tab.
///
/// Every site parser returns this fixed shape; `certificate` is the
/// discriminant that decides how far the identity can be trusted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentIdentity {
    pub site: Option<Site>,
    pub is_content: bool,
    pub certificate: Certificate,
    pub work_title: String,
    pub episode_title: String,
    pub author: String,
    /// Site-native work id embedded in the URL (Pixiv novel id, Narou ncode).
    pub site_id: Option<String>,
}

impl ContentIdentity {
    /// Not content at all.
    pub fn none(site: Option<Site>) -> Self {
        Self {
            site,
            ..Self::default()
        }
    }

    /// URL-only identity: the page could be content but the title is unusable.
    pub fn url_only(site: Site, is_content: bool) -> Self {
        Self {
            site: Some(site),
            is_content,
            certificate: Certificate::Url,
            ..Self::default()
        }
    }

    /// Identity derived from the title.
    pub fn titled(
        site: Site,
        is_content: bool,
        work_title: impl Into<String>,
        episode_title: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            site: Some(site),
            is_content,
            certificate: Certificate::Title,
            work_title: work_title.into(),
            episode_title: episode_title.into(),
            author: author.into(),
            site_id: None,
        }
    }

    #[must_use]
    pub fn with_site_id(mut self, site_id: Option<String>) -> Self {
        self.site_id = site_id;
        self
    }

    /// Whether time spent on this identity may be committed.
    pub fn is_billable(&self) -> bool {
        self.is_content && self.certificate == Certificate::Title
    }

    /// Whether two identities name the same work/episode.
    pub fn same_work(&self, other: &Self) -> bool {
        self.site == other.site
            && self.work_title == other.work_title
            && self.episode_title == other.episode_title
            && self.site_id == other.site_id
    }

    /// Compact signature used to suppress duplicate `meta.apply` logs.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.site.map(Site::domain).unwrap_or(""),
            self.is_content,
            self.certificate,
            self.work_title,
            self.episode_title,
            self.author,
            self.site_id.as_deref().unwrap_or(""),
        )
    }
}

// ─── Narou catalog ────────────────────────────────────────────────

/// Entry returned by the Narou catalog endpoint (`of=t-w-nt`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub title: String,
    pub writer: String,
    /// 1 = serialized, 2 = short story.
    pub noveltype: u8,
}

impl CatalogInfo {
    pub fn is_short_story(&self) -> bool {
        self.noveltype == 2
    }
}

// ─── Tab identity ─────────────────────────────────────────────────

/// Host tab identifier. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct TabId(i64);

impl TabId {
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for TabId {
    type Error = InvalidTabId;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(InvalidTabId(raw))
    }
}

impl From<TabId> for i64 {
    fn from(id: TabId) -> Self {
        id.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type WindowId = i64;
