//! Supported platforms, URL detection and cache-key normalization

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Query parameters that only carry tracking state
const TRACKING_PARAMS: &[&str] = &["igshid", "igsh", "si", "feature", "fbclid", "s", "t"];

/// Content platform a URL belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Instagram posts, reels and carousels
    Instagram,
    /// `TikTok` videos
    TikTok,
    /// `YouTube` videos and shorts
    YouTube,
    /// Facebook videos and reels
    Facebook,
    /// Twitter / X posts
    Twitter,
}

impl Platform {
    /// Every supported platform
    pub const ALL: [Self; 5] = [
        Self::Instagram,
        Self::TikTok,
        Self::YouTube,
        Self::Facebook,
        Self::Twitter,
    ];

    /// Stable lowercase name, used in the cache table and config file
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
        }
    }

    /// Identify the platform from a host name
    #[must_use]
    pub fn from_host(host: &str) -> Option<Self> {
        let host = strip_host_prefix(&host.to_ascii_lowercase()).to_string();

        if host_matches(&host, "instagram.com") || host_matches(&host, "instagr.am") {
            Some(Self::Instagram)
        } else if host_matches(&host, "tiktok.com") {
            Some(Self::TikTok)
        } else if host_matches(&host, "youtube.com") || host == "youtu.be" {
            Some(Self::YouTube)
        } else if host_matches(&host, "facebook.com")
            || host_matches(&host, "fb.watch")
            || host_matches(&host, "fb.com")
        {
            Some(Self::Facebook)
        } else if host_matches(&host, "twitter.com") || host_matches(&host, "x.com") {
            Some(Self::Twitter)
        } else {
            None
        }
    }

    /// Detect the platform of a URL
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` if the URL does not parse or the host is not supported
    pub fn detect(raw: &str) -> Result<Self> {
        let url = parse_lenient(raw)?;
        url.host_str()
            .and_then(Self::from_host)
            .ok_or_else(|| Error::InvalidUrl(format!("unsupported host in {raw}")))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "youtube" => Ok(Self::YouTube),
            "facebook" => Ok(Self::Facebook),
            "twitter" | "x" => Ok(Self::Twitter),
            other => Err(Error::InvalidUrl(format!("unknown platform: {other}"))),
        }
    }
}

/// Normalize a content URL into its canonical cache form
///
/// Forces https, lowercases the host and strips `www.`/`m.`, drops the
/// fragment and tracking parameters, rewrites `youtu.be/<id>` to the watch
/// form and trims a trailing slash.
///
/// # Errors
///
/// Returns `Error::InvalidUrl` if the URL cannot be parsed or has no host
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = parse_lenient(raw)?;

    let host = url
        .host_str()
        .map(|h| strip_host_prefix(&h.to_ascii_lowercase()).to_string())
        .ok_or_else(|| Error::InvalidUrl(format!("missing host in {raw}")))?;

    if host == "youtu.be" {
        let id = url.path().trim_matches('/').to_string();
        if id.is_empty() {
            return Err(Error::InvalidUrl(format!("missing video id in {raw}")));
        }
        url = Url::parse(&format!("https://youtube.com/watch?v={id}"))
            .map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
    } else {
        url.set_host(Some(&host))
            .map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
    }

    if url.set_scheme("https").is_err() {
        return Err(Error::InvalidUrl(format!("unsupported scheme in {raw}")));
    }
    url.set_fragment(None);
    url.set_port(None).ok();

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Parse a URL, accepting input without a scheme
fn parse_lenient(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty url".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

fn strip_host_prefix(host: &str) -> &str {
    ["www.", "m.", "mobile."]
        .iter()
        .find_map(|prefix| host.strip_prefix(prefix))
        .unwrap_or(host)
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}
