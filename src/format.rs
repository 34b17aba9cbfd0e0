//! Desired output formats and matching against responder-offered options
//!
//! Matching is pure: given the buttons a responder presented and the format
//! the requester asked for, pick the button to press or report that nothing
//! fits.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Primary audio keywords, tried in order
const AUDIO_KEYWORDS: &[&str] = &["mp3", "audio", "звук"];

/// Looser audio variants used once primary keywords found nothing
const AUDIO_FALLBACK_KEYWORDS: &[&str] = &["аудио", "audio", "звук", "mp3", "m4a", "music"];

/// Digit runs inside an offer label, optionally suffixed with `p`
static RESOLUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)(p)?").expect("valid regex"));

/// Format the requester wants from a responder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Video with the given vertical resolution, e.g. 720 for `720p`
    Resolution(u32),
    /// Audio-only extraction
    Audio,
    /// An exact responder button label
    Label(String),
}

impl Format {
    /// Resolution `YouTube` requests default to when no format is given
    pub const DEFAULT_VIDEO: Self = Self::Resolution(720);

    /// Whether this is an audio format
    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution(height) => write!(f, "{height}p"),
            Self::Audio => f.write_str("mp3"),
            Self::Label(label) => write!(f, "label:{label}"),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(label) = trimmed.strip_prefix("label:") {
            let label = label.trim();
            if label.is_empty() {
                return Err(Error::UnsupportedFormat(s.to_string()));
            }
            return Ok(Self::Label(label.to_string()));
        }

        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "mp3" | "audio" | "m4a" => return Ok(Self::Audio),
            "hd" => return Ok(Self::Resolution(720)),
            "fhd" | "fullhd" | "full hd" => return Ok(Self::Resolution(1080)),
            "4k" => return Ok(Self::Resolution(2160)),
            _ => {}
        }

        let digits = lower.strip_suffix('p').unwrap_or(&lower);
        match digits.parse::<u32>() {
            Ok(height) if (100..=9999).contains(&height) => Ok(Self::Resolution(height)),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Opaque token that activates one offered option
///
/// Tokens remember the message that presented them, so a token can only be
/// used against that message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionToken {
    /// Message the option was attached to
    pub message_id: i64,
    /// Callback payload the responder expects back
    pub data: String,
}

/// One selectable option presented by a responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOffer {
    /// Button text as shown to the user
    pub label: String,
    /// Token that selects this option
    pub token: SelectionToken,
}

impl FormatOffer {
    /// Create an offer attached to `message_id`
    #[must_use]
    pub fn new(message_id: i64, label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: SelectionToken {
                message_id,
                data: data.into(),
            },
        }
    }
}

/// Pick the token for the offer that best matches `desired`
#[must_use]
pub fn select(offers: &[FormatOffer], desired: &Format) -> Option<SelectionToken> {
    select_offer(offers, desired).map(|offer| offer.token.clone())
}

/// Pick the offer that best matches `desired`
///
/// Resolution formats match an exact number (or alias such as `HD`) first,
/// then the offer whose number is closest by absolute difference. Audio
/// formats try the primary keywords in order, then looser variants. Labels
/// must match exactly, ignoring case.
#[must_use]
pub fn select_offer<'a>(offers: &'a [FormatOffer], desired: &Format) -> Option<&'a FormatOffer> {
    match desired {
        Format::Resolution(height) => select_resolution(offers, *height),
        Format::Audio => keyword_match(offers, AUDIO_KEYWORDS)
            .or_else(|| keyword_match(offers, AUDIO_FALLBACK_KEYWORDS)),
        Format::Label(label) => {
            let wanted = label.trim().to_lowercase();
            offers
                .iter()
                .find(|offer| offer.label.trim().to_lowercase() == wanted)
        }
    }
}

fn select_resolution(offers: &[FormatOffer], height: u32) -> Option<&FormatOffer> {
    let candidates: Vec<(&FormatOffer, u32)> = offers
        .iter()
        .filter(|offer| !is_audio_label(&offer.label))
        .filter_map(|offer| label_resolution(&offer.label).map(|res| (offer, res)))
        .collect();

    if let Some((offer, _)) = candidates.iter().find(|(_, res)| *res == height) {
        return Some(offer);
    }

    // min_by_key keeps the first of equal distances, so ties go to the earlier button
    candidates
        .into_iter()
        .min_by_key(|(_, res)| res.abs_diff(height))
        .map(|(offer, _)| offer)
}

fn keyword_match<'a>(offers: &'a [FormatOffer], keywords: &[&str]) -> Option<&'a FormatOffer> {
    keywords.iter().find_map(|keyword| {
        offers
            .iter()
            .find(|offer| offer.label.to_lowercase().contains(keyword))
    })
}

fn is_audio_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    AUDIO_FALLBACK_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
}

/// Resolution a label advertises
///
/// Prefers a 3–4 digit number suffixed with `p`, then the first bare 3–4
/// digit number, then named aliases.
fn label_resolution(label: &str) -> Option<u32> {
    let mut bare = None;
    for caps in RESOLUTION_PATTERN.captures_iter(label) {
        let Some(digits) = caps.get(1) else { continue };
        if !(3..=4).contains(&digits.as_str().len()) {
            continue;
        }
        let Ok(value) = digits.as_str().parse::<u32>() else {
            continue;
        };
        if caps.get(2).is_some() {
            return Some(value);
        }
        bare.get_or_insert(value);
    }
    if bare.is_some() {
        return bare;
    }

    let lower = label.to_lowercase();
    if lower.contains("4k") {
        Some(2160)
    } else if lower.contains("full hd") || lower.contains("fhd") {
        Some(1080)
    } else if lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == "hd") {
        Some(720)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_offers(labels: &[&str]) -> Vec<FormatOffer> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| FormatOffer::new(42, *label, format!("cb:{i}")))
            .collect()
    }

    fn picked(offers: &[FormatOffer], desired: &str) -> Option<String> {
        let format: Format = desired.parse().unwrap();
        select_offer(offers, &format).map(|o| o.label.clone())
    }

    #[test]
    fn parses_format_strings() {
        assert_eq!("720p".parse::<Format>().unwrap(), Format::Resolution(720));
        assert_eq!("1080".parse::<Format>().unwrap(), Format::Resolution(1080));
        assert_eq!("MP3".parse::<Format>().unwrap(), Format::Audio);
        assert_eq!("hd".parse::<Format>().unwrap(), Format::Resolution(720));
        assert_eq!(
            "label:Best quality".parse::<Format>().unwrap(),
            Format::Label("Best quality".to_string())
        );
        assert!("flac-ish".parse::<Format>().is_err());
        assert!("label:".parse::<Format>().is_err());
        assert!("5p".parse::<Format>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for format in [
            Format::Resolution(480),
            Format::Audio,
            Format::Label("Video HD".to_string()),
        ] {
            assert_eq!(format.to_string().parse::<Format>().unwrap(), format);
        }
    }

    #[test]
    fn exact_resolution_wins() {
        let offers = make_offers(&["360", "480", "720"]);
        assert_eq!(picked(&offers, "480p").as_deref(), Some("480"));
    }

    #[test]
    fn closest_resolution_by_absolute_difference() {
        let offers = make_offers(&["360", "480", "720"]);
        assert_eq!(picked(&offers, "500p").as_deref(), Some("480"));

        let offers = make_offers(&["360", "720"]);
        assert_eq!(picked(&offers, "500p").as_deref(), Some("360"));
        assert_eq!(picked(&offers, "1080p").as_deref(), Some("720"));
    }

    #[test]
    fn prefers_p_suffixed_number_in_label() {
        let offers = make_offers(&["📹 1080p (120 MB)", "📹 720p (45 MB)"]);
        assert_eq!(picked(&offers, "720p").as_deref(), Some("📹 720p (45 MB)"));
    }

    #[test]
    fn hd_alias_counts_as_720() {
        let offers = make_offers(&["SD", "HD", "Full HD"]);
        assert_eq!(picked(&offers, "720p").as_deref(), Some("HD"));
        assert_eq!(picked(&offers, "1080p").as_deref(), Some("Full HD"));
    }

    #[test]
    fn audio_keywords_then_fallback() {
        let offers = make_offers(&["360p", "720p", "🎵 MP3 320kbps"]);
        assert_eq!(picked(&offers, "mp3").as_deref(), Some("🎵 MP3 320kbps"));

        let offers = make_offers(&["360p", "Аудио"]);
        assert_eq!(picked(&offers, "mp3").as_deref(), Some("Аудио"));
    }

    #[test]
    fn audio_offers_are_not_resolution_candidates() {
        let offers = make_offers(&["MP3 320", "Audio 128"]);
        assert_eq!(picked(&offers, "360p"), None);
    }

    #[test]
    fn no_match_is_explicit() {
        let offers = make_offers(&["360p", "720p"]);
        assert_eq!(picked(&offers, "mp3"), None);
        assert_eq!(picked(&[], "720p"), None);
        assert_eq!(picked(&offers, "label:1080p"), None);
    }

    #[test]
    fn label_match_ignores_case() {
        let offers = make_offers(&["Video 720p", "Audio"]);
        assert_eq!(
            picked(&offers, "label:video 720P").as_deref(),
            Some("Video 720p")
        );
    }

    #[test]
    fn token_keeps_origin_message() {
        let offers = make_offers(&["360", "480"]);
        let token = select(&offers, &Format::Resolution(480)).unwrap();
        assert_eq!(token.message_id, 42);
        assert_eq!(token.data, "cb:1");
    }
}
