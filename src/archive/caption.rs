//! Captions attached to archived media

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Words that mark a line as crediting whoever delivered the media
static PROVENANCE_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(via|by)\b").expect("valid regex"));

/// How the archived caption is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPolicy {
    /// Replace whatever the responder wrote with the attribution line
    #[default]
    Fixed,
    /// Keep the responder's caption but swap its credit line for ours
    RewriteProvenance,
}

impl CaptionPolicy {
    /// Produce the caption for archived media
    #[must_use]
    pub fn apply(self, original: Option<&str>, attribution: &str) -> String {
        match self {
            Self::Fixed => attribution.to_string(),
            Self::RewriteProvenance => rewrite_provenance(original.unwrap_or_default(), attribution),
        }
    }
}

/// Replace a trailing credit line, or append the attribution after a blank line
fn rewrite_provenance(original: &str, attribution: &str) -> String {
    let trimmed = original.trim_end();
    if trimmed.trim().is_empty() {
        return attribution.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.last().is_some_and(|line| is_credit_line(line)) {
        lines.pop();
    }

    let body = lines.join("\n");
    let body = body.trim_end();
    if body.is_empty() {
        attribution.to_string()
    } else {
        format!("{body}\n\n{attribution}")
    }
}

fn is_credit_line(line: &str) -> bool {
    line.contains('@') || PROVENANCE_WORDS.is_match(line)
}
