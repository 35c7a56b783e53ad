//! Unsubscribe link discovery over email bodies.
//!
//! Discovery is tiered. Keyword-bearing anchors come first, then keyword-bearing
//! URLs in the plain-text body, then URLs printed next to the word
//! "unsubscribe". A single distinct hit in a tier is returned as
//! [`LinkScan::Unambiguous`]; anything else is handed back as
//! [`LinkScan::Ambiguous`] so a caller with a language model can pick.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Phrases that mark a link as an unsubscribe target (matched case-insensitively
/// against anchor text and URLs).
pub const UNSUBSCRIBE_KEYWORDS: &[&str] = &[
    "unsubscribe",
    "opt out",
    "opt-out",
    "optout",
    "manage preferences",
    "email preferences",
    "email-preferences",
    "stop receiving",
    "subscription",
    "remove",
];

/// Bytes of plain text searched before the word "unsubscribe".
const PROXIMITY_BEFORE: usize = 100;
/// Bytes of plain text searched after the word "unsubscribe".
const PROXIMITY_AFTER: usize = 200;

const URL_PATTERN: &str = r#"(?i)https?://[^\s"'<>)\]]+"#;

/// An `<a href>` with its visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

impl Anchor {
    /// Whether the anchor text or its URL carries an unsubscribe keyword.
    pub fn mentions_unsubscribe(&self) -> bool {
        has_keyword(&self.text) || has_keyword(&self.href)
    }
}

/// Everything a body offered when no single link stood out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// Every http(s) anchor, in document order.
    pub anchors: Vec<Anchor>,
    /// Distinct http(s) URLs from the plain text that no anchor points at.
    pub text_urls: Vec<String>,
    /// Text URLs printed near the word "unsubscribe" (only filled when no URL
    /// carries a keyword).
    pub proximity_urls: Vec<String>,
}

impl Candidates {
    /// Distinct hrefs of keyword-bearing anchors.
    pub fn keyword_anchor_hrefs(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.anchors
            .iter()
            .filter(|a| a.mentions_unsubscribe())
            .map(|a| a.href.as_str())
            .filter(|href| seen.insert(*href))
            .collect()
    }

    /// Text URLs that carry a keyword themselves.
    pub fn keyword_text_urls(&self) -> Vec<&str> {
        self.text_urls
            .iter()
            .filter(|u| has_keyword(u))
            .map(String::as_str)
            .collect()
    }

    pub fn has_keyword_match(&self) -> bool {
        self.anchors.iter().any(Anchor::mentions_unsubscribe)
            || self.text_urls.iter().any(|u| has_keyword(u))
    }

    /// The set a model should choose from: keyword matches when there are any,
    /// otherwise every anchor and text URL.
    pub fn for_model(&self) -> (Vec<&Anchor>, Vec<&str>) {
        if self.has_keyword_match() {
            let anchors = self
                .anchors
                .iter()
                .filter(|a| a.mentions_unsubscribe())
                .collect();
            (anchors, self.keyword_text_urls())
        } else {
            let mut urls: Vec<&str> = self.text_urls.iter().map(String::as_str).collect();
            for u in &self.proximity_urls {
                if !urls.contains(&u.as_str()) {
                    urls.push(u);
                }
            }
            (self.anchors.iter().collect(), urls)
        }
    }

    /// First keyword candidate in document order, used when no model is
    /// available or the model could not decide.
    pub fn best_guess(&self) -> Option<String> {
        self.keyword_anchor_hrefs()
            .first()
            .copied()
            .or_else(|| self.keyword_text_urls().first().copied())
            .or_else(|| self.proximity_urls.first().map(String::as_str))
            .map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty() && self.text_urls.is_empty()
    }
}

/// Outcome of scanning one email body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkScan {
    /// Exactly one distinct candidate in the first tier that had any.
    Unambiguous(String),
    /// Zero or several keyword candidates; a model should pick.
    Ambiguous(Candidates),
    /// Nothing worth asking about.
    Empty,
}

/// Scan HTML and plain-text bodies for an unsubscribe link.
///
/// The "exactly one candidate" cutoff is a heuristic: a tier with a single
/// distinct match is trusted without a model call.
pub fn scan(html: &str, text: &str) -> LinkScan {
    let anchors = extract_anchors(html);
    let covered: HashSet<String> = anchors.iter().map(|a| a.href.clone()).collect();

    let text_urls: Vec<String> = dedup_links(extract_text_urls(text))
        .into_iter()
        .filter(|u| !covered.contains(u))
        .collect();

    let mut candidates = Candidates {
        anchors,
        text_urls,
        proximity_urls: Vec::new(),
    };

    // Tier A: keyword anchors
    let hrefs = candidates.keyword_anchor_hrefs();
    if hrefs.len() == 1 {
        return LinkScan::Unambiguous(hrefs[0].to_string());
    }
    let anchor_hits = hrefs.len();

    // Tier B: keyword URLs in the plain text not already offered as anchors
    let text_hits = candidates.keyword_text_urls();
    if text_hits.len() == 1 {
        return LinkScan::Unambiguous(text_hits[0].to_string());
    }

    if anchor_hits == 0 && text_hits.is_empty() {
        candidates.proximity_urls = proximity_urls(text)
            .into_iter()
            .filter(|u| !covered.contains(u))
            .collect();
        if candidates.proximity_urls.len() == 1 {
            return LinkScan::Unambiguous(candidates.proximity_urls.remove(0));
        }
    }

    if candidates.is_empty() {
        return LinkScan::Empty;
    }
    if candidates.anchors.is_empty() && !has_keyword(text) {
        return LinkScan::Empty;
    }
    LinkScan::Ambiguous(candidates)
}

/// Best unsubscribe link without a model: the unambiguous hit, else the first
/// keyword candidate.
pub fn extract_candidate_link(html: &str, text: &str) -> Option<String> {
    match scan(html, text) {
        LinkScan::Unambiguous(url) => Some(url),
        LinkScan::Ambiguous(candidates) => candidates.best_guess(),
        LinkScan::Empty => None,
    }
}

/// All http(s) anchors in `html`. Other schemes (`mailto:`, `javascript:`, …)
/// are dropped.
pub fn extract_anchors(html: &str) -> Vec<Anchor> {
    if html.trim().is_empty() {
        return Vec::new();
    }
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    doc.select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if !is_web_url(href) {
                return None;
            }
            let mut text = collapse_whitespace(&a.text().collect::<String>());
            if text.is_empty() {
                text = a
                    .value()
                    .attr("aria-label")
                    .or_else(|| a.value().attr("title"))
                    .map(collapse_whitespace)
                    .unwrap_or_default();
            }
            Some(Anchor {
                href: href.to_string(),
                text,
            })
        })
        .collect()
}

/// Absolute http(s) URLs in plain text, in order, trailing punctuation trimmed.
pub fn extract_text_urls(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(URL_PATTERN) else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| trim_url(m.as_str()).to_string())
        .filter(|u| is_web_url(u))
        .collect()
}

/// Deduplicate links, keeping the first occurrence of each.
pub fn dedup_links<I, S>(links: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for link in links {
        let link = link.into();
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    out
}

/// URLs that start within the window around the first "unsubscribe" mention.
fn proximity_urls(text: &str) -> Vec<String> {
    let Some(idx) = text.to_ascii_lowercase().find("unsubscribe") else {
        return Vec::new();
    };
    let Ok(re) = Regex::new(URL_PATTERN) else {
        return Vec::new();
    };
    let start = idx.saturating_sub(PROXIMITY_BEFORE);
    let end = (idx + PROXIMITY_AFTER).min(text.len());
    dedup_links(
        re.find_iter(text)
            .filter(|m| m.start() >= start && m.start() < end)
            .map(|m| trim_url(m.as_str()).to_string()),
    )
}

fn has_keyword(s: &str) -> bool {
    let normalized = collapse_whitespace(&s.to_lowercase());
    UNSUBSCRIBE_KEYWORDS.iter().any(|k| normalized.contains(k))
}

/// Absolute http(s) URL with a host.
fn is_web_url(s: &str) -> bool {
    match url::Url::parse(s) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

fn trim_url(s: &str) -> &str {
    s.trim_end_matches(['.', ',', ';', ':', '!', '?'])
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
